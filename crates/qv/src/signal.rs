//! Wake-up bridge between producers and the idle scheduler loop.
//!
//! Producers call [`HostSignal::signal`] after every successful post; the
//! scheduler calls [`HostSignal::wait`] only once it has found nothing ready.
//! The notification must be latched: a signal that arrives after the
//! scheduler saw an empty ready set but before it started waiting has to
//! make that wait return at once.

#[cfg(feature = "std")]
use std::time::Duration;

#[cfg(feature = "std")]
use crate::sync::{Condvar, Mutex};

pub trait HostSignal: Send + Sync {
    /// Latches a wake-up and releases a waiter, if any.
    fn signal(&self);

    /// Blocks until a wake-up is latched, then consumes it.
    fn wait(&self);
}

/// Auto-reset event built from a boolean latch and a condition variable.
#[cfg(feature = "std")]
#[derive(Default)]
pub struct LatchedSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

#[cfg(feature = "std")]
impl LatchedSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`HostSignal::wait`] but gives up after `timeout`.
    ///
    /// Returns `true` if a wake-up was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if !*pending {
            // spurious and timed-out wake-ups both end up re-checking the latch
            let _ = self.cond.wait_while_for(&mut pending, |pending| !*pending, timeout);
        }
        core::mem::replace(&mut *pending, false)
    }

    pub fn is_pending(&self) -> bool {
        *self.pending.lock()
    }
}

#[cfg(feature = "std")]
impl HostSignal for LatchedSignal {
    fn signal(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_one();
    }

    fn wait(&self) {
        let mut pending = self.pending.lock();
        while !*pending {
            self.cond.wait(&mut pending);
        }
        *pending = false;
    }
}
