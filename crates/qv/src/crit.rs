//! Critical section gateway.
//!
//! A bare-metal QV kernel protects its scheduler metadata by masking
//! interrupts. A host process cannot do that, so every piece of state that
//! would be touched with interrupts disabled is placed inside one
//! [`CriticalSection`] and reached only through [`CriticalSection::enter`].
//!
//! The gateway provides mutual exclusion between holders; it does not stop
//! the host from preempting the holder. Code inside must stay short.
//!
//! Sections do not nest. Entering while the current thread already holds a
//! section is reported as a fatal error instead of deadlocking.

use core::cell::Cell;
use core::ops::{Deref, DerefMut};

use crate::sync::{Mutex, MutexGuard};

thread_local! {
    static HOLDING: Cell<bool> = const { Cell::new(false) };
}

pub struct CriticalSection<T> {
    inner: Mutex<T>,
}

impl<T> CriticalSection<T> {
    pub fn new(state: T) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }

    /// Enters the section; it is left when the guard is dropped.
    pub fn enter(&self) -> CriticalGuard<'_, T> {
        if HOLDING.with(|held| held.replace(true)) {
            fatal!("critical sections must not nest");
        }
        CriticalGuard {
            guard: self.inner.lock(),
        }
    }

    /// Runs `f` inside the section.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.enter();
        f(&mut *guard)
    }
}

/// Whether the calling thread is currently inside a critical section.
pub fn in_critical_section() -> bool {
    HOLDING.with(Cell::get)
}

impl<T: Default> Default for CriticalSection<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct CriticalGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for CriticalGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for CriticalGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for CriticalGuard<'_, T> {
    fn drop(&mut self) {
        HOLDING.with(|held| held.set(false));
        // the mutex guard unlocks right after
    }
}
