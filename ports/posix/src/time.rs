//! Clock tick service.
//!
//! A [`Ticker`] owns one thread that calls a closure at a fixed rate. Tick
//! deadlines are absolute instants on the monotonic clock, so a late wake-up
//! shortens the following sleep instead of shifting every later tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::PosixError;

/// Default tick rate in Hz
pub const DEFAULT_TICKS_PER_SEC: u32 = 100;

/// Highest supported tick rate in Hz
pub const MAX_TICKS_PER_SEC: u32 = 10_000;

/// Nanoseconds per second
const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Clock tick configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTick {
    rate_hz: u32,
}

impl ClockTick {
    /// Validates `rate_hz` against `1..=10000`.
    pub fn new(rate_hz: u32) -> Result<Self, PosixError> {
        if rate_hz == 0 || rate_hz > MAX_TICKS_PER_SEC {
            return Err(PosixError::InvalidTickRate(rate_hz));
        }
        Ok(Self { rate_hz })
    }

    pub fn rate_hz(&self) -> u32 {
        self.rate_hz
    }

    /// Get the tick period as a Duration
    pub fn period(&self) -> Duration {
        Duration::from_nanos(NSEC_PER_SEC / self.rate_hz as u64)
    }
}

impl Default for ClockTick {
    fn default() -> Self {
        Self {
            rate_hz: DEFAULT_TICKS_PER_SEC,
        }
    }
}

/// Running ticker thread; stopped and joined on [`Ticker::stop`] or drop.
pub struct Ticker {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn start<F>(tick: ClockTick, on_tick: F) -> Result<Self, PosixError>
    where
        F: FnMut() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let period = tick.period();
        let thread = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("qv-ticker".into())
                .spawn(move || ticker_thread(period, &running, on_tick))?
        };
        log::info!("ticker started at {} Hz", tick.rate_hz());
        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("ticker thread panicked");
            }
            log::info!("ticker stopped");
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sleeps until the next absolute deadline rather than for a relative period.
fn ticker_thread<F: FnMut()>(period: Duration, running: &AtomicBool, mut on_tick: F) {
    let mut next_tick = Instant::now();

    while running.load(Ordering::Acquire) {
        next_tick += period;

        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        }

        if !running.load(Ordering::Acquire) {
            break;
        }
        on_tick();
    }
}
