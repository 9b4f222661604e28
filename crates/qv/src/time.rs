//! Time event services.
//!
//! A [`TimeEvent`] counts clock ticks for one target active object. Each
//! [`TimerWheel`] services the time events of one tick rate; the host calls
//! [`TimerWheel::tick`] from its clock source and expired events reach their
//! targets through the regular post path.

use thiserror::Error;

use crate::event::{DynEvent, Signal};
use crate::kernel::{counter_limit, KernelError, KernelHandle};
use crate::sync::{Arc, Mutex};
use crate::trace::{self, records, TraceHook};

#[derive(Debug, Clone)]
pub struct TimeEventConfig {
    pub signal: Signal,
    pub interval_ticks: Option<u32>,
}

impl TimeEventConfig {
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            interval_ticks: None,
        }
    }

    /// Period used when the event is armed without an explicit interval.
    pub fn with_period(mut self, interval: u32) -> Self {
        self.interval_ticks = Some(interval);
        self
    }
}

#[derive(Error, Debug)]
pub enum TimeEventError {
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
}

struct TimeEventInner {
    cfg: TimeEventConfig,
    interval: Option<u32>,
    remaining: u32,
    armed: bool,
    /// Largest tick count the time event counter holds.
    max_ticks: u32,
}

impl TimeEventInner {
    fn check_ticks(&self, what: &str, ticks: u32) {
        if ticks > self.max_ticks {
            fatal!(
                "time event {what} of {ticks} ticks exceeds the counter limit {}",
                self.max_ticks
            );
        }
    }
}

#[derive(Clone)]
struct TraceBinding {
    hook: TraceHook,
    tick_rate: u8,
}

/// Software time event equivalent to `QTimeEvt`.
pub struct TimeEvent {
    target: u8,
    inner: Mutex<TimeEventInner>,
    trace: Mutex<Option<TraceBinding>>,
}

impl TimeEvent {
    /// Creates a disarmed time event posting to the object at `target`.
    pub fn new(target: u8, config: TimeEventConfig) -> Arc<Self> {
        Arc::new(Self {
            target,
            inner: Mutex::new(TimeEventInner {
                interval: config.interval_ticks.filter(|ticks| *ticks > 0),
                cfg: config,
                remaining: 0,
                armed: false,
                max_ticks: u32::MAX,
            }),
            trace: Mutex::new(None),
        })
    }

    pub fn target(&self) -> u8 {
        self.target
    }

    pub fn signal(&self) -> Signal {
        self.inner.lock().cfg.signal
    }

    /// Arms the event to expire after `timeout_ticks` ticks, then every
    /// `interval_ticks`.
    ///
    /// `None` keeps the period from [`TimeEventConfig::with_period`];
    /// `Some(0)` makes the event one-shot.
    pub fn arm(&self, timeout_ticks: u32, interval_ticks: Option<u32>) {
        assert!(timeout_ticks > 0, "time event armed with zero ticks");
        let mut inner = self.inner.lock();
        let interval = interval_ticks
            .or(inner.cfg.interval_ticks)
            .filter(|ticks| *ticks > 0);
        inner.check_ticks("timeout", timeout_ticks);
        inner.check_ticks("interval", interval.unwrap_or(0));
        inner.remaining = timeout_ticks;
        inner.interval = interval;
        inner.armed = true;
        drop(inner);

        self.emit_arm(records::time_evt::ARM, timeout_ticks, interval.unwrap_or(0));
    }

    /// Disarms the event. Returns `true` if it was armed.
    pub fn disarm(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.armed {
            let remaining = inner.remaining;
            let interval = inner.interval.unwrap_or(0);
            inner.armed = false;
            inner.remaining = 0;
            drop(inner);
            self.emit_arm(records::time_evt::DISARM, remaining, interval);
            true
        } else {
            drop(inner);
            self.emit_short(records::time_evt::DISARM_ATTEMPT);
            false
        }
    }

    /// Restarts the countdown with `timeout_ticks`, keeping the interval.
    /// Returns `true` if the event was armed before.
    pub fn rearm(&self, timeout_ticks: u32) -> bool {
        assert!(timeout_ticks > 0, "time event rearmed with zero ticks");
        let mut inner = self.inner.lock();
        inner.check_ticks("timeout", timeout_ticks);
        let was_armed = inner.armed;
        inner.remaining = timeout_ticks;
        inner.armed = true;
        let interval = inner.interval.unwrap_or(0);
        drop(inner);

        self.emit_arm(records::time_evt::REARM, timeout_ticks, interval);
        was_armed
    }

    pub fn is_armed(&self) -> bool {
        self.inner.lock().armed
    }

    /// Ticks left until expiry, 0 when disarmed.
    pub fn remaining(&self) -> u32 {
        self.inner.lock().remaining
    }

    /// Advances the countdown by one tick and returns the signal to post if
    /// the event expired.
    fn poll(&self) -> Option<Signal> {
        let mut inner = self.inner.lock();
        if !inner.armed {
            return None;
        }

        inner.remaining = inner.remaining.saturating_sub(1);
        if inner.remaining > 0 {
            return None;
        }

        let signal = inner.cfg.signal;
        let periodic = match inner.interval {
            Some(period) => {
                inner.remaining = period;
                true
            }
            None => {
                inner.armed = false;
                false
            }
        };
        drop(inner);

        if !periodic {
            self.emit_short(records::time_evt::AUTO_DISARM);
        }
        self.emit_post(signal);
        Some(signal)
    }

    /// Attaches the event to a wheel whose counters hold at most `max_ticks`.
    fn bind(&self, max_ticks: u32, binding: Option<TraceBinding>) {
        let mut inner = self.inner.lock();
        inner.max_ticks = max_ticks;
        if inner.armed {
            inner.check_ticks("timeout", inner.remaining);
        }
        inner.check_ticks("interval", inner.interval.unwrap_or(0));
        drop(inner);
        *self.trace.lock() = binding;
    }
}

/// Time events of one tick rate.
pub struct TimerWheel {
    kernel: KernelHandle,
    tick_rate: u8,
    max_ticks: u32,
    events: Mutex<Vec<Arc<TimeEvent>>>,
}

impl TimerWheel {
    pub fn new(kernel: KernelHandle, tick_rate: u8) -> Result<Self, TimeEventError> {
        let max = kernel.config().max_tick_rate;
        if tick_rate >= max {
            return Err(KernelError::TickRateOutOfRange {
                rate: tick_rate,
                max,
            }
            .into());
        }
        let ctr_size = kernel.config().time_event_ctr_size;
        let max_ticks = u32::try_from(counter_limit(ctr_size)?).unwrap_or(u32::MAX);
        Ok(Self {
            kernel,
            tick_rate,
            max_ticks,
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn tick_rate(&self) -> u8 {
        self.tick_rate
    }

    /// Largest timeout or interval a registered event may be armed with.
    pub fn max_ticks(&self) -> u32 {
        self.max_ticks
    }

    /// Adds `event` to this wheel.
    ///
    /// Arming the event beyond [`TimerWheel::max_ticks`], before or after
    /// registration, is fatal.
    pub fn register(&self, event: Arc<TimeEvent>) {
        let binding = self.kernel.trace_hook().map(|hook| TraceBinding {
            hook,
            tick_rate: self.tick_rate,
        });
        event.bind(self.max_ticks, binding);
        self.events.lock().push(event);
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Processes one clock tick.
    pub fn tick(&self) -> Result<(), TimeEventError> {
        let expired: Vec<(u8, Signal)> = self
            .events
            .lock()
            .iter()
            .filter_map(|event| event.poll().map(|signal| (event.target(), signal)))
            .collect();

        for (target, signal) in expired {
            self.kernel.post(target, DynEvent::immortal(signal))?;
        }
        Ok(())
    }
}

impl TimeEvent {
    fn binding(&self) -> Option<TraceBinding> {
        self.trace.lock().clone()
    }

    /// Emits a record with a payload built on the stack.
    fn emit_trace<F>(&self, record: u8, timestamp: bool, builder: F)
    where
        F: FnOnce(&mut [u8], u8) -> usize,
    {
        if let Some(binding) = self.binding() {
            let mut buf = [0u8; 16];
            let len = builder(&mut buf, binding.tick_rate);
            trace::emit(Some(&binding.hook), record, &buf[..len], timestamp);
        }
    }

    /// `target, ticks, interval, tick_rate`
    fn emit_arm(&self, record: u8, ticks: u32, interval: u32) {
        let target = self.target;
        self.emit_trace(record, true, |buf, tick_rate| {
            buf[0] = target;
            buf[1..5].copy_from_slice(&ticks.to_le_bytes());
            buf[5..9].copy_from_slice(&interval.to_le_bytes());
            buf[9] = tick_rate;
            10
        });
    }

    /// `target, tick_rate`
    fn emit_short(&self, record: u8) {
        let target = self.target;
        self.emit_trace(record, record != records::time_evt::AUTO_DISARM, |buf, tick_rate| {
            buf[0] = target;
            buf[1] = tick_rate;
            2
        });
    }

    /// `target, signal, tick_rate`
    fn emit_post(&self, signal: Signal) {
        let target = self.target;
        self.emit_trace(records::time_evt::POST, true, |buf, tick_rate| {
            buf[0] = target;
            buf[1..3].copy_from_slice(&signal.0.to_le_bytes());
            buf[3] = tick_rate;
            4
        });
    }
}
