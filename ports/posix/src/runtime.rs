//! Runtime wiring for hosting a QV application in a POSIX process.

use std::sync::Arc;

use qv::kernel::{Kernel, KernelHandle};
use qv::TimerWheel;

use crate::time::{ClockTick, Ticker};
use crate::PosixError;

/// Clock tick callback, handed every timer wheel in tick-rate order.
pub type ClockTickHook = Box<dyn FnMut(&[Arc<TimerWheel>]) + Send>;

/// Owns a kernel, one timer wheel per tick rate and the process hooks.
///
/// [`PosixRuntime::run`] calls the startup hook, starts the ticker, runs the
/// scheduler loop until stopped, then stops the ticker and calls the cleanup
/// hook. Each ticker period calls the clock tick hook, which services tick
/// rate 0 unless replaced with [`PosixRuntime::on_clock_tick`].
pub struct PosixRuntime {
    kernel: Arc<Kernel>,
    wheels: Vec<Arc<TimerWheel>>,
    clock: ClockTick,
    on_startup: Option<Box<dyn FnOnce() + Send>>,
    on_cleanup: Option<Box<dyn FnOnce() + Send>>,
    on_clock_tick: Option<ClockTickHook>,
}

impl PosixRuntime {
    pub fn new(kernel: Kernel) -> Result<Self, PosixError> {
        let kernel = Arc::new(kernel);
        let wheels = (0..kernel.config().max_tick_rate)
            .map(|rate| TimerWheel::new(kernel.handle(), rate).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            kernel,
            wheels,
            clock: ClockTick::default(),
            on_startup: None,
            on_cleanup: None,
            on_clock_tick: None,
        })
    }

    /// Sets the rate at which tick rate 0 is serviced.
    pub fn with_tick_rate(mut self, rate_hz: u32) -> Result<Self, PosixError> {
        self.clock = ClockTick::new(rate_hz)?;
        Ok(self)
    }

    pub fn on_startup(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_startup = Some(Box::new(hook));
        self
    }

    pub fn on_cleanup(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_cleanup = Some(Box::new(hook));
        self
    }

    /// Replaces the default clock tick handling.
    ///
    /// The hook decides which wheels advance on each ticker period, e.g. a
    /// slower rate serviced every tenth period.
    pub fn on_clock_tick(
        mut self,
        hook: impl FnMut(&[Arc<TimerWheel>]) + Send + 'static,
    ) -> Self {
        self.on_clock_tick = Some(Box::new(hook));
        self
    }

    pub fn kernel(&self) -> Arc<Kernel> {
        Arc::clone(&self.kernel)
    }

    pub fn handle(&self) -> KernelHandle {
        self.kernel.handle()
    }

    pub fn clock(&self) -> ClockTick {
        self.clock
    }

    /// Timer wheel servicing `tick_rate`.
    pub fn wheel(&self, tick_rate: u8) -> Option<Arc<TimerWheel>> {
        self.wheels.get(tick_rate as usize).cloned()
    }

    /// Processes one tick of `tick_rate` by hand.
    pub fn tick(&self, tick_rate: u8) -> Result<(), PosixError> {
        match self.wheels.get(tick_rate as usize) {
            Some(wheel) => Ok(wheel.tick()?),
            None => Err(PosixError::Kernel(qv::KernelError::TickRateOutOfRange {
                rate: tick_rate,
                max: self.wheels.len() as u8,
            })),
        }
    }

    /// Stops the kernel when the process receives SIGINT.
    pub fn install_ctrlc_handler(&self) -> Result<(), PosixError> {
        let handle = self.kernel.handle();
        ctrlc::set_handler(move || {
            log::info!("interrupt received, stopping");
            handle.stop();
        })?;
        Ok(())
    }

    pub fn run_until_idle(&self) {
        self.kernel.run_until_idle();
    }

    pub fn has_pending_work(&self) -> bool {
        self.kernel.has_pending_work()
    }

    /// Runs the application until [`KernelHandle::stop`] is called.
    pub fn run(mut self) -> Result<(), PosixError> {
        if let Some(hook) = self.on_startup.take() {
            hook();
        }

        let mut on_tick: ClockTickHook = match self.on_clock_tick.take() {
            Some(hook) => hook,
            None => Box::new(tick_first_rate),
        };
        let wheels = self.wheels.clone();
        let ticker = Ticker::start(self.clock, move || on_tick(wheels.as_slice()))?;

        self.kernel.run();

        ticker.stop();
        if let Some(hook) = self.on_cleanup.take() {
            hook();
        }
        Ok(())
    }
}

/// Default clock tick hook: services tick rate 0.
pub fn tick_first_rate(wheels: &[Arc<TimerWheel>]) {
    if let Some(wheel) = wheels.first() {
        if let Err(err) = wheel.tick() {
            log::error!("clock tick failed: {err}");
        }
    }
}
