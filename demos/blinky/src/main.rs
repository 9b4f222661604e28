//! Blinky on a POSIX host.
//!
//! `Blinker` toggles a virtual LED on a periodic time event and publishes
//! every toggle as a pool event. `Monitor` subscribes to toggles and logs
//! them. The application stops after `BLINKS` toggles or on Ctrl-C.

use std::sync::Arc;

use log::{Level, LevelFilter, Log, Metadata, Record};

use qv::{new_active_object, ActiveBehavior, ActiveContext, DynEvent, Signal};
use qv::{TimeEvent, TimeEventConfig};
use qv_posix::{PosixError, PosixPort, PosixRuntime};

const TIMEOUT_SIG: Signal = Signal(10);
const TOGGLED_SIG: Signal = Signal(11);

const BLINKER_PRIO: u8 = 2;
const MONITOR_PRIO: u8 = 1;

const BLINKS: u32 = 10;

/// Published on every LED toggle.
#[derive(Debug)]
struct Toggled {
    on: bool,
    count: u32,
}

struct Blinker {
    on: bool,
    count: u32,
}

impl ActiveBehavior for Blinker {
    fn on_start(&mut self, _ctx: &mut ActiveContext) {}

    fn on_event(&mut self, ctx: &mut ActiveContext, event: DynEvent) {
        if event.signal() != TIMEOUT_SIG {
            return;
        }
        self.on = !self.on;
        self.count += 1;
        let toggled = ctx.new_event(
            TOGGLED_SIG,
            Toggled {
                on: self.on,
                count: self.count,
            },
        );
        if let Err(err) = ctx.publish(toggled) {
            log::error!("publish failed: {err}");
        }
        if self.count == BLINKS {
            ctx.kernel().stop();
        }
    }
}

struct Monitor;

impl ActiveBehavior for Monitor {
    fn on_start(&mut self, ctx: &mut ActiveContext) {
        if let Err(err) = ctx.subscribe(TOGGLED_SIG) {
            log::error!("subscribe failed: {err}");
        }
    }

    fn on_event(&mut self, _ctx: &mut ActiveContext, event: DynEvent) {
        if let Some(toggled) = event.payload_ref::<Toggled>() {
            let state = if toggled.on { "ON" } else { "OFF" };
            log::info!("LED {state} (#{})", toggled.count);
        }
    }
}

/// Writes records to stderr.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn main() -> Result<(), PosixError> {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }

    let port = PosixPort::new();
    let kernel = port
        .builder()
        .register(new_active_object(
            BLINKER_PRIO,
            4,
            Blinker {
                on: false,
                count: 0,
            },
        ))
        .register(new_active_object(MONITOR_PRIO, 8, Monitor))
        .event_pool(4, qv::EventHeader::size_for::<Toggled>())
        .build()?;

    let runtime = PosixRuntime::new(kernel)?
        .with_tick_rate(100)?
        .on_startup(|| log::info!("blinky starting"))
        .on_cleanup(|| log::info!("blinky done"));
    runtime.install_ctrlc_handler()?;

    let timeout = TimeEvent::new(BLINKER_PRIO, TimeEventConfig::new(TIMEOUT_SIG).with_period(50));
    if let Some(wheel) = runtime.wheel(0) {
        wheel.register(Arc::clone(&timeout));
    }
    // half a second at 100 Hz
    timeout.arm(50, None);

    runtime.run()
}
