use std::sync::{Arc, Mutex};

use crate::active::{new_active_object, ActiveContext, SignalHandler};
use crate::kernel::{Kernel, KernelConfig, KernelError};
use crate::time::{TimeEvent, TimeEventConfig, TimeEventError, TimerWheel};
use crate::trace::{records, TraceHook};
use crate::Signal;

#[derive(Clone, Default)]
struct Collector {
    events: Arc<Mutex<Vec<Signal>>>,
}

impl SignalHandler for Collector {
    fn on_start(&mut self, _ctx: &mut ActiveContext) {}

    fn handle_signal(&mut self, signal: Signal, _ctx: &mut ActiveContext) {
        self.events.lock().unwrap().push(signal);
    }
}

fn kernel_with_collector() -> (Kernel, Collector) {
    let collector = Collector::default();
    let probe = collector.clone();
    let ao = new_active_object(1, 4, collector);
    let kernel = Kernel::builder().register(ao).build().unwrap();
    kernel.start();
    (kernel, probe)
}

#[test]
fn time_event_fires_after_tick() {
    let (kernel, probe) = kernel_with_collector();

    let wheel = TimerWheel::new(kernel.handle(), 0).unwrap();
    let time_evt = TimeEvent::new(1, TimeEventConfig::new(Signal(0x10)));
    time_evt.arm(1, None);
    wheel.register(time_evt.clone());

    wheel.tick().unwrap();
    kernel.run_until_idle();

    let events = probe.events.lock().unwrap();
    assert_eq!(events.as_slice(), &[Signal(0x10)]);
    assert!(!time_evt.is_armed());
}

#[test]
fn one_shot_counts_down() {
    let (kernel, probe) = kernel_with_collector();
    let wheel = TimerWheel::new(kernel.handle(), 0).unwrap();
    let time_evt = TimeEvent::new(1, TimeEventConfig::new(Signal(3)));
    wheel.register(time_evt.clone());

    time_evt.arm(3, None);
    wheel.tick().unwrap();
    wheel.tick().unwrap();
    assert_eq!(time_evt.remaining(), 1);
    assert!(!kernel.has_pending_work());

    wheel.tick().unwrap();
    assert!(kernel.has_pending_work());
    kernel.run_until_idle();

    // disarmed after firing once
    wheel.tick().unwrap();
    wheel.tick().unwrap();
    assert!(!kernel.has_pending_work());
    assert_eq!(probe.events.lock().unwrap().len(), 1);
}

#[test]
fn periodic_event_reloads() {
    let (kernel, probe) = kernel_with_collector();
    let wheel = TimerWheel::new(kernel.handle(), 1).unwrap();
    let time_evt = TimeEvent::new(1, TimeEventConfig::new(Signal(5)).with_period(2));
    wheel.register(time_evt.clone());
    time_evt.arm(1, Some(2));

    for _ in 0..5 {
        wheel.tick().unwrap();
        kernel.run_until_idle();
    }

    // ticks 1, 3 and 5
    assert_eq!(probe.events.lock().unwrap().len(), 3);
    assert!(time_evt.is_armed());
}

#[test]
fn configured_period_applies_when_arm_omits_interval() {
    let (kernel, probe) = kernel_with_collector();
    let wheel = TimerWheel::new(kernel.handle(), 0).unwrap();
    let periodic = TimeEvent::new(1, TimeEventConfig::new(Signal(6)).with_period(3));
    let one_shot = TimeEvent::new(1, TimeEventConfig::new(Signal(7)).with_period(3));
    wheel.register(periodic.clone());
    wheel.register(one_shot.clone());

    periodic.arm(1, None);
    one_shot.arm(1, Some(0));

    for _ in 0..4 {
        wheel.tick().unwrap();
        kernel.run_until_idle();
    }

    // periodic fires on ticks 1 and 4, the one-shot only on tick 1
    let events = probe.events.lock().unwrap();
    assert_eq!(events.as_slice(), &[Signal(6), Signal(7), Signal(6)]);
    assert!(periodic.is_armed());
    assert!(!one_shot.is_armed());
}

fn kernel_with_time_counter(ctr_size: u8) -> Kernel {
    let config = KernelConfig::builder().counter_sizes(4, ctr_size).build();
    Kernel::with_config(config)
        .register(new_active_object(1, 4, Collector::default()))
        .build()
        .unwrap()
}

#[test]
fn wheel_limit_follows_time_counter_size() {
    for (ctr_size, limit) in [(1, 255), (2, 65_535), (4, u32::MAX)] {
        let kernel = kernel_with_time_counter(ctr_size);
        let wheel = TimerWheel::new(kernel.handle(), 0).unwrap();
        assert_eq!(wheel.max_ticks(), limit);
    }

    let kernel = kernel_with_time_counter(1);
    let wheel = TimerWheel::new(kernel.handle(), 0).unwrap();
    let time_evt = TimeEvent::new(1, TimeEventConfig::new(Signal(1)));
    wheel.register(time_evt.clone());
    time_evt.arm(255, Some(255));
    assert_eq!(time_evt.remaining(), 255);
}

#[test]
#[should_panic(expected = "exceeds the counter limit 255")]
fn arming_beyond_time_counter_is_fatal() {
    let kernel = kernel_with_time_counter(1);
    let wheel = TimerWheel::new(kernel.handle(), 0).unwrap();
    let time_evt = TimeEvent::new(1, TimeEventConfig::new(Signal(1)));
    wheel.register(time_evt.clone());
    time_evt.arm(100_000, None);
}

#[test]
#[should_panic(expected = "exceeds the counter limit 65535")]
fn registering_an_oversized_event_is_fatal() {
    let kernel = kernel_with_time_counter(2);
    let wheel = TimerWheel::new(kernel.handle(), 0).unwrap();
    let time_evt = TimeEvent::new(1, TimeEventConfig::new(Signal(1)));
    time_evt.arm(70_000, None);
    wheel.register(time_evt);
}

#[test]
fn disarm_and_rearm_report_previous_state() {
    let (kernel, probe) = kernel_with_collector();
    let wheel = TimerWheel::new(kernel.handle(), 0).unwrap();
    let time_evt = TimeEvent::new(1, TimeEventConfig::new(Signal(8)));
    wheel.register(time_evt.clone());

    assert!(!time_evt.disarm());
    assert!(!time_evt.rearm(4));
    assert!(time_evt.rearm(2));
    assert_eq!(time_evt.remaining(), 2);
    assert!(time_evt.disarm());
    assert_eq!(time_evt.remaining(), 0);

    wheel.tick().unwrap();
    wheel.tick().unwrap();
    kernel.run_until_idle();
    assert!(probe.events.lock().unwrap().is_empty());
}

#[test]
#[should_panic(expected = "zero ticks")]
fn arming_with_zero_ticks_is_rejected() {
    let time_evt = TimeEvent::new(1, TimeEventConfig::new(Signal(1)));
    time_evt.arm(0, None);
}

#[test]
fn tick_rate_must_be_configured() {
    let (kernel, _) = kernel_with_collector();
    let err = TimerWheel::new(kernel.handle(), 2).err().unwrap();
    assert!(matches!(
        err,
        TimeEventError::Kernel(KernelError::TickRateOutOfRange { rate: 2, max: 2 })
    ));
}

#[test]
fn expiry_to_unregistered_target_is_reported() {
    let (kernel, _) = kernel_with_collector();
    let wheel = TimerWheel::new(kernel.handle(), 0).unwrap();
    let time_evt = TimeEvent::new(9, TimeEventConfig::new(Signal(1)));
    time_evt.arm(1, None);
    wheel.register(time_evt);

    assert!(matches!(
        wheel.tick(),
        Err(TimeEventError::Kernel(KernelError::NotRegistered(9)))
    ));
}

#[test]
fn time_event_records_reach_trace_hook() {
    let seen: Arc<Mutex<Vec<u8>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let hook: TraceHook = Arc::new(move |record: u8, _payload: &[u8], _timestamp: bool| {
        sink.lock().unwrap().push(record);
        Ok(())
    });
    let kernel = Kernel::builder()
        .register(new_active_object(1, 4, Collector::default()))
        .with_trace_hook(hook)
        .build()
        .unwrap();

    let wheel = TimerWheel::new(kernel.handle(), 0).unwrap();
    let time_evt = TimeEvent::new(1, TimeEventConfig::new(Signal(2)));
    wheel.register(time_evt.clone());
    time_evt.arm(1, None);
    wheel.tick().unwrap();
    time_evt.disarm();

    let seen = seen.lock().unwrap();
    assert_eq!(
        seen.as_slice(),
        &[
            records::time_evt::ARM,
            records::time_evt::AUTO_DISARM,
            records::time_evt::POST,
            records::qf::ACTIVE_POST,
            records::time_evt::DISARM_ATTEMPT,
        ]
    );
}
