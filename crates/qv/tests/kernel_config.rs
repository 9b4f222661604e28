//! Tests for KernelConfig builder and build-time validation.

use std::sync::atomic::{AtomicUsize, Ordering};

use qv::kernel::{Kernel, KernelConfig, KernelError};
use qv::{new_active_object, ActiveContext, Signal, SignalHandler};

struct Quiet;

impl SignalHandler for Quiet {
    fn handle_signal(&mut self, _signal: Signal, _ctx: &mut ActiveContext) {}
}

#[test]
fn kernel_config_builder() {
    let config = KernelConfig::builder()
        .name("TestKernel")
        .max_active(32)
        .max_event_pools(5)
        .max_tick_rate(10)
        .counter_sizes(2, 2)
        .mpool_counter_size(1)
        .pool_oversize(100)
        .max_signal(16)
        .version(800)
        .build_info("unit")
        .build();

    assert_eq!(config.name, "TestKernel");
    assert_eq!(config.max_active, 32);
    assert_eq!(config.max_event_pools, 5);
    assert_eq!(config.max_tick_rate, 10);
    assert_eq!(config.event_queue_ctr_size, 2);
    assert_eq!(config.time_event_ctr_size, 2);
    assert_eq!(config.mpool_ctr_size, 1);
    assert_eq!(config.pool_oversize, 100);
    assert_eq!(config.max_signal, 16);
    assert_eq!(config.version, 800);
    assert_eq!(config.build_info, Some("unit"));
}

#[test]
fn kernel_config_default() {
    let config = KernelConfig::default();

    assert_eq!(config.name, "QV");
    assert_eq!(config.max_active, 63);
    assert_eq!(config.max_event_pools, 3);
    assert_eq!(config.max_tick_rate, 2);
    assert_eq!(config.event_queue_ctr_size, 4);
    assert_eq!(config.time_event_ctr_size, 4);
    assert_eq!(config.pool_oversize, 1);
    assert_eq!(config.version, 740);
}

#[test]
fn kernel_with_custom_config() {
    let config = KernelConfig::builder()
        .name("CustomKernel")
        .max_active(8)
        .build();

    let kernel = Kernel::with_config(config).build().unwrap();

    assert_eq!(kernel.config().name, "CustomKernel");
    assert_eq!(kernel.config().max_active, 8);
}

static IDLE_CALLS: AtomicUsize = AtomicUsize::new(0);

fn idle_callback() {
    IDLE_CALLS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn kernel_idle_callback() {
    let config = KernelConfig::builder().idle_callback(idle_callback).build();
    assert!(config.idle_callback.is_some());

    let kernel = Kernel::with_config(config)
        .register(new_active_object(1, 1, Quiet))
        .build()
        .unwrap();
    kernel.run_until_idle();
    kernel.run_until_idle();

    assert_eq!(IDLE_CALLS.load(Ordering::SeqCst), 2);
}

#[test]
fn priorities_are_validated() {
    let config = KernelConfig::builder().max_active(8).build();
    let result = Kernel::with_config(config)
        .register(new_active_object(9, 1, Quiet))
        .build();
    assert!(matches!(
        result,
        Err(KernelError::PriorityOutOfRange { priority: 9, max: 8 })
    ));

    let result = Kernel::builder()
        .register(new_active_object(0, 1, Quiet))
        .build();
    assert!(matches!(
        result,
        Err(KernelError::PriorityOutOfRange { priority: 0, .. })
    ));

    let result = Kernel::builder()
        .register(new_active_object(4, 1, Quiet))
        .register(new_active_object(4, 2, Quiet))
        .build();
    assert!(matches!(result, Err(KernelError::DuplicatePriority(4))));
}

#[test]
fn queue_capacity_is_validated() {
    let result = Kernel::builder()
        .register(new_active_object(1, 0, Quiet))
        .build();
    assert!(matches!(result, Err(KernelError::ZeroQueueCapacity(1))));

    let config = KernelConfig::builder().counter_sizes(1, 1).build();
    let result = Kernel::with_config(config)
        .register(new_active_object(1, 256, Quiet))
        .build();
    assert!(matches!(
        result,
        Err(KernelError::CounterOverflow {
            value: 256,
            ctr_size: 1,
            ..
        })
    ));
}

#[test]
fn limits_are_validated() {
    let too_many = KernelConfig::builder().max_active(64).build();
    assert!(matches!(
        Kernel::with_config(too_many).build(),
        Err(KernelError::InvalidConfig(_))
    ));

    let odd_counter = KernelConfig::builder().counter_sizes(3, 2).build();
    assert!(matches!(
        Kernel::with_config(odd_counter).build(),
        Err(KernelError::InvalidCounterSize(3))
    ));

    let no_oversize = KernelConfig::builder().pool_oversize(0).build();
    assert!(matches!(
        Kernel::with_config(no_oversize).build(),
        Err(KernelError::InvalidConfig(_))
    ));
}

#[test]
fn errors_render_readably() {
    let err = KernelError::DuplicatePriority(4);
    assert_eq!(err.to_string(), "priority 4 registered twice");

    let err = KernelError::SignalOutOfRange(Signal(0x20));
    assert_eq!(err.to_string(), "SIG(0x0020) outside the subscription table");
}
