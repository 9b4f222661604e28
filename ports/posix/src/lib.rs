//! POSIX host port for the QV kernel.
//!
//! A host process is not the deterministic target the kernel was sized for:
//! threads get preempted, ticks jitter, and producers run truly in parallel.
//! This crate collects the adjustments that make the same application run
//! there:
//!
//! - every event pool is inflated by [`HOST_OVERSIZE_FACTOR`];
//! - clock ticks come from a dedicated [`Ticker`] thread;
//! - [`PosixRuntime`] wires startup and cleanup hooks, the ticker and Ctrl-C
//!   around [`qv::Kernel::run`].

use std::sync::Arc;

use thiserror::Error;

use qv::kernel::{Kernel, KernelBuilder, KernelConfig, KernelConfigBuilder, KernelError};
use qv::{TimeEventError, TraceHook};

pub mod runtime;
pub mod time;

pub use runtime::{tick_first_rate, ClockTickHook, PosixRuntime};
pub use time::{ClockTick, Ticker};

/// Factor applied to every declared event pool capacity on the host.
pub const HOST_OVERSIZE_FACTOR: usize = 100;

/// Number of clock tick rates the host port services.
pub const HOST_TICK_RATES: u8 = 2;

#[derive(Error, Debug)]
pub enum PosixError {
    #[error("tick rate {0} Hz outside 1..=10000")]
    InvalidTickRate(u32),
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("time event error: {0}")]
    TimeEvent(#[from] TimeEventError),
    #[error("failed to install Ctrl-C handler: {0}")]
    CtrlC(#[from] ctrlc::Error),
    #[error("failed to spawn ticker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Kernel configuration for the host: 4-byte counters everywhere, two tick
/// rates and oversized event pools.
pub fn host_config() -> KernelConfigBuilder {
    KernelConfig::builder()
        .name("QV-POSIX")
        .counter_sizes(4, 4)
        .mpool_counter_size(4)
        .max_tick_rate(HOST_TICK_RATES)
        .pool_oversize(HOST_OVERSIZE_FACTOR)
}

/// Host-side defaults applied to a kernel builder.
pub struct PosixPort {
    config: KernelConfig,
    trace: Option<TraceHook>,
}

impl PosixPort {
    pub fn new() -> Self {
        Self {
            config: host_config().build(),
            trace: None,
        }
    }

    /// Starts from `config` but forces the host oversizing factor.
    pub fn with_config(config: KernelConfig) -> Self {
        Self {
            config: KernelConfig {
                pool_oversize: HOST_OVERSIZE_FACTOR,
                ..config
            },
            trace: None,
        }
    }

    /// Routes kernel trace records to the `log` facade at trace level.
    pub fn with_log_trace(mut self) -> Self {
        self.trace = Some(log_trace_hook());
        self
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn trace_hook(&self) -> Option<TraceHook> {
        self.trace.clone()
    }

    /// Kernel builder carrying the host configuration.
    pub fn builder(&self) -> KernelBuilder {
        let builder = Kernel::with_config(self.config.clone());
        match &self.trace {
            Some(hook) => builder.with_trace_hook(Arc::clone(hook)),
            None => builder,
        }
    }
}

impl Default for PosixPort {
    fn default() -> Self {
        Self::new()
    }
}

/// Trace hook printing each record as `record: payload` in hex.
pub fn log_trace_hook() -> TraceHook {
    Arc::new(|record: u8, payload: &[u8], _timestamp: bool| {
        log::trace!(target: "qv::trace", "{record:3}: {payload:02x?}");
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_config_oversizes_pools() {
        let config = host_config().build();
        assert_eq!(config.pool_oversize, HOST_OVERSIZE_FACTOR);
        assert_eq!(config.max_tick_rate, 2);
        assert_eq!(config.event_queue_ctr_size, 4);
        assert_eq!(config.mpool_ctr_size, 4);
    }

    #[test]
    fn port_forces_factor_on_custom_config() {
        let port = PosixPort::with_config(KernelConfig::builder().name("custom").build());
        assert_eq!(port.config().name, "custom");
        assert_eq!(port.config().pool_oversize, HOST_OVERSIZE_FACTOR);
    }

    #[test]
    fn declared_pool_is_inflated_exactly_once() {
        let port = PosixPort::new().with_log_trace();
        assert!(port.trace_hook().is_some());

        let kernel = port.builder().event_pool(10, 64).build().unwrap();
        let stats = kernel.pool_stats(1).unwrap();
        assert_eq!(stats.total_blocks, 1000);
    }
}
