//! # qv
//!
//! A cooperative, priority-based, run-to-completion kernel for active-object
//! applications, written so that software designed for bare-metal QV targets
//! can run unmodified on a general-purpose host operating system.
//!
//! ## Module Overview
//! - [`pset`]   – 64-bit priority ready-set with O(1) highest-priority lookup.
//! - [`equeue`] – Bounded per-object event queues.
//! - [`mpool`]  – Fixed-block event pools with margin-based admission.
//! - [`crit`]   – The single critical section standing in for interrupt masking.
//! - [`signal`] – Latched wake-up bridge between producers and the idle loop.
//! - [`event`]  – Signal and event primitives.
//! - [`active`] – Active object abstraction and dispatch context.
//! - [`kernel`] – Configuration, registration and the cooperative scheduler.
//! - [`time`]   – Time events serviced per tick rate.
//!
//! Everything the kernel mutates on behalf of producers (ready set, queue
//! emptiness, pool free lists, subscriber lists) lives behind one
//! [`crit::CriticalSection`]. State-machine code always runs outside it.

/// Logs the message at error level and halts the current thread of execution.
///
/// Used for the fatal conditions of the kernel: configuration proven wrong at
/// run time (queue overflow, pool exhaustion) and broken internal invariants.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        panic!($($arg)*)
    }};
}

pub mod active;
pub mod crit;
pub mod equeue;
pub mod event;
pub mod kernel;
pub mod mpool;
pub mod pset;
pub mod signal;
pub mod sync;
pub mod time;
pub mod trace;

pub use active::{
    new_active_object, ActiveBehavior, ActiveContext, ActiveObject, ActiveObjectRef,
    ActiveRunnable, SignalHandler,
};
pub use crit::{CriticalGuard, CriticalSection};
pub use equeue::{Enqueued, EventQueue, QueueStats};
pub use event::{DynEvent, DynPayload, Event, EventHeader, Signal};
pub use kernel::{
    Delivery, Kernel, KernelBuilder, KernelConfig, KernelConfigBuilder, KernelError,
    KernelHandle, SchedulerState,
};
pub use mpool::{BlockId, EventPool, PoolSet, PoolStats};
pub use pset::{ReadySet, MAX_ACTIVE};
#[cfg(feature = "std")]
pub use signal::LatchedSignal;
pub use signal::HostSignal;
pub use time::{TimeEvent, TimeEventConfig, TimeEventError, TimerWheel};
pub use trace::{TraceError, TraceHook, TraceResult};

#[cfg(test)]
mod tests;
