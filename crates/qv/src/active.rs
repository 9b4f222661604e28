//! Active object abstraction.
//!
//! An active object couples a state machine ([`ActiveBehavior`]) with a unique
//! priority and an event queue of fixed capacity. The queue itself lives in
//! the kernel, behind the critical section; the object only describes how big
//! it must be and how to process one event.

use core::any::Any;

use crate::event::{DynEvent, Signal};
use crate::kernel::{KernelError, KernelHandle};
use crate::sync::{Arc, Mutex};
use crate::trace::{TraceError, TraceHook};

/// Per-dispatch context passed to state handlers.
pub struct ActiveContext {
    priority: u8,
    kernel: KernelHandle,
    trace: Option<TraceHook>,
}

impl ActiveContext {
    pub fn new(priority: u8, kernel: KernelHandle, trace: Option<TraceHook>) -> Self {
        Self {
            priority,
            kernel,
            trace,
        }
    }

    /// Priority of the active object being dispatched.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn kernel(&self) -> &KernelHandle {
        &self.kernel
    }

    pub fn post(&self, target: u8, event: DynEvent) -> Result<(), KernelError> {
        self.kernel.post(target, event)
    }

    /// Posts to the object being dispatched, ahead of everything queued.
    pub fn post_self_lifo(&self, event: DynEvent) -> Result<(), KernelError> {
        self.kernel.post_lifo(self.priority, event)
    }

    pub fn publish(&self, event: DynEvent) -> Result<(), KernelError> {
        self.kernel.publish(event)
    }

    pub fn new_event<P: Any + Send + Sync>(&self, signal: Signal, payload: P) -> DynEvent {
        self.kernel.new_event(signal, payload)
    }

    pub fn subscribe(&self, signal: Signal) -> Result<(), KernelError> {
        self.kernel.subscribe(self.priority, signal)
    }

    pub fn unsubscribe(&self, signal: Signal) -> Result<(), KernelError> {
        self.kernel.unsubscribe(self.priority, signal)
    }

    pub fn emit_trace(&self, record_type: u8, payload: &[u8]) -> Result<(), TraceError> {
        self.emit_trace_with_timestamp(record_type, payload, true)
    }

    pub fn emit_trace_with_timestamp(
        &self,
        record_type: u8,
        payload: &[u8],
        with_timestamp: bool,
    ) -> Result<(), TraceError> {
        if let Some(hook) = &self.trace {
            hook(record_type, payload, with_timestamp)
        } else {
            Ok(())
        }
    }

    pub fn trace_hook(&self) -> Option<TraceHook> {
        self.trace.clone()
    }
}

/// Trait implemented by application state machines.
pub trait ActiveBehavior: Send + 'static {
    fn on_start(&mut self, ctx: &mut ActiveContext);
    fn on_event(&mut self, ctx: &mut ActiveContext, event: DynEvent);
}

/// Object-safe interface used by the kernel.
pub trait ActiveRunnable: Send + Sync {
    fn priority(&self) -> u8;
    fn queue_capacity(&self) -> usize;
    fn start(&self, ctx: &mut ActiveContext);
    /// Runs one event to completion.
    fn dispatch(&self, ctx: &mut ActiveContext, event: DynEvent);
}

/// Concrete active object implementation for a specific behavior.
pub struct ActiveObject<B: ActiveBehavior> {
    priority: u8,
    queue_capacity: usize,
    behavior: Mutex<B>,
}

impl<B: ActiveBehavior> ActiveObject<B> {
    pub fn new(priority: u8, queue_capacity: usize, behavior: B) -> Arc<Self> {
        Arc::new(Self {
            priority,
            queue_capacity,
            behavior: Mutex::new(behavior),
        })
    }
}

impl<B: ActiveBehavior> ActiveRunnable for ActiveObject<B> {
    fn priority(&self) -> u8 {
        self.priority
    }

    fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    fn start(&self, ctx: &mut ActiveContext) {
        self.behavior.lock().on_start(ctx);
    }

    fn dispatch(&self, ctx: &mut ActiveContext, event: DynEvent) {
        // uncontended: the kernel runs one dispatch at a time
        self.behavior.lock().on_event(ctx, event);
    }
}

pub type ActiveObjectRef = Arc<dyn ActiveRunnable>;

/// Helper builder for typed active objects.
pub fn new_active_object<B: ActiveBehavior>(
    priority: u8,
    queue_capacity: usize,
    behavior: B,
) -> ActiveObjectRef {
    ActiveObject::new(priority, queue_capacity, behavior) as ActiveObjectRef
}

/// Convenience behavior for state machines that only react to signals.
pub trait SignalHandler: Send + 'static {
    fn on_start(&mut self, _ctx: &mut ActiveContext) {}
    fn handle_signal(&mut self, signal: Signal, ctx: &mut ActiveContext);
}

impl<T: SignalHandler> ActiveBehavior for T {
    fn on_start(&mut self, ctx: &mut ActiveContext) {
        SignalHandler::on_start(self, ctx);
    }

    fn on_event(&mut self, ctx: &mut ActiveContext, event: DynEvent) {
        SignalHandler::handle_signal(self, event.signal(), ctx);
    }
}
