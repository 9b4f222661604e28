//! Cooperative QV kernel and scheduling services.
//!
//! The kernel owns everything producers touch: the ready set, one event queue
//! per registered priority, the event pools and the subscriber table. All of
//! it sits behind a single [`CriticalSection`]; state-machine code never runs
//! inside it.
//!
//! [`Kernel`] drives the scheduler loop and must be driven from exactly one
//! thread. [`KernelHandle`] is the cheap, clonable producer side handed to
//! host threads and, through [`ActiveContext`], to active objects.

use core::any::Any;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use thiserror::Error;

use crate::active::{ActiveContext, ActiveObjectRef};
use crate::crit::CriticalSection;
use crate::equeue::{Enqueued, EventQueue, QueueStats};
use crate::event::{DynEvent, DynPayload, EventHeader, Signal};
use crate::mpool::{BlockId, BlockLease, BlockRecycler, EventPool, PoolSet, PoolStats};
use crate::pset::{ReadySet, MAX_ACTIVE};
use crate::signal::HostSignal;
use crate::sync::{Arc, Weak};
use crate::trace::{self, records, TraceError, TraceHook};

/// Observable phase of the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    /// Nothing ready; the loop is (about to be) blocked on the host signal.
    Idle = 0,
    /// Looking for the highest-priority ready object.
    Selecting = 1,
    /// An event is being processed run-to-completion.
    Dispatching = 2,
    /// Shutdown requested; no new selection begins.
    Draining = 3,
}

impl SchedulerState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Selecting,
            2 => Self::Dispatching,
            3 => Self::Draining,
            _ => Self::Idle,
        }
    }
}

/// Configuration for the QV kernel.
///
/// Sizing limits are checked once, by [`KernelBuilder::build`].
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub name: &'static str,
    pub max_active: u8,
    pub max_event_pools: u8,
    pub max_tick_rate: u8,
    /// Size in bytes of event queue counters (1, 2 or 4).
    pub event_queue_ctr_size: u8,
    /// Size in bytes of time event counters (1, 2 or 4).
    pub time_event_ctr_size: u8,
    /// Size in bytes of event pool counters (1, 2 or 4).
    pub mpool_ctr_size: u8,
    /// Multiplier applied to every event pool capacity when it is created.
    pub pool_oversize: usize,
    /// Number of signals the publish-subscribe table can hold.
    pub max_signal: u16,
    pub idle_callback: Option<fn()>,
    pub version: u16,
    pub build_info: Option<&'static str>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "QV",
            max_active: MAX_ACTIVE,
            max_event_pools: 3,
            max_tick_rate: 2,
            event_queue_ctr_size: 4,
            time_event_ctr_size: 4,
            mpool_ctr_size: 4,
            pool_oversize: 1,
            max_signal: 64,
            idle_callback: None,
            version: 740,
            build_info: None,
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }
}

/// Builder for ergonomic kernel configuration construction.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the kernel name.
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the maximum number of active objects.
    pub fn max_active(mut self, max: u8) -> Self {
        self.config.max_active = max;
        self
    }

    /// Sets the maximum number of event pools.
    pub fn max_event_pools(mut self, max: u8) -> Self {
        self.config.max_event_pools = max;
        self
    }

    /// Sets the number of clock tick rates.
    pub fn max_tick_rate(mut self, max: u8) -> Self {
        self.config.max_tick_rate = max;
        self
    }

    /// Sets the counter sizes for event queues and time events.
    ///
    /// # Parameters
    /// - `queue`: Size in bytes for event queue counters (1, 2, or 4)
    /// - `time`: Size in bytes for time event counters (1, 2, or 4)
    pub fn counter_sizes(mut self, queue: u8, time: u8) -> Self {
        self.config.event_queue_ctr_size = queue;
        self.config.time_event_ctr_size = time;
        self
    }

    /// Sets the size in bytes of event pool counters (1, 2, or 4).
    pub fn mpool_counter_size(mut self, size: u8) -> Self {
        self.config.mpool_ctr_size = size;
        self
    }

    /// Sets the factor every declared pool capacity is multiplied by.
    pub fn pool_oversize(mut self, factor: usize) -> Self {
        self.config.pool_oversize = factor;
        self
    }

    /// Sets the size of the publish-subscribe table.
    pub fn max_signal(mut self, max: u16) -> Self {
        self.config.max_signal = max;
        self
    }

    /// Sets the idle callback function.
    pub fn idle_callback(mut self, callback: fn()) -> Self {
        self.config.idle_callback = Some(callback);
        self
    }

    /// Sets the version number.
    pub fn version(mut self, version: u16) -> Self {
        self.config.version = version;
        self
    }

    /// Sets build information string.
    pub fn build_info(mut self, info: &'static str) -> Self {
        self.config.build_info = Some(info);
        self
    }

    /// Builds the kernel configuration.
    pub fn build(self) -> KernelConfig {
        self.config
    }
}

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("priority {priority} outside 1..={max}")]
    PriorityOutOfRange { priority: u8, max: u8 },
    #[error("priority {0} registered twice")]
    DuplicatePriority(u8),
    #[error("active object at priority {0} has a zero-capacity queue")]
    ZeroQueueCapacity(u8),
    #[error("event pool {0} has no blocks or zero-sized blocks")]
    EmptyPool(u8),
    #[error("event pool {pool} with {block_size}-byte blocks breaks increasing block-size order")]
    PoolOrder { pool: u8, block_size: usize },
    #[error("{count} event pools exceed the limit of {max}")]
    TooManyPools { count: usize, max: u8 },
    #[error("{what} of {value} does not fit a {ctr_size}-byte counter")]
    CounterOverflow {
        what: &'static str,
        value: usize,
        ctr_size: u8,
    },
    #[error("counter size {0} is not 1, 2 or 4 bytes")]
    InvalidCounterSize(u8),
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("no active object registered at priority {0}")]
    NotRegistered(u8),
    #[error("{0} outside the subscription table")]
    SignalOutOfRange(Signal),
    #[error("tick rate {rate} outside 0..{max}")]
    TickRateOutOfRange { rate: u8, max: u8 },
    #[error("trace error: {0}")]
    Trace(#[from] TraceError),
}

/// Outcome of a margin-checked post.
#[derive(Debug)]
pub enum Delivery {
    Delivered,
    /// The queue did not have enough free slots; the event is handed back.
    Refused(DynEvent),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

#[derive(Clone, Copy)]
enum PostMode {
    Fifo,
    Lifo,
    Margin(usize),
}

/// Everything guarded by the critical section.
struct KernelState {
    ready: ReadySet,
    /// Indexed by priority; slot 0 is never used.
    queues: Vec<Option<EventQueue<DynEvent>>>,
    pools: PoolSet,
    /// Indexed by signal.
    subscribers: Vec<ReadySet>,
}

impl KernelState {
    fn queue(&self, prio: u8) -> Option<&EventQueue<DynEvent>> {
        self.queues.get(prio as usize).and_then(Option::as_ref)
    }

    fn queue_mut(&mut self, prio: u8) -> Option<&mut EventQueue<DynEvent>> {
        self.queues.get_mut(prio as usize).and_then(Option::as_mut)
    }

    fn is_registered(&self, prio: u8) -> bool {
        self.queue(prio).is_some()
    }
}

struct Shared {
    gate: CriticalSection<KernelState>,
    signal: Arc<dyn HostSignal>,
    stop: AtomicBool,
    config: KernelConfig,
    trace: Option<TraceHook>,
}

impl Shared {
    /// Enqueues under the gate and hands back an event the queue refused.
    /// A refused event is only dropped by the caller, outside the gate.
    fn enqueue(
        &self,
        target: u8,
        event: DynEvent,
        mode: PostMode,
    ) -> Result<Option<DynEvent>, KernelError> {
        let signal = event.signal();
        let outcome = {
            let mut state = self.gate.enter();
            let Some(queue) = state.queue_mut(target) else {
                return Err(KernelError::NotRegistered(target));
            };
            let pushed = match mode {
                PostMode::Fifo => queue.try_push(event),
                PostMode::Lifo => queue.try_push_lifo(event),
                PostMode::Margin(margin) => queue.try_push_margin(event, margin),
            };
            match pushed {
                Ok(transition) => {
                    if transition == Enqueued::First {
                        state.ready.insert(target);
                    }
                    self.signal.signal();
                    Ok(())
                }
                Err(rejected) => Err(rejected),
            }
        };

        let [lo, hi] = signal.0.to_le_bytes();
        match outcome {
            Ok(()) => {
                let record = match mode {
                    PostMode::Lifo => records::qf::ACTIVE_POST_LIFO,
                    _ => records::qf::ACTIVE_POST,
                };
                trace::emit(self.trace.as_ref(), record, &[target, lo, hi], true);
                Ok(None)
            }
            Err(rejected) => {
                trace::emit(
                    self.trace.as_ref(),
                    records::qf::ACTIVE_POST_ATTEMPT,
                    &[target, lo, hi],
                    true,
                );
                Ok(Some(rejected))
            }
        }
    }
}

impl BlockRecycler for Shared {
    fn recycle(&self, pool_id: u8, block: BlockId) {
        self.gate.with(|state| state.pools.put(pool_id, block));
    }
}

/// Producer-side handle to a kernel.
#[derive(Clone)]
pub struct KernelHandle {
    shared: Arc<Shared>,
}

impl KernelHandle {
    /// Posts `event` FIFO to the object at priority `target`.
    ///
    /// A full queue is fatal: queue capacities are part of the design.
    pub fn post(&self, target: u8, event: DynEvent) -> Result<(), KernelError> {
        if let Some(rejected) = self.shared.enqueue(target, event, PostMode::Fifo)? {
            drop(rejected);
            fatal!("event queue of priority {target} overflowed");
        }
        Ok(())
    }

    /// Posts `event` only if more than `margin` queue slots stay free.
    pub fn post_margin(
        &self,
        target: u8,
        event: DynEvent,
        margin: usize,
    ) -> Result<Delivery, KernelError> {
        match self.shared.enqueue(target, event, PostMode::Margin(margin))? {
            None => Ok(Delivery::Delivered),
            Some(rejected) => Ok(Delivery::Refused(rejected)),
        }
    }

    /// Posts `event` to the front of the target queue.
    pub fn post_lifo(&self, target: u8, event: DynEvent) -> Result<(), KernelError> {
        if let Some(rejected) = self.shared.enqueue(target, event, PostMode::Lifo)? {
            drop(rejected);
            fatal!("event queue of priority {target} overflowed on LIFO post");
        }
        Ok(())
    }

    /// Delivers `event` to every subscriber of its signal, highest priority
    /// first. All subscribers share the same event.
    pub fn publish(&self, event: DynEvent) -> Result<(), KernelError> {
        let signal = event.signal();
        let subscribers = {
            let state = self.shared.gate.enter();
            match state.subscribers.get(signal.0 as usize) {
                Some(set) => *set,
                None => return Err(KernelError::SignalOutOfRange(signal)),
            }
        };
        for prio in subscribers.iter_desc() {
            self.post(prio, event.clone())?;
        }
        Ok(())
    }

    pub fn subscribe(&self, prio: u8, signal: Signal) -> Result<(), KernelError> {
        self.update_subscription(prio, signal, true)?;
        log::debug!("priority {prio} subscribed to {signal}");
        Ok(())
    }

    pub fn unsubscribe(&self, prio: u8, signal: Signal) -> Result<(), KernelError> {
        self.update_subscription(prio, signal, false)?;
        log::debug!("priority {prio} unsubscribed from {signal}");
        Ok(())
    }

    pub fn unsubscribe_all(&self, prio: u8) -> Result<(), KernelError> {
        let mut state = self.shared.gate.enter();
        if !state.is_registered(prio) {
            return Err(KernelError::NotRegistered(prio));
        }
        for set in state.subscribers.iter_mut() {
            set.remove(prio);
        }
        Ok(())
    }

    /// Allocates a pool event carrying `payload`.
    ///
    /// Running out of blocks, or having no pool large enough, is fatal.
    pub fn new_event<P: Any + Send + Sync>(&self, signal: Signal, payload: P) -> DynEvent {
        match self.allocate(signal, payload, None) {
            Some(event) => event,
            None => fatal!("event allocation for {signal} failed without a margin"),
        }
    }

    /// Allocates a pool event only if more than `margin` blocks stay free.
    pub fn new_event_margin<P: Any + Send + Sync>(
        &self,
        signal: Signal,
        payload: P,
        margin: usize,
    ) -> Option<DynEvent> {
        self.allocate(signal, payload, Some(margin))
    }

    /// Requests shutdown: the loop finishes the current dispatch and returns.
    pub fn stop(&self) {
        if !self.shared.stop.swap(true, Ordering::AcqRel) {
            log::info!("{} kernel stop requested", self.shared.config.name);
        }
        self.shared.signal.signal();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    pub fn queue_stats(&self, prio: u8) -> Option<QueueStats> {
        self.shared.gate.with(|state| state.queue(prio).map(EventQueue::stats))
    }

    /// Statistics of the pool with 1-based identifier `pool_id`.
    pub fn pool_stats(&self, pool_id: u8) -> Option<PoolStats> {
        self.shared
            .gate
            .with(|state| state.pools.pool(pool_id).map(EventPool::stats))
    }

    pub fn pool_count(&self) -> usize {
        self.shared.gate.with(|state| state.pools.len())
    }

    pub fn is_ready(&self, prio: u8) -> bool {
        (1..=MAX_ACTIVE).contains(&prio) && self.shared.gate.with(|state| state.ready.contains(prio))
    }

    /// Snapshot of the ready set.
    pub fn ready_set(&self) -> ReadySet {
        self.shared.gate.with(|state| state.ready)
    }

    pub fn has_pending_work(&self) -> bool {
        self.shared.gate.with(|state| !state.ready.is_empty())
    }

    pub fn config(&self) -> &KernelConfig {
        &self.shared.config
    }

    pub fn trace_hook(&self) -> Option<TraceHook> {
        self.shared.trace.clone()
    }

    fn update_subscription(&self, prio: u8, signal: Signal, add: bool) -> Result<(), KernelError> {
        let mut state = self.shared.gate.enter();
        if !state.is_registered(prio) {
            return Err(KernelError::NotRegistered(prio));
        }
        let Some(set) = state.subscribers.get_mut(signal.0 as usize) else {
            return Err(KernelError::SignalOutOfRange(signal));
        };
        if add {
            set.insert(prio);
        } else {
            set.remove(prio);
        }
        Ok(())
    }

    fn allocate<P: Any + Send + Sync>(
        &self,
        signal: Signal,
        payload: P,
        margin: Option<usize>,
    ) -> Option<DynEvent> {
        let size = EventHeader::size_for::<P>();
        let (pool_id, block) = {
            let mut state = self.shared.gate.enter();
            let selected = state.pools.select(size);
            let Some(pool_id) = selected else {
                drop(state);
                fatal!("no event pool holds events of {size} bytes");
            };
            let taken = state.pools.get(pool_id, margin.unwrap_or(0));
            match taken {
                Some(block) => (pool_id, block),
                None if margin.is_some() => return None,
                None => {
                    drop(state);
                    fatal!("event pool {pool_id} exhausted");
                }
            }
        };

        let recycler: Weak<Shared> = Arc::downgrade(&self.shared);
        let lease = BlockLease::new(pool_id, block, recycler as Weak<dyn BlockRecycler>);
        let header = EventHeader::new(signal).with_pool(pool_id).with_size(size);
        Some(DynEvent::pooled(header, Arc::new(payload) as DynPayload, lease))
    }
}

pub struct KernelBuilder {
    config: KernelConfig,
    objects: Vec<ActiveObjectRef>,
    pools: Vec<(usize, usize)>,
    signal: Option<Arc<dyn HostSignal>>,
    trace: Option<TraceHook>,
}

impl KernelBuilder {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            objects: Vec::new(),
            pools: Vec::new(),
            signal: None,
            trace: None,
        }
    }

    pub fn register(mut self, object: ActiveObjectRef) -> Self {
        self.objects.push(object);
        self
    }

    /// Declares an event pool of `n_blocks` blocks of `block_size` bytes.
    /// The configured oversizing factor is applied at build time.
    pub fn event_pool(mut self, n_blocks: usize, block_size: usize) -> Self {
        self.pools.push((n_blocks, block_size));
        self
    }

    /// Replaces the default [`crate::LatchedSignal`] wake-up bridge.
    pub fn with_signal(mut self, signal: Arc<dyn HostSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn build(self) -> Result<Kernel, KernelError> {
        let config = self.config;
        if config.max_active == 0 || config.max_active > MAX_ACTIVE {
            return Err(KernelError::InvalidConfig("max_active must be within 1..=63"));
        }
        if config.max_tick_rate == 0 {
            return Err(KernelError::InvalidConfig("at least one tick rate is required"));
        }
        if config.pool_oversize == 0 {
            return Err(KernelError::InvalidConfig("pool oversizing factor must be at least 1"));
        }
        counter_limit(config.time_event_ctr_size)?;
        let queue_limit = counter_limit(config.event_queue_ctr_size)?;
        let pool_limit = counter_limit(config.mpool_ctr_size)?;

        let mut queues: Vec<Option<EventQueue<DynEvent>>> =
            (0..=MAX_ACTIVE).map(|_| None).collect();
        let mut objects: Vec<Option<ActiveObjectRef>> = (0..=MAX_ACTIVE).map(|_| None).collect();
        for object in self.objects {
            let prio = object.priority();
            if prio == 0 || prio > config.max_active {
                return Err(KernelError::PriorityOutOfRange {
                    priority: prio,
                    max: config.max_active,
                });
            }
            if queues[prio as usize].is_some() {
                return Err(KernelError::DuplicatePriority(prio));
            }
            let capacity = object.queue_capacity();
            if capacity == 0 {
                return Err(KernelError::ZeroQueueCapacity(prio));
            }
            if capacity > queue_limit {
                return Err(KernelError::CounterOverflow {
                    what: "event queue capacity",
                    value: capacity,
                    ctr_size: config.event_queue_ctr_size,
                });
            }
            log::debug!("registered active object at priority {prio}, queue capacity {capacity}");
            queues[prio as usize] = Some(EventQueue::new(capacity));
            objects[prio as usize] = Some(object);
        }

        if self.pools.len() > config.max_event_pools as usize {
            return Err(KernelError::TooManyPools {
                count: self.pools.len(),
                max: config.max_event_pools,
            });
        }
        let mut pools = PoolSet::new();
        let mut last_block_size = 0;
        for (index, (n_blocks, block_size)) in self.pools.into_iter().enumerate() {
            let pool = index as u8 + 1;
            if n_blocks == 0 || block_size == 0 {
                return Err(KernelError::EmptyPool(pool));
            }
            if block_size <= last_block_size {
                return Err(KernelError::PoolOrder { pool, block_size });
            }
            // the only place the oversizing factor is applied
            let total = n_blocks
                .checked_mul(config.pool_oversize)
                .filter(|total| *total <= pool_limit)
                .ok_or(KernelError::CounterOverflow {
                    what: "event pool capacity",
                    value: n_blocks.saturating_mul(config.pool_oversize),
                    ctr_size: config.mpool_ctr_size,
                })?;
            pools.push(EventPool::new(total, block_size));
            log::info!("event pool {pool}: {total} blocks of {block_size} bytes");
            last_block_size = block_size;
        }

        let signal = match self.signal {
            Some(signal) => signal,
            None => default_signal()?,
        };
        let state = KernelState {
            ready: ReadySet::new(),
            queues,
            pools,
            subscribers: vec![ReadySet::new(); config.max_signal as usize],
        };
        let shared = Arc::new(Shared {
            gate: CriticalSection::new(state),
            signal,
            stop: AtomicBool::new(false),
            config,
            trace: self.trace,
        });
        Ok(Kernel::new(shared, objects))
    }
}

pub(crate) fn counter_limit(ctr_size: u8) -> Result<usize, KernelError> {
    match ctr_size {
        1 => Ok(u8::MAX as usize),
        2 => Ok(u16::MAX as usize),
        4 => Ok(u32::MAX as usize),
        other => Err(KernelError::InvalidCounterSize(other)),
    }
}

#[cfg(feature = "std")]
fn default_signal() -> Result<Arc<dyn HostSignal>, KernelError> {
    Ok(Arc::new(crate::signal::LatchedSignal::new()))
}

#[cfg(not(feature = "std"))]
fn default_signal() -> Result<Arc<dyn HostSignal>, KernelError> {
    Err(KernelError::InvalidConfig("a host signal is required without the std feature"))
}

/// Releases the dispatch slot, also when a handler panics.
struct DispatchSlot<'a>(&'a AtomicBool);

impl<'a> DispatchSlot<'a> {
    fn claim(flag: &'a AtomicBool) -> Self {
        if flag.swap(true, Ordering::AcqRel) {
            fatal!("kernel dispatch entered while another dispatch is in progress");
        }
        Self(flag)
    }
}

impl Drop for DispatchSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Kernel {
    handle: KernelHandle,
    /// Indexed by priority, like the queues.
    objects: Vec<Option<ActiveObjectRef>>,
    state: AtomicU8,
    dispatching: AtomicBool,
    prev_prio: AtomicU8,
    started: AtomicBool,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> KernelBuilder {
        KernelBuilder::new(config)
    }

    pub fn handle(&self) -> KernelHandle {
        self.handle.clone()
    }

    /// Returns the kernel configuration.
    pub fn config(&self) -> &KernelConfig {
        self.handle.config()
    }

    pub fn post(&self, target: u8, event: DynEvent) -> Result<(), KernelError> {
        self.handle.post(target, event)
    }

    pub fn publish(&self, event: DynEvent) -> Result<(), KernelError> {
        self.handle.publish(event)
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        if self.handle.is_stop_requested() {
            SchedulerState::Draining
        } else {
            SchedulerState::from_raw(self.state.load(Ordering::Acquire))
        }
    }

    /// Calls `on_start` of every registered object, lowest priority first.
    /// Only the first call has an effect.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        for object in self.objects.iter().flatten() {
            let mut ctx = self.context(object.priority());
            object.start(&mut ctx);
        }
        let config = self.config();
        match config.build_info {
            Some(info) => log::info!("{} kernel v{} ({info}) started", config.name, config.version),
            None => log::info!("{} kernel v{} started", config.name, config.version),
        }
    }

    /// Dispatches the single highest-priority pending event.
    ///
    /// Returns `false` if nothing was ready.
    pub fn dispatch_once(&self) -> bool {
        let _slot = DispatchSlot::claim(&self.dispatching);
        self.set_state(SchedulerState::Selecting);

        let next = {
            let mut state = self.handle.shared.gate.enter();
            match state.ready.find_max() {
                None => None,
                Some(prio) => {
                    let popped = state.queue_mut(prio).and_then(EventQueue::pop);
                    let Some(event) = popped else {
                        drop(state);
                        fatal!("ready-set bit {prio} set but its queue is empty");
                    };
                    let last = state.queue(prio).map_or(true, EventQueue::is_empty);
                    if last {
                        state.ready.remove(prio);
                    }
                    Some((prio, event, last))
                }
            }
        };

        let Some((prio, event, last)) = next else {
            self.note_idle();
            return false;
        };

        self.note_next(prio);
        let [lo, hi] = event.signal().0.to_le_bytes();
        let record = if last {
            records::qf::ACTIVE_GET_LAST
        } else {
            records::qf::ACTIVE_GET
        };
        trace::emit(self.handle.shared.trace.as_ref(), record, &[prio, lo, hi], true);

        let Some(object) = self.objects.get(prio as usize).and_then(Option::as_ref) else {
            fatal!("event queued for priority {prio} with no active object");
        };
        self.set_state(SchedulerState::Dispatching);
        let mut ctx = self.context(prio);
        object.dispatch(&mut ctx, event);
        self.set_state(SchedulerState::Selecting);
        true
    }

    /// Dispatches until nothing is ready or a stop is requested, then runs
    /// the idle callback once.
    pub fn run_until_idle(&self) {
        while !self.handle.is_stop_requested() && self.dispatch_once() {}
        self.set_state(SchedulerState::Idle);
        if let Some(idle_cb) = self.config().idle_callback {
            idle_cb();
        }
    }

    /// Runs the scheduler loop until [`KernelHandle::stop`] is called.
    pub fn run(&self) {
        self.start();
        let signal = Arc::clone(&self.handle.shared.signal);
        loop {
            if self.handle.is_stop_requested() {
                break;
            }
            if self.dispatch_once() {
                continue;
            }
            if self.handle.is_stop_requested() {
                break;
            }
            self.set_state(SchedulerState::Idle);
            if let Some(idle_cb) = self.config().idle_callback {
                idle_cb();
            }
            log::trace!("scheduler idle");
            // a post racing with the empty selection above is latched
            signal.wait();
        }
        self.set_state(SchedulerState::Draining);
        log::info!("{} kernel stopped", self.config().name);
    }

    pub fn queue_stats(&self, prio: u8) -> Option<QueueStats> {
        self.handle.queue_stats(prio)
    }

    pub fn pool_stats(&self, pool_id: u8) -> Option<PoolStats> {
        self.handle.pool_stats(pool_id)
    }

    pub fn is_ready(&self, prio: u8) -> bool {
        self.handle.is_ready(prio)
    }

    pub fn has_pending_work(&self) -> bool {
        self.handle.has_pending_work()
    }

    pub fn trace_hook(&self) -> Option<TraceHook> {
        self.handle.trace_hook()
    }
}

impl Kernel {
    fn new(shared: Arc<Shared>, objects: Vec<Option<ActiveObjectRef>>) -> Self {
        Self {
            handle: KernelHandle { shared },
            objects,
            state: AtomicU8::new(SchedulerState::Idle as u8),
            dispatching: AtomicBool::new(false),
            prev_prio: AtomicU8::new(0),
            started: AtomicBool::new(false),
        }
    }

    fn context(&self, prio: u8) -> ActiveContext {
        ActiveContext::new(prio, self.handle(), self.handle.trace_hook())
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn note_next(&self, prio: u8) {
        let prev = self.prev_prio.swap(prio, Ordering::AcqRel);
        if prev != prio {
            trace::emit(
                self.handle.shared.trace.as_ref(),
                records::sched::NEXT,
                &[prio, prev],
                true,
            );
        }
    }

    fn note_idle(&self) {
        let prev = self.prev_prio.swap(0, Ordering::AcqRel);
        if prev != 0 {
            trace::emit(
                self.handle.shared.trace.as_ref(),
                records::sched::IDLE,
                &[prev],
                true,
            );
        }
    }
}
