//! Event and signal primitives.
//!
//! QP models *events* as lightweight messages identified by an integral
//! signal. An event is either *immortal* (created once, never returned
//! anywhere) or drawn from an event pool, in which case it carries a lease on
//! its pool block. Clones share the payload and the lease, so the block goes
//! back to its pool exactly when the last consumer drops its copy.

use core::any::Any;
use core::fmt;
use core::mem;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::mpool::BlockLease;
use crate::sync::Arc;

/// Identifier for a QP signal.
///
/// Signals are globally unique numeric identifiers in a 16-bit range.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signal(pub u16);

impl From<u16> for Signal {
    #[inline]
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIG({:#06x})", self.0)
    }
}

/// Metadata shared by all events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Event signal identifier.
    pub signal: Signal,
    /// Pool the event was obtained from, `None` for immortal events.
    pub pool_id: Option<u8>,
    /// Size used to select the source pool.
    pub size: usize,
}

impl EventHeader {
    pub const fn new(signal: Signal) -> Self {
        Self {
            signal,
            pool_id: None,
            size: mem::size_of::<EventHeader>(),
        }
    }

    /// Size of an event header followed by a `T` payload.
    pub const fn size_for<T>() -> usize {
        mem::size_of::<EventHeader>() + mem::size_of::<T>()
    }

    pub fn with_pool(mut self, pool_id: u8) -> Self {
        self.pool_id = Some(pool_id);
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

/// Concrete event type with a strongly typed payload.
pub struct Event<T = ()> {
    pub header: EventHeader,
    pub payload: T,
    lease: Option<Arc<BlockLease>>,
}

impl<T> Event<T> {
    /// Creates an immortal event.
    pub fn new(signal: Signal, payload: T) -> Self {
        Self {
            header: EventHeader::new(signal).with_size(EventHeader::size_for::<T>()),
            payload,
            lease: None,
        }
    }

    pub(crate) fn pooled(header: EventHeader, payload: T, lease: BlockLease) -> Self {
        Self {
            header,
            payload,
            lease: Some(Arc::new(lease)),
        }
    }

    pub fn signal(&self) -> Signal {
        self.header.signal
    }

    pub fn pool_id(&self) -> Option<u8> {
        self.header.pool_id
    }

    /// Whether the event was drawn from an event pool.
    pub fn is_pooled(&self) -> bool {
        self.lease.is_some()
    }

    /// Number of live references to the pool block, `None` for immortal events.
    pub fn ref_count(&self) -> Option<usize> {
        self.lease.as_ref().map(Arc::strong_count)
    }
}

impl Event<()> {
    pub fn empty(signal: Signal) -> Self {
        Self::new(signal, ())
    }
}

impl<T: Clone> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            header: self.header,
            payload: self.payload.clone(),
            lease: self.lease.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("header", &self.header)
            .field("payload", &self.payload)
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

/// Type-erased event payload suitable for heterogeneous systems.
pub type DynPayload = Arc<dyn Any + Send + Sync>;

/// Event envelope used by the kernel to deliver events to active objects.
pub type DynEvent = Event<DynPayload>;

impl Event<DynPayload> {
    pub fn with_arc(signal: Signal, payload: DynPayload) -> Self {
        Self::new(signal, payload)
    }

    /// Immortal event without payload, typically a time event or a
    /// process-wide constant signal.
    pub fn immortal(signal: Signal) -> Self {
        let payload: DynPayload = Arc::new(()) as DynPayload;
        Self::with_arc(signal, payload)
    }

    /// Borrows the payload as `P` if that is its concrete type.
    pub fn payload_ref<P: Any>(&self) -> Option<&P> {
        self.payload.downcast_ref::<P>()
    }
}
