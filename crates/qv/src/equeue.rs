//! Bounded event queue owned by one active object.
//!
//! The queue reports the two transitions the kernel cares about: a push into
//! an empty queue ([`Enqueued::First`]) and a pop that leaves it empty
//! ([`EventQueue::is_empty`] afterwards). The kernel pairs each with the
//! matching ready-set update inside the same critical section.
//!
//! Capacity is fixed at construction. A full queue rejects the event and hands
//! it back to the caller; deciding whether that is fatal is the kernel's job.

use std::collections::VecDeque;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Outcome of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// The queue was empty before the push; its owner just became ready.
    First,
    /// The queue already held events.
    Appended,
}

/// Sizing diagnostics for one queue.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub capacity: usize,
    pub used: usize,
    /// Fewest free slots ever observed.
    pub min_free: usize,
}

#[derive(Debug)]
pub struct EventQueue<E> {
    ring: VecDeque<E>,
    capacity: usize,
    min_free: usize,
}

impl<E> EventQueue<E> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "event queue capacity must be non-zero");
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
            min_free: capacity,
        }
    }

    /// Appends `event`, failing only when the queue is full.
    pub fn try_push(&mut self, event: E) -> Result<Enqueued, E> {
        if self.is_full() {
            return Err(event);
        }
        Ok(self.push_with(event, VecDeque::push_back))
    }

    /// Appends `event` only if more than `margin` slots are free.
    pub fn try_push_margin(&mut self, event: E, margin: usize) -> Result<Enqueued, E> {
        if self.n_free() <= margin {
            return Err(event);
        }
        Ok(self.push_with(event, VecDeque::push_back))
    }

    /// Puts `event` at the front so it is dispatched next.
    pub fn try_push_lifo(&mut self, event: E) -> Result<Enqueued, E> {
        if self.is_full() {
            return Err(event);
        }
        Ok(self.push_with(event, VecDeque::push_front))
    }

    pub fn pop(&mut self) -> Option<E> {
        self.ring.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ring.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn n_free(&self) -> usize {
        self.capacity - self.ring.len()
    }

    pub fn min_free(&self) -> usize {
        self.min_free
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.capacity,
            used: self.ring.len(),
            min_free: self.min_free,
        }
    }

    fn push_with(&mut self, event: E, push: fn(&mut VecDeque<E>, E)) -> Enqueued {
        let was_empty = self.ring.is_empty();
        push(&mut self.ring, event);
        self.min_free = self.min_free.min(self.n_free());
        if was_empty {
            Enqueued::First
        } else {
            Enqueued::Appended
        }
    }
}
