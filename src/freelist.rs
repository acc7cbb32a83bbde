//! Bounded, lock-free free-list backing every pool's fast tier.
//!
//! The free-list is a thin wrapper around a fixed-capacity ring buffer with
//! non-blocking push and pop. Unlike a channel between a producer and a
//! consumer, a free-list never waits: a full list rejects the push and hands
//! the value back, an empty list reports a miss. The owning pool decides
//! whether a rejected value is dropped or redirected to another tier.

use crossbeam_queue::ArrayQueue;

/// Fixed-capacity lock-free free-list.
///
/// A capacity of zero is valid and produces a list that rejects every push
/// and misses every pop, which is what a pool configured without a fast tier
/// wants.
pub(crate) struct FreeList<T> {
    /// `None` when configured with zero capacity, since the ring buffer
    /// itself requires at least one slot.
    rb: Option<ArrayQueue<T>>,
}

impl<T> FreeList<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            rb: (capacity > 0).then(|| ArrayQueue::new(capacity)),
        }
    }

    /// Attempts to park a value in the list.
    ///
    /// Returns the value back when the list is full so the caller can route
    /// it elsewhere. Completes in a single CAS loop regardless of contention
    /// and never spins waiting for room.
    #[inline(always)]
    pub(crate) fn push(&self, value: T) -> Result<(), T> {
        match &self.rb {
            Some(rb) => rb.push(value),
            None => Err(value),
        }
    }

    #[inline(always)]
    pub(crate) fn pop(&self) -> Option<T> {
        self.rb.as_ref().and_then(ArrayQueue::pop)
    }

    pub(crate) fn len(&self) -> usize {
        self.rb.as_ref().map_or(0, ArrayQueue::len)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.rb.as_ref().map_or(0, ArrayQueue::capacity)
    }
}
