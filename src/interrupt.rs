//! # Interrupt Ring
//!
//! A fixed-capacity FIFO of deferred callbacks. Work that arises outside an
//! event callback (a driver noticing something, the heap reporting a missed
//! deadline) is queued here and run at the start of the next quantum, in
//! the dispatch loop's context rather than in the real interrupt.
//!
//! A full ring rejects new entries with [`Error::InterruptQueueFull`]; it
//! never overwrites pending work.

use heapless::Deque;

use crate::error::Error;

/// FIFO of up to `N` pending callbacks.
pub struct InterruptRing<T, const N: usize> {
    pending: Deque<T, N>,
}

impl<T, const N: usize> InterruptRing<T, N> {
    pub const fn new() -> Self {
        Self {
            pending: Deque::new(),
        }
    }

    /// Queue `callback` behind everything already pending.
    pub fn enqueue(&mut self, callback: T) -> Result<(), Error> {
        self.pending
            .push_back(callback)
            .map_err(|_| Error::InterruptQueueFull)
    }

    /// Take the oldest pending callback.
    pub fn pop(&mut self) -> Option<T> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pending.is_full()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl<T, const N: usize> Default for InterruptRing<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
