//! # Scheduling Heap
//!
//! A fixed-capacity binary min-heap of `(deadline, handle)` pairs, stored
//! as two parallel arrays in implicit 1-based layout (the children of `i`
//! are `2i` and `2i + 1`).
//!
//! ## Ordering
//!
//! Deadlines wrap, so they are never compared as raw integers. Every
//! comparison is made relative to the current tick:
//!
//! ```text
//!   a before b  ⇔  offset(a, now) < offset(b, now)
//! ```
//!
//! As long as every pending deadline lies within half the tick range of
//! `now` (guaranteed by the scheduling horizon), this ordering agrees with
//! the order the deadlines will actually come due, across wraparound.
//!
//! The handle array doubles as the compactor's root set: it is the only
//! place handles are patched when memory moves.

use core::ops::Range;

use crate::arena::Handle;
use crate::error::Error;
use crate::tick::{offset, Tick};

/// An entry removed from the heap because its deadline arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Due {
    pub handle: Handle,
    pub deadline: Tick,
    /// Ticks past the deadline at the time of the pop. Zero when on time.
    pub lateness: Tick,
}

impl Due {
    /// The deadline passed without being serviced in its own quantum.
    #[inline]
    pub fn is_late(&self) -> bool {
        self.lateness > 0
    }
}

/// Wraparound-aware min-heap holding up to `C` scheduled events.
pub struct ScheduleHeap<const C: usize> {
    deadlines: [Tick; C],
    handles: [u8; C],
    len: usize,
}

impl<const C: usize> ScheduleHeap<C> {
    /// An empty heap.
    pub const fn new() -> Self {
        Self {
            deadlines: [0; C],
            handles: [0; C],
            len: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        C
    }

    /// Number of scheduled events.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True once `C` events are scheduled.
    pub fn is_full(&self) -> bool {
        self.len == C
    }

    /// Drop every scheduled event.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Schedule `handle` to come due `relative` ticks after `now`.
    ///
    /// Returns the absolute deadline. Fails with `BeyondHorizon` for a
    /// negative offset and `HeapFull` when at capacity; the heap is left
    /// unchanged in both cases.
    pub fn insert(&mut self, relative: Tick, handle: Handle, now: Tick) -> Result<Tick, Error> {
        if relative < 0 {
            return Err(Error::BeyondHorizon);
        }
        if self.is_full() {
            return Err(Error::HeapFull);
        }

        let deadline = now.wrapping_add(relative);
        self.len += 1;
        let mut idx = self.len;
        while idx > 1 {
            let parent = idx / 2;
            if offset(self.deadline(parent), now) <= relative {
                break;
            }
            self.move_entry(parent, idx);
            idx = parent;
        }
        self.put(idx, deadline, handle.offset() as u8);
        Ok(deadline)
    }

    /// The earliest entry, without removing it.
    pub fn peek(&self) -> Option<(Tick, Handle)> {
        if self.is_empty() {
            return None;
        }
        Some((self.deadline(1), self.handle(1)))
    }

    /// Remove the earliest entry if its deadline is at or before `now`.
    pub fn pop_if_due(&mut self, now: Tick) -> Option<Due> {
        if self.is_empty() {
            return None;
        }
        let deadline = self.deadline(1);
        let lateness = offset(now, deadline);
        if lateness < 0 {
            return None;
        }
        let handle = self.handle(1);

        let last = self.len;
        let (last_deadline, last_handle) = (self.deadline(last), self.handles[last - 1]);
        self.len -= 1;

        if self.len > 0 {
            let last_offset = offset(last_deadline, now);
            let mut idx = 1;
            loop {
                let mut child = idx * 2;
                if child > self.len {
                    break;
                }
                if child < self.len
                    && offset(self.deadline(child + 1), now) < offset(self.deadline(child), now)
                {
                    child += 1;
                }
                if last_offset <= offset(self.deadline(child), now) {
                    break;
                }
                self.move_entry(child, idx);
                idx = child;
            }
            self.put(idx, last_deadline, last_handle);
        }

        Some(Due {
            handle,
            deadline,
            lateness,
        })
    }

    /// Add `shift` to every handle inside `span`. Returns how many moved.
    pub fn relocate(&mut self, span: Range<usize>, shift: usize) -> usize {
        let mut patched = 0;
        for handle in &mut self.handles[..self.len] {
            if span.contains(&(*handle as usize)) {
                *handle = (*handle as usize + shift) as u8;
                patched += 1;
            }
        }
        patched
    }

    /// Entries in storage order (not deadline order).
    pub fn iter(&self) -> impl Iterator<Item = (Tick, Handle)> + '_ {
        self.deadlines[..self.len]
            .iter()
            .zip(&self.handles[..self.len])
            .map(|(&deadline, &handle)| (deadline, Handle::from_offset(handle as usize)))
    }

    /// Whether `handle` is scheduled.
    pub fn contains(&self, handle: Handle) -> bool {
        self.iter().any(|(_, h)| h == handle)
    }

    // 1-based accessors over the 0-based arrays.

    #[inline]
    fn deadline(&self, idx: usize) -> Tick {
        self.deadlines[idx - 1]
    }

    #[inline]
    fn handle(&self, idx: usize) -> Handle {
        Handle::from_offset(self.handles[idx - 1] as usize)
    }

    #[inline]
    fn put(&mut self, idx: usize, deadline: Tick, handle: u8) {
        self.deadlines[idx - 1] = deadline;
        self.handles[idx - 1] = handle;
    }

    #[inline]
    fn move_entry(&mut self, from: usize, to: usize) {
        self.deadlines[to - 1] = self.deadlines[from - 1];
        self.handles[to - 1] = self.handles[from - 1];
    }

    /// Heap property relative to `now`.
    #[cfg(test)]
    pub(crate) fn is_ordered(&self, now: Tick) -> bool {
        (2..=self.len).all(|i| offset(self.deadline(i / 2), now) <= offset(self.deadline(i), now))
    }
}

impl<const C: usize> Default for ScheduleHeap<C> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
