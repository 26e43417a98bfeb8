//! # Stability Tracking (debug builds)
//!
//! An event is *unstable* between being allocated (or popped for dispatch)
//! and being scheduled or freed. The compactor cannot see such handles, so
//! if it moves memory while one is outstanding the handle silently starts
//! pointing at someone else's bytes.
//!
//! The tracker remembers each unstable handle together with the arena's
//! compaction epoch at the moment it became unstable. Any later access
//! through a handle whose epoch is out of date is reported as
//! [`Error::StaleHandle`].
//!
//! Capacity is fixed. When the table is full new handles simply go
//! untracked; the check is best-effort instrumentation, not a guarantee.

use heapless::Vec;

use crate::arena::Handle;
use crate::error::Error;

pub struct StabilityTracker<const N: usize> {
    unstable: Vec<(Handle, u32), N>,
}

impl<const N: usize> StabilityTracker<N> {
    pub const fn new() -> Self {
        Self {
            unstable: Vec::new(),
        }
    }

    /// Start tracking `handle`, first observed at compaction `epoch`.
    pub fn mark_unstable(&mut self, handle: Handle, epoch: u32) {
        self.mark_stable(handle);
        if self.unstable.push((handle, epoch)).is_err() {
            trace!("stability: table full, {} untracked", handle.offset());
        }
    }

    /// Stop tracking `handle`.
    pub fn mark_stable(&mut self, handle: Handle) {
        if let Some(pos) = self.unstable.iter().position(|&(h, _)| h == handle) {
            self.unstable.swap_remove(pos);
        }
    }

    /// Fail if `handle` is tracked and memory moved since it was recorded.
    pub fn check(&self, handle: Handle, epoch: u32) -> Result<(), Error> {
        match self.unstable.iter().find(|&&(h, _)| h == handle) {
            Some(&(_, seen)) if seen != epoch => {
                warn!("stability: handle {} used after compaction", handle.offset());
                Err(Error::StaleHandle)
            }
            _ => Ok(()),
        }
    }

    pub fn is_unstable(&self, handle: Handle) -> bool {
        self.unstable.iter().any(|&(h, _)| h == handle)
    }

    pub fn len(&self) -> usize {
        self.unstable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unstable.is_empty()
    }

    pub fn clear(&mut self) {
        self.unstable.clear();
    }
}

impl<const N: usize> Default for StabilityTracker<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn h(offset: usize) -> Handle {
        Handle::from_offset(offset)
    }

    #[test]
    fn test_same_epoch_is_fine() {
        let mut tracker = StabilityTracker::<4>::new();
        tracker.mark_unstable(h(10), 3);
        assert!(tracker.is_unstable(h(10)));
        assert_eq!(tracker.check(h(10), 3), Ok(()));
    }

    #[test]
    fn test_moved_memory_is_stale() {
        let mut tracker = StabilityTracker::<4>::new();
        tracker.mark_unstable(h(10), 3);
        assert_eq!(tracker.check(h(10), 4), Err(Error::StaleHandle));
        // Untracked handles are never reported.
        assert_eq!(tracker.check(h(12), 4), Ok(()));
    }

    #[test]
    fn test_marking_stable_forgets_handle() {
        let mut tracker = StabilityTracker::<4>::new();
        tracker.mark_unstable(h(10), 0);
        tracker.mark_unstable(h(12), 0);
        tracker.mark_stable(h(10));
        assert!(!tracker.is_unstable(h(10)));
        assert_eq!(tracker.check(h(10), 1), Ok(()));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_remarking_refreshes_epoch() {
        let mut tracker = StabilityTracker::<4>::new();
        tracker.mark_unstable(h(10), 0);
        tracker.mark_unstable(h(10), 2);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.check(h(10), 2), Ok(()));
    }

    #[test]
    fn test_full_table_drops_new_handles() {
        let mut tracker = StabilityTracker::<2>::new();
        tracker.mark_unstable(h(2), 0);
        tracker.mark_unstable(h(4), 0);
        tracker.mark_unstable(h(6), 0);
        assert_eq!(tracker.len(), 2);
        assert!(!tracker.is_unstable(h(6)));
        tracker.clear();
        assert!(tracker.is_empty());
    }
}
