//! # Collector
//!
//! Folds the freshly-freed list back into the canonical free list.
//!
//! `deallocate` only pushes blocks onto an unordered side list, so freeing
//! stays O(1) inside callbacks. Collection runs at idle time and restores
//! the canonical shape:
//!
//! 1. Bubble the freshly-freed list into descending address order, merging
//!    any two entries whose ranges touch, until a pass changes nothing.
//!    The list is expected to be short, so the quadratic pass is fine.
//! 2. Walk both descending lists together, splicing each freed block into
//!    place and coalescing it with a physically-adjacent neighbour on
//!    either side.
//!
//! Afterwards the freshly-freed list is empty and no two canonical blocks
//! are adjacent.

use crate::arena::{Arena, FIRST_BLOCK, FRESH_ROOT, NIL, TOP_ROOT};

impl<const N: usize> Arena<N> {
    /// Sort the freshly-freed list, highest address first, merging
    /// neighbours.
    pub fn sort_freshly_freed(&mut self) {
        loop {
            let mut reordered = false;
            let mut link = FRESH_ROOT;
            let mut current = self.link(FRESH_ROOT);
            if current == NIL {
                return;
            }

            loop {
                let next = self.next(current);
                if next == NIL {
                    break;
                }
                if current < next {
                    // Out of order: swap the pair.
                    self.set_link(link, next);
                    self.set_next(current, self.next(next));
                    self.set_next(next, current);
                    link = next;
                    reordered = true;
                } else if next + self.size(next) == current {
                    // `next` sits directly below `current`: absorb it.
                    self.set_size(next, self.size(next) + self.size(current));
                    self.set_link(link, next);
                    current = next;
                } else {
                    link = current;
                    current = next;
                }
            }

            if !reordered {
                return;
            }
        }
    }

    /// Merge the freshly-freed list into the canonical free list.
    ///
    /// Returns `false` (and does nothing) when nothing was freed since the
    /// last collection.
    pub fn collect(&mut self) -> bool {
        if self.link(FRESH_ROOT) == NIL {
            return false;
        }
        self.sort_freshly_freed();

        let mut fresh = self.link(FRESH_ROOT);
        self.set_link(FRESH_ROOT, NIL);

        // `link` is the link that will point at the next spliced block;
        // `above` is the link pointing at the block that owns `link`.
        let mut above = TOP_ROOT;
        let mut link = TOP_ROOT;
        while fresh != NIL {
            let block = fresh;
            fresh = self.next(block);

            loop {
                let current = self.link(link);
                if current != NIL && current > block {
                    above = link;
                    link = current;
                } else {
                    break;
                }
            }

            let below = self.link(link);
            self.set_next(block, below);
            self.set_link(link, block);

            // Coalesce with the block directly above, which owns `link`.
            if link >= FIRST_BLOCK && block + self.size(block) == link {
                self.set_size(block, self.size(block) + self.size(link));
                self.set_link(above, block);
                link = above;
            }

            // Coalesce with the block directly below.
            if below != NIL && below + self.size(below) == block {
                self.set_size(below, self.size(below) + self.size(block));
                self.set_link(link, below);
            }
        }

        trace!("collector: merged freed blocks");
        true
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::arena::{Arena, Handle};

    type Blocks = heapless::Vec<(usize, usize), 16>;

    fn canonical<const N: usize>(arena: &Arena<N>) -> Blocks {
        arena.free_blocks().map(|b| (b.offset, b.size)).collect()
    }

    fn fresh<const N: usize>(arena: &Arena<N>) -> Blocks {
        arena.freshly_freed().map(|b| (b.offset, b.size)).collect()
    }

    /// Six 4-byte records at 28, 24, 20, 16, 12, 8 above a free [2..8).
    fn packed() -> (Arena<32>, heapless::Vec<Handle, 8>) {
        let mut arena = Arena::<32>::new();
        let mut handles = heapless::Vec::new();
        for _ in 0..6 {
            handles.push(arena.allocate(4).unwrap()).unwrap();
        }
        (arena, handles)
    }

    #[test]
    fn test_collect_without_frees_is_a_no_op() {
        let mut arena = Arena::<32>::new();
        arena.allocate(4).unwrap();
        let before = canonical(&arena);
        assert!(!arena.collect());
        assert_eq!(canonical(&arena), before);
    }

    #[test]
    fn test_free_then_collect_restores_shape() {
        let mut arena = Arena::<32>::new();
        arena.allocate(6).unwrap();
        let before = canonical(&arena);

        let h = arena.allocate(4).unwrap();
        arena.deallocate(h, 4).unwrap();
        assert!(arena.collect());
        assert_eq!(canonical(&arena), before);
        assert!(fresh(&arena).is_empty());
    }

    #[test]
    fn test_freed_block_stays_separate_unless_adjacent() {
        let mut arena = Arena::<32>::new();
        let first = arena.allocate(4).unwrap();
        let second = arena.allocate(4).unwrap();
        assert_eq!((first.offset(), second.offset()), (28, 24));

        arena.deallocate(first, 4).unwrap();
        arena.collect();
        assert_eq!(canonical(&arena).as_slice(), &[(28, 4), (2, 22)]);
    }

    #[test]
    fn test_sort_orders_and_merges_fresh_list() {
        let (mut arena, handles) = packed();
        // Free 8, 20, 16 in that order.
        for &i in &[5usize, 2, 3] {
            arena.deallocate(handles[i], 4).unwrap();
        }
        assert_eq!(fresh(&arena).as_slice(), &[(16, 4), (20, 4), (8, 4)]);

        arena.sort_freshly_freed();
        assert_eq!(fresh(&arena).as_slice(), &[(16, 8), (8, 4)]);
    }

    #[test]
    fn test_collect_coalesces_across_lists() {
        let (mut arena, handles) = packed();
        // Free everything between the bottom block and record 28.
        for &i in &[3usize, 1, 5, 2, 4] {
            arena.deallocate(handles[i], 4).unwrap();
        }
        assert_eq!(fresh(&arena).len(), 5);
        arena.collect();
        // [2..8) free plus [8..28) freed: one block of 26 bytes.
        assert_eq!(canonical(&arena).as_slice(), &[(2, 26)]);
    }

    #[test]
    fn test_collect_merges_with_block_above() {
        let mut arena = Arena::<32>::new();
        let top = arena.allocate(4).unwrap(); // 28
        let middle = arena.allocate(4).unwrap(); // 24
        let _low = arena.allocate(4).unwrap(); // 20
        arena.deallocate(top, 4).unwrap();
        arena.collect();
        assert_eq!(canonical(&arena).as_slice(), &[(28, 4), (2, 18)]);

        arena.deallocate(middle, 4).unwrap();
        arena.collect();
        assert_eq!(canonical(&arena).as_slice(), &[(24, 8), (2, 18)]);
    }

    #[test]
    fn test_collect_bridges_two_blocks() {
        let mut arena = Arena::<32>::new();
        let top = arena.allocate(4).unwrap(); // 28
        let middle = arena.allocate(4).unwrap(); // 24
        arena.deallocate(top, 4).unwrap();
        arena.collect();

        // [24..28) touches the block above and the block below.
        arena.deallocate(middle, 4).unwrap();
        arena.collect();
        assert_eq!(canonical(&arena).as_slice(), &[(2, 30)]);
    }

    #[test]
    fn test_collect_is_idempotent() {
        let (mut arena, handles) = packed();
        arena.deallocate(handles[0], 4).unwrap();
        arena.deallocate(handles[4], 4).unwrap();
        assert!(arena.collect());
        let once = canonical(&arena);
        assert!(!arena.collect());
        assert_eq!(canonical(&arena), once);
    }

    #[test]
    fn test_collect_into_empty_canonical_list() {
        let mut arena = Arena::<16>::new();
        let a = arena.allocate(6).unwrap(); // 10
        let b = arena.allocate(8).unwrap(); // 2
        assert_eq!(arena.free_blocks().count(), 0);

        arena.deallocate(a, 6).unwrap();
        arena.collect();
        assert_eq!(canonical(&arena).as_slice(), &[(10, 6)]);

        arena.deallocate(b, 8).unwrap();
        arena.collect();
        assert_eq!(canonical(&arena).as_slice(), &[(2, 14)]);
    }
}
