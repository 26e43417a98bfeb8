//! # Compactor
//!
//! Defragments the arena at idle time by sliding live records toward the
//! top of the buffer, so all free space sinks into one block at the bottom.
//!
//! ## Algorithm
//!
//! The canonical free list is sorted highest address first. For each pair
//! of neighbours on it, the bytes between them are live:
//!
//! ```text
//!   before:  [ lower free ][ live span ][ upper free ]
//!   after:   [ lower free + upper size  ][ live span ]
//! ```
//!
//! 1. Every heap handle inside the live span is patched by `upper.size`.
//! 2. The span is moved up by the same amount (overlap-safe).
//! 3. `lower` absorbs the vacated bytes and the walk continues from it.
//!
//! When the walk reaches the bottom a single free block remains and becomes
//! the top of the list. Tail-first allocation then keeps handing out the
//! bytes right below the live records.
//!
//! ## Roots
//!
//! Only the scheduling heap is searched for handles. A record that is
//! allocated but not scheduled (an *unstable* event) is moved like any
//! other, but whoever holds its handle is not told.

use crate::arena::{Arena, NIL, TOP_ROOT};
use crate::heap::ScheduleHeap;

/// What an idle-time compaction pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Compaction {
    /// Compaction is suspended; only collection ran.
    Suspended,
    /// Too few free blocks to be worth moving memory.
    Skipped { free_blocks: usize },
    /// Memory was moved.
    Compacted {
        spans: usize,
        bytes_moved: usize,
        handles_patched: usize,
    },
}

/// Collect, then compact if at least `threshold` free blocks exist.
pub fn compact<const N: usize, const C: usize>(
    arena: &mut Arena<N>,
    heap: &mut ScheduleHeap<C>,
    threshold: usize,
) -> Compaction {
    arena.collect();

    let free_blocks = arena.free_blocks().take(threshold).count();
    if free_blocks < threshold {
        return Compaction::Skipped { free_blocks };
    }

    let mut spans = 0;
    let mut bytes_moved = 0;
    let mut handles_patched = 0;

    let mut upper = arena.link(TOP_ROOT);
    if upper == NIL {
        return Compaction::Skipped { free_blocks: 0 };
    }
    loop {
        let lower = arena.next(upper);
        if lower == NIL {
            break;
        }
        let shift = arena.size(upper);
        let lower_size = arena.size(lower);
        let span = lower + lower_size..upper;

        handles_patched += heap.relocate(span.clone(), shift);
        bytes_moved += span.len();
        arena.shift_up(span, shift);
        arena.set_size(lower, lower_size + shift);

        spans += 1;
        upper = lower;
    }
    arena.set_link(TOP_ROOT, upper);

    if spans > 0 {
        arena.bump_epoch();
        debug!(
            "compactor: moved {} bytes in {} spans, patched {} handles",
            bytes_moved,
            spans,
            handles_patched
        );
    }

    Compaction::Compacted {
        spans,
        bytes_moved,
        handles_patched,
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Handle, FIRST_BLOCK};
    use crate::config::COMPACTION_THRESHOLD;
    use crate::tick::Tick;

    type Blocks = heapless::Vec<(usize, usize), 16>;

    fn canonical<const N: usize>(arena: &Arena<N>) -> Blocks {
        arena.free_blocks().map(|b| (b.offset, b.size)).collect()
    }

    /// Tag a record's bytes with `tag` so moves can be verified.
    fn stamp<const N: usize>(arena: &mut Arena<N>, handle: Handle, size: usize, tag: u8) {
        for byte in arena.bytes_mut(handle, size).unwrap() {
            *byte = tag;
        }
    }

    fn holds<const N: usize>(arena: &Arena<N>, handle: Handle, size: usize, tag: u8) -> bool {
        arena.bytes(handle, size).unwrap().iter().all(|&b| b == tag)
    }

    /// A 64-byte arena with eleven 4-byte records at 60, 56, ... 20, where
    /// every other record is freed: five holes plus the bottom block. Live
    /// record `i` is scheduled `i` ticks out and filled with `0xA0 + i`.
    fn fragmented(heap: &mut ScheduleHeap<8>) -> Arena<64> {
        let mut arena = Arena::<64>::new();
        for i in 0..11u8 {
            let h = arena.allocate(4).unwrap();
            if i % 2 == 0 {
                arena.deallocate(h, 4).unwrap();
            } else {
                stamp(&mut arena, h, 4, 0xA0 + i);
                heap.insert(i as crate::tick::Tick, h, 0).unwrap();
            }
        }
        arena
    }

    #[test]
    fn test_gate_skips_lightly_fragmented_arena() {
        let mut heap = ScheduleHeap::<8>::new();
        let mut arena = Arena::<32>::new();
        let a = arena.allocate(4).unwrap();
        arena.allocate(4).unwrap();
        arena.deallocate(a, 4).unwrap();

        let outcome = compact(&mut arena, &mut heap, COMPACTION_THRESHOLD);
        assert_eq!(outcome, Compaction::Skipped { free_blocks: 2 });
        // Collection still happened.
        assert_eq!(canonical(&arena).as_slice(), &[(28, 4), (2, 22)]);
        assert_eq!(arena.epoch(), 0);
    }

    #[test]
    fn test_compaction_leaves_one_free_block() {
        let mut heap = ScheduleHeap::<8>::new();
        let mut arena = fragmented(&mut heap);
        assert!(arena.collect());
        assert_eq!(arena.free_blocks().count(), 6);

        let outcome = compact(&mut arena, &mut heap, COMPACTION_THRESHOLD);
        assert_eq!(
            outcome,
            Compaction::Compacted {
                spans: 5,
                bytes_moved: 20,
                handles_patched: 5,
            }
        );
        // 22 bytes at the bottom plus five 4-byte holes.
        assert_eq!(canonical(&arena).as_slice(), &[(2, 42)]);
        assert_eq!(arena.usage().allocated(), 20);
        assert_eq!(arena.epoch(), 1);
    }

    #[test]
    fn test_heap_handles_follow_their_records() {
        let mut heap = ScheduleHeap::<8>::new();
        let mut arena = fragmented(&mut heap);

        compact(&mut arena, &mut heap, COMPACTION_THRESHOLD);

        // Every scheduled handle still names its own record, and records
        // are packed against the top of the arena.
        let mut tick = 0;
        let mut offsets: heapless::Vec<usize, 8> = heapless::Vec::new();
        while !heap.is_empty() {
            while let Some(due) = heap.pop_if_due(tick) {
                let tag = 0xA0 + due.deadline as u8;
                assert!(holds(&arena, due.handle, 4, tag));
                offsets.push(due.handle.offset()).unwrap();
            }
            tick += 1;
        }
        assert_eq!(offsets.as_slice(), &[60, 56, 52, 48, 44]);
    }

    #[test]
    fn test_compaction_is_idempotent() {
        let mut heap = ScheduleHeap::<8>::new();
        let mut arena = fragmented(&mut heap);
        compact(&mut arena, &mut heap, COMPACTION_THRESHOLD);
        let once = canonical(&arena);

        let outcome = compact(&mut arena, &mut heap, COMPACTION_THRESHOLD);
        assert_eq!(outcome, Compaction::Skipped { free_blocks: 1 });
        assert_eq!(canonical(&arena), once);
        assert_eq!(arena.epoch(), 1);
    }

    #[test]
    fn test_threshold_is_tunable() {
        let mut heap = ScheduleHeap::<8>::new();
        let mut arena = Arena::<32>::new();
        let a = arena.allocate(4).unwrap(); // 28
        let b = arena.allocate(4).unwrap(); // 24
        stamp(&mut arena, b, 4, 0x5B);
        heap.insert(1, b, 0).unwrap();
        arena.deallocate(a, 4).unwrap();

        let outcome = compact(&mut arena, &mut heap, 2);
        assert_eq!(
            outcome,
            Compaction::Compacted {
                spans: 1,
                bytes_moved: 4,
                handles_patched: 1,
            }
        );
        assert_eq!(canonical(&arena).as_slice(), &[(2, 26)]);
        let (_, moved) = heap.peek().unwrap();
        assert_eq!(moved.offset(), 28);
        assert!(holds(&arena, moved, 4, 0x5B));
    }

    #[test]
    fn test_record_above_top_block_stays_put() {
        let mut heap = ScheduleHeap::<8>::new();
        let mut arena = Arena::<32>::new();
        let pinned = arena.allocate(4).unwrap(); // 28, above every free block
        let hole = arena.allocate(4).unwrap(); // 24
        let mid = arena.allocate(4).unwrap(); // 20
        arena.deallocate(hole, 4).unwrap();
        heap.insert(3, pinned, 0).unwrap();
        heap.insert(2, mid, 0).unwrap();

        compact(&mut arena, &mut heap, 2);
        assert!(heap.contains(pinned));
        assert!(heap.contains(Handle::from_offset(24)));
        assert_eq!(canonical(&arena).as_slice(), &[(2, 22)]);
    }

    struct Lcg(u32);

    impl Lcg {
        fn next(&mut self) -> u32 {
            self.0 = self.0.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            self.0 >> 16
        }
    }

    /// Every byte in `2..64` belongs to exactly one free block or live
    /// record, the canonical list is descending with no touching blocks,
    /// and every scheduled handle still reaches its own stamped bytes.
    fn check_layout(arena: &Arena<64>, heap: &ScheduleHeap<8>, sizes: &[usize; 256]) {
        let mut owners = [0u8; 64];
        let free = arena
            .free_blocks()
            .chain(arena.freshly_freed())
            .map(|b| (b.offset, b.size));
        let live = heap.iter().map(|(_, handle)| {
            let tag = arena.bytes(handle, 1).unwrap()[0];
            let size = sizes[tag as usize];
            assert!(size > 0, "handle {} reaches unknown tag {tag}", handle.offset());
            assert!(holds(arena, handle, size, tag));
            (handle.offset(), size)
        });
        for (start, len) in free.chain(live) {
            for owner in &mut owners[start..start + len] {
                *owner += 1;
            }
        }
        assert!(owners[FIRST_BLOCK..].iter().all(|&n| n == 1), "{owners:?}");

        let blocks: heapless::Vec<_, 32> = arena.free_blocks().collect();
        for pair in blocks.windows(2) {
            assert!(pair[1].end() < pair[0].offset, "{:?}", pair);
        }
    }

    #[test]
    fn test_random_interleaving_keeps_records_intact() {
        const NOW: Tick = 100;
        let mut rng = Lcg(0x5EED);

        for _ in 0..40 {
            let mut arena = Arena::<64>::new();
            let mut heap = ScheduleHeap::<8>::new();
            // Record size by tag; zero while the tag is unused.
            let mut sizes = [0usize; 256];
            let mut next_tag: u8 = 1;

            for _ in 0..200 {
                match rng.next() % 4 {
                    0 | 1 if !heap.is_full() => {
                        let size = 2 * (1 + rng.next() as usize % 4);
                        if let Ok(handle) = arena.allocate(size) {
                            while next_tag == 0 || sizes[next_tag as usize] != 0 {
                                next_tag = next_tag.wrapping_add(1);
                            }
                            let tag = next_tag;
                            next_tag = tag.wrapping_add(1);
                            stamp(&mut arena, handle, size, tag);
                            sizes[tag as usize] = size;
                            heap.insert((rng.next() % 50) as Tick, handle, 0).unwrap();
                        }
                    }
                    0 | 1 => {}
                    2 => {
                        if let Some(due) = heap.pop_if_due(NOW) {
                            let tag = arena.bytes(due.handle, 1).unwrap()[0];
                            let size = sizes[tag as usize];
                            assert!(holds(&arena, due.handle, size, tag));
                            arena.deallocate(due.handle, size).unwrap();
                            sizes[tag as usize] = 0;
                        }
                    }
                    _ => {
                        if rng.next() % 2 == 0 {
                            arena.collect();
                        } else {
                            let threshold = 1 + rng.next() as usize % 5;
                            compact(&mut arena, &mut heap, threshold);
                        }
                    }
                }
                check_layout(&arena, &heap, &sizes);
            }
        }
    }
}
