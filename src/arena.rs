//! # Event Arena
//!
//! A single fixed-size byte buffer holding every event record. There is no
//! global allocator: blocks are handed out from an intrusive free list whose
//! headers live inside the free memory itself.
//!
//! ## Layout
//!
//! ```text
//!  offset 0    1    2                                              N
//!  ┌────┬────┬──────────┬─────────┬──────────┬─────────┬──────────┐
//!  │top │new │  free    │ event   │  free    │ event   │ event    │
//!  └────┴────┴──────────┴─────────┴──────────┴─────────┴──────────┘
//!    │    │   [next|size]          [next|size]
//!    │    └─► freshly-freed list (unordered until collected)
//!    └─► canonical free list, highest address first
//! ```
//!
//! Bytes 0 and 1 hold the two list roots, so a block never starts below
//! offset 2 and offset 0 doubles as the list terminator. Every "link" (a
//! root or a block's `next` byte) is therefore just a buffer offset, which
//! keeps the list surgery in the collector uniform.
//!
//! ## Sizes
//!
//! Record sizes are rounded up to an even number of bytes. Every block is
//! a whole number of 2-byte units, so any remainder left by a split can
//! still carry its `[next|size]` header.

use core::ops::Range;

use crate::error::Error;

/// Offset of the canonical free list root.
pub(crate) const TOP_ROOT: usize = 0;
/// Offset of the freshly-freed list root.
pub(crate) const FRESH_ROOT: usize = 1;
/// First offset a block may start at.
pub const FIRST_BLOCK: usize = 2;
/// List terminator.
pub(crate) const NIL: usize = 0;

/// Single-byte offset naming an event record in the arena.
///
/// A handle stays valid only while the record does not move. The
/// compactor patches handles stored in the scheduling heap; any other copy
/// goes stale when memory is compacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handle(u8);

impl Handle {
    pub(crate) const fn from_offset(offset: usize) -> Self {
        Self(offset as u8)
    }

    /// Byte offset of the record's first byte.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 as usize
    }
}

/// Size a record actually occupies: rounded up to a whole 2-byte unit.
/// Saturates instead of overflowing, so oversized requests stay oversized.
#[inline]
pub const fn block_size(size: usize) -> usize {
    size.saturating_add(1) & !1
}

/// A block on one of the free lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FreeBlock {
    pub offset: usize,
    pub size: usize,
}

impl FreeBlock {
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Snapshot of arena occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArenaUsage {
    /// Bytes available to blocks (the buffer minus the two roots).
    pub capacity: usize,
    /// Bytes on the canonical free list.
    pub free: usize,
    /// Bytes freed but not yet collected.
    pub pending: usize,
    /// Number of blocks on the canonical free list.
    pub fragments: usize,
    /// Largest single allocation that would currently succeed.
    pub largest_free: usize,
}

impl ArenaUsage {
    /// Bytes held by live records.
    pub fn allocated(&self) -> usize {
        self.capacity - self.free - self.pending
    }
}

/// The event arena: `N` bytes, `N` even and at most 256.
pub struct Arena<const N: usize> {
    buf: [u8; N],
    /// Bumped every time compaction moves a record.
    epoch: u32,
}

impl<const N: usize> Arena<N> {
    const VALID: () = assert!(N >= FIRST_BLOCK + 2 && N <= 256 && N % 2 == 0);

    /// A reset arena: a single free block spanning `2..N`.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID;
        let mut buf = [0u8; N];
        buf[TOP_ROOT] = FIRST_BLOCK as u8;
        buf[FIRST_BLOCK + 1] = (N - FIRST_BLOCK) as u8;
        Self { buf, epoch: 0 }
    }

    /// Return every byte to a single free block and forget freed blocks.
    pub fn reset(&mut self) {
        self.buf[TOP_ROOT] = FIRST_BLOCK as u8;
        self.buf[FRESH_ROOT] = NIL as u8;
        self.buf[FIRST_BLOCK] = NIL as u8;
        self.buf[FIRST_BLOCK + 1] = (N - FIRST_BLOCK) as u8;
    }

    /// Allocate a record of `size` bytes.
    ///
    /// First fit, scanning from the highest free block. A larger block
    /// gives up its tail and keeps its header; an exact fit is unlinked.
    /// The returned record is unstable until it is scheduled.
    pub fn allocate(&mut self, size: usize) -> Result<Handle, Error> {
        let size = Self::check_size(size)?;

        let mut link = TOP_ROOT;
        let mut block = self.link(TOP_ROOT);
        while block != NIL {
            let available = self.size(block);
            if size < available {
                let remaining = available - size;
                self.set_size(block, remaining);
                trace!("arena: split {} -> {}+{}", block, remaining, size);
                return Ok(Handle::from_offset(block + remaining));
            }
            if size == available {
                self.set_link(link, self.next(block));
                trace!("arena: took {} whole ({})", block, size);
                return Ok(Handle::from_offset(block));
            }
            link = block;
            block = self.next(block);
        }

        debug!("arena: exhausted allocating {}", size);
        Err(Error::ArenaExhausted)
    }

    /// Return a record to the arena.
    ///
    /// O(1): the block is pushed onto the freshly-freed list and becomes
    /// reusable only after the next collection. `size` must be the size the
    /// record was allocated with.
    pub fn deallocate(&mut self, handle: Handle, size: usize) -> Result<(), Error> {
        let size = Self::check_size(size)?;
        let at = self.check_span(handle, size)?;
        if cfg!(debug_assertions) && self.overlaps_free(at..at + size) {
            warn!("arena: double free of {}", at);
            return Err(Error::InvalidHandle);
        }

        self.set_next(at, self.link(FRESH_ROOT));
        self.set_size(at, size);
        self.set_link(FRESH_ROOT, at);
        trace!("arena: freed {} ({})", at, size);
        Ok(())
    }

    /// The `len` bytes of the record at `handle`.
    pub fn bytes(&self, handle: Handle, len: usize) -> Result<&[u8], Error> {
        let at = self.check_span(handle, len)?;
        Ok(&self.buf[at..at + len])
    }

    /// The `len` bytes of the record at `handle`, mutably.
    pub fn bytes_mut(&mut self, handle: Handle, len: usize) -> Result<&mut [u8], Error> {
        let at = self.check_span(handle, len)?;
        Ok(&mut self.buf[at..at + len])
    }

    /// The canonical free list, highest address first.
    pub fn free_blocks(&self) -> FreeList<'_, N> {
        FreeList {
            arena: self,
            next: self.link(TOP_ROOT),
        }
    }

    /// The freshly-freed list in its current order.
    pub fn freshly_freed(&self) -> FreeList<'_, N> {
        FreeList {
            arena: self,
            next: self.link(FRESH_ROOT),
        }
    }

    /// Occupancy snapshot: free, pending and allocated bytes.
    pub fn usage(&self) -> ArenaUsage {
        let (free, fragments, largest_free) = self
            .free_blocks()
            .fold((0, 0, 0), |(free, count, largest), block| {
                (free + block.size, count + 1, largest.max(block.size))
            });
        ArenaUsage {
            capacity: N - FIRST_BLOCK,
            free,
            pending: self.freshly_freed().map(|block| block.size).sum(),
            fragments,
            largest_free,
        }
    }

    /// Number of compaction passes that moved memory.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    // -----------------------------------------------------------------------
    // Boundary checks
    // -----------------------------------------------------------------------

    fn check_size(size: usize) -> Result<usize, Error> {
        let size = size.checked_add(1).ok_or(Error::InvalidSize)? & !1;
        if size == 0 || size > N - FIRST_BLOCK {
            return Err(Error::InvalidSize);
        }
        Ok(size)
    }

    fn check_span(&self, handle: Handle, len: usize) -> Result<usize, Error> {
        let at = handle.offset();
        if at < FIRST_BLOCK || at % 2 != 0 {
            return Err(Error::InvalidHandle);
        }
        at.checked_add(len)
            .filter(|&end| end <= N)
            .ok_or(Error::InvalidHandle)?;
        Ok(at)
    }

    fn overlaps_free(&self, span: Range<usize>) -> bool {
        self.free_blocks()
            .chain(self.freshly_freed())
            .any(|block| block.offset < span.end && span.start < block.end())
    }

    // -----------------------------------------------------------------------
    // Intrusive list primitives (shared with the collector and compactor)
    // -----------------------------------------------------------------------

    /// Read the link stored at `at`: a root, or a block's `next` byte.
    #[inline]
    pub(crate) fn link(&self, at: usize) -> usize {
        self.buf[at] as usize
    }

    #[inline]
    pub(crate) fn set_link(&mut self, at: usize, block: usize) {
        self.buf[at] = block as u8;
    }

    #[inline]
    pub(crate) fn next(&self, block: usize) -> usize {
        self.link(block)
    }

    #[inline]
    pub(crate) fn set_next(&mut self, block: usize, next: usize) {
        self.set_link(block, next);
    }

    #[inline]
    pub(crate) fn size(&self, block: usize) -> usize {
        self.buf[block + 1] as usize
    }

    #[inline]
    pub(crate) fn set_size(&mut self, block: usize, size: usize) {
        self.buf[block + 1] = size as u8;
    }

    /// Move `span` up by `shift` bytes. Overlap-safe: the highest byte is
    /// copied first, so nothing is overwritten before it is read.
    pub(crate) fn shift_up(&mut self, span: Range<usize>, shift: usize) {
        let dest = span.start + shift;
        self.buf.copy_within(span, dest);
    }

    pub(crate) fn bump_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }
}

impl<const N: usize> Default for Arena<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over one of the arena's free lists.
pub struct FreeList<'a, const N: usize> {
    arena: &'a Arena<N>,
    next: usize,
}

impl<const N: usize> Iterator for FreeList<'_, N> {
    type Item = FreeBlock;

    fn next(&mut self) -> Option<FreeBlock> {
        if self.next == NIL {
            return None;
        }
        let offset = self.next;
        self.next = self.arena.next(offset);
        Some(FreeBlock {
            offset,
            size: self.arena.size(offset),
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
