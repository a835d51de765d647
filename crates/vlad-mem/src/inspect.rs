//! Read-only views of an arena: the physical block walk, occupancy
//! statistics and the invariant checker.
//!
//! Nothing here mutates the arena or poisons the allocator; a damaged arena
//! is reported through the returned [`Result`].

use std::fmt;

use fxhash::FxBuildHasher;
use hashbrown::HashSet;

use crate::arena::{Allocator, ArenaState};
use crate::error::{ArenaError, Corruption, Result};
use crate::header::Tag;

type OffsetSet = HashSet<u32, FxBuildHasher>;

/// Whether a block is on the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockState {
    /// On the free list.
    Free,
    /// Owned by a caller.
    Allocated,
}

impl From<Tag> for BlockState {
    fn from(tag: Tag) -> Self {
        match tag {
            Tag::Free => BlockState::Free,
            Tag::Allocated => BlockState::Allocated,
        }
    }
}

/// One block of the arena partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the block header.
    pub offset: u32,
    /// Block size, header included.
    pub size: u32,
    /// Free or allocated.
    pub state: BlockState,
}

impl BlockInfo {
    /// Offset one past the last byte of the block.
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.offset + self.size
    }

    /// Whether the block is on the free list.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }
}

/// Iterator over the arena partition in address order.
///
/// Yields an error and stops at the first header that cannot be decoded.
pub struct Blocks<'a> {
    state: &'a ArenaState,
    offset: u32,
    failed: bool,
}

impl Iterator for Blocks<'_> {
    type Item = Result<BlockInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.state.size() {
            return None;
        }

        match self.state.block_header(self.offset) {
            Ok((tag, size)) => {
                let block = BlockInfo {
                    offset: self.offset,
                    size,
                    state: tag.into(),
                };
                self.offset = block.end();
                Some(Ok(block))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Snapshot of arena occupancy.
///
/// Advisory only: intended for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
    /// Arena size in bytes.
    pub arena_size: u32,
    /// Total size of all free blocks, headers included.
    pub free_bytes: u32,
    /// Number of blocks on the free list.
    pub free_blocks: usize,
    /// Size of the largest free block, header included.
    pub largest_free: u32,
    /// Total size of all allocated blocks, headers included.
    pub allocated_bytes: u32,
    /// Number of live allocations.
    pub allocated_blocks: usize,
    /// Offset of the free-list head, if any block is free.
    pub head: Option<u32>,
}

impl ArenaStats {
    /// Share of free memory that is not in the largest free block, from
    /// `0.0` (one free block) towards `1.0` (badly fragmented).
    #[must_use]
    pub fn fragmentation(&self) -> f64 {
        if self.free_bytes == 0 {
            return 0.0;
        }
        1.0 - f64::from(self.largest_free) / f64::from(self.free_bytes)
    }
}

impl fmt::Display for ArenaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "arena:     {} bytes", self.arena_size)?;
        match self.head {
            Some(head) => writeln!(f, "head:      {head}")?,
            None => writeln!(f, "head:      none")?,
        }
        writeln!(
            f,
            "free:      {} bytes in {} blocks (largest {})",
            self.free_bytes, self.free_blocks, self.largest_free
        )?;
        writeln!(
            f,
            "allocated: {} bytes in {} blocks",
            self.allocated_bytes, self.allocated_blocks
        )?;
        write!(f, "fragmentation: {:.1}%", self.fragmentation() * 100.0)
    }
}

impl ArenaState {
    pub(crate) fn blocks(&self) -> Blocks<'_> {
        Blocks {
            state: self,
            offset: 0,
            failed: false,
        }
    }
}

impl Allocator {
    /// Walks the arena partition in address order.
    ///
    /// # Errors
    ///
    /// [`ArenaError::Uninitialized`] or [`ArenaError::Poisoned`].
    pub fn blocks(&self) -> Result<Blocks<'_>> {
        Ok(self.live()?.blocks())
    }

    /// Occupancy snapshot.
    ///
    /// # Errors
    ///
    /// [`ArenaError::Uninitialized`], [`ArenaError::Poisoned`], or
    /// [`ArenaError::Corrupted`] if a header or link cannot be decoded.
    pub fn stats(&self) -> Result<ArenaStats> {
        let state = self.live()?;
        let mut stats = ArenaStats {
            arena_size: state.size(),
            head: state.head,
            ..ArenaStats::default()
        };

        if let Some(head) = state.head {
            for node in state.free_list(head) {
                let node = node?;
                stats.free_bytes += node.size;
                stats.free_blocks += 1;
                stats.largest_free = stats.largest_free.max(node.size);
            }
        }

        for block in state.blocks() {
            let block = block?;
            if block.state == BlockState::Allocated {
                stats.allocated_bytes += block.size;
                stats.allocated_blocks += 1;
            }
        }

        Ok(stats)
    }

    /// Verifies every structural invariant of the arena:
    ///
    /// - the blocks partition the arena with no gaps or overlaps;
    /// - no two free blocks are physically adjacent;
    /// - every free block is on the free list exactly once, and nothing else
    ///   is;
    /// - every `next` has a matching `prev`.
    ///
    /// # Errors
    ///
    /// The first violation found, as [`ArenaError::Corrupted`], or
    /// [`ArenaError::Uninitialized`] / [`ArenaError::Poisoned`].
    pub fn check_invariants(&self) -> Result<()> {
        let state = self.live()?;
        let mut free = OffsetSet::default();
        let mut previous_free = false;

        for block in state.blocks() {
            let block = block?;
            if block.is_free() {
                if previous_free {
                    return Err(ArenaError::corrupted(
                        block.offset,
                        Corruption::Uncoalesced,
                    ));
                }
                free.insert(block.offset);
            }
            previous_free = block.is_free();
        }

        if let Some(head) = state.head {
            let mut last = head;
            for node in state.free_list(head) {
                let node = node?;
                if !free.remove(&node.offset) {
                    return Err(ArenaError::corrupted(
                        node.offset,
                        Corruption::ListMismatch,
                    ));
                }
                last = node.offset;
            }

            if state.free_node(head)?.prev != last {
                return Err(ArenaError::corrupted(head, Corruption::BrokenLink));
            }
        }

        match free.iter().min() {
            Some(&missing) => Err(ArenaError::corrupted(
                missing,
                Corruption::ListMismatch,
            )),
            None => Ok(()),
        }
    }
}
