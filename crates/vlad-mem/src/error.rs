//! Error types for the arena allocator.
//!
//! Errors fall into three groups:
//!
//! - **Recoverable**: [`ArenaError::Exhausted`], [`ArenaError::InvalidSize`],
//!   [`ArenaError::Uninitialized`]. Allocator state is untouched.
//! - **Fatal**: [`ArenaError::Corrupted`], [`ArenaError::DoubleFree`],
//!   [`ArenaError::InvalidHandle`]. Allocator invariants can no longer be
//!   trusted; the allocator poisons itself and never tries to repair the
//!   free list.
//! - [`ArenaError::Poisoned`]: returned for every operation attempted after a
//!   fatal error.

use std::fmt;

/// What kind of structural damage the allocator found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Corruption {
    /// A header position did not carry a recognised tag.
    BadTag {
        /// The raw value found in the tag field.
        found: u32,
    },
    /// A free-list node is tagged ALLOCATED.
    AllocatedInFreeList,
    /// A header, link, or block extent points outside the arena.
    OutOfBounds,
    /// A block size is too small to hold its header, or not a multiple of
    /// the allocation granularity.
    BadSize {
        /// The size recorded in the header.
        size: u32,
    },
    /// `next.prev` of a node does not point back at the node.
    BrokenLink,
    /// The free-list walk did not return to the head.
    Cycle,
    /// A free block is missing from the free list, or listed twice.
    ListMismatch,
    /// Two physically adjacent free blocks were left unmerged.
    Uncoalesced,
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Corruption::BadTag { found } => {
                write!(f, "unrecognised block tag {found:#010x}")
            }
            Corruption::AllocatedInFreeList => {
                write!(f, "allocated block linked into the free list")
            }
            Corruption::OutOfBounds => write!(f, "offset outside the arena"),
            Corruption::BadSize { size } => {
                write!(f, "invalid block size {size}")
            }
            Corruption::BrokenLink => write!(f, "free-list back link mismatch"),
            Corruption::Cycle => {
                write!(f, "free-list walk never returned to the head")
            }
            Corruption::ListMismatch => {
                write!(f, "free list does not match the free blocks in the arena")
            }
            Corruption::Uncoalesced => {
                write!(f, "adjacent free blocks were not coalesced")
            }
        }
    }
}

/// Errors returned by [`Allocator`](crate::Allocator) operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    /// No free block is large enough for the request.
    Exhausted {
        /// Bytes the request needs, header included.
        requested: u32,
        /// Size of the largest free block, header included.
        largest_free: u32,
    },

    /// Internal allocator structures are damaged.
    Corrupted {
        /// Arena offset of the offending header.
        offset: u32,
        /// What was wrong with it.
        kind: Corruption,
    },

    /// The handle's block is already free.
    DoubleFree {
        /// The handle passed by the caller.
        handle: u32,
    },

    /// The handle does not name a live allocation in this arena.
    InvalidHandle {
        /// The handle passed by the caller.
        handle: u32,
    },

    /// A size argument was rejected before touching the arena.
    InvalidSize {
        /// The rejected size.
        requested: usize,
    },

    /// The allocator has not been initialised, or has been shut down.
    Uninitialized,

    /// A fatal error was reported earlier; only shutdown is accepted.
    Poisoned,
}

impl ArenaError {
    /// Whether this error means allocator invariants can no longer be trusted.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            ArenaError::Corrupted { .. }
                | ArenaError::DoubleFree { .. }
                | ArenaError::InvalidHandle { .. }
        )
    }

    pub(crate) const fn corrupted(offset: u32, kind: Corruption) -> Self {
        ArenaError::Corrupted { offset, kind }
    }
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArenaError::Exhausted {
                requested,
                largest_free,
            } => {
                write!(
                    f,
                    "Arena exhausted: requested {requested} bytes, largest free block {largest_free} bytes"
                )
            }
            ArenaError::Corrupted { offset, kind } => {
                write!(f, "Arena corrupted at offset {offset}: {kind}")
            }
            ArenaError::DoubleFree { handle } => {
                write!(f, "Double free of handle {handle:#x}")
            }
            ArenaError::InvalidHandle { handle } => {
                write!(f, "Invalid handle {handle:#x}: not a live allocation")
            }
            ArenaError::InvalidSize { requested } => {
                write!(f, "Invalid size: {requested} bytes")
            }
            ArenaError::Uninitialized => write!(f, "Arena is not initialised"),
            ArenaError::Poisoned => {
                write!(f, "Arena is poisoned by an earlier fatal error")
            }
        }
    }
}

impl std::error::Error for ArenaError {}

/// Result type for allocator operations.
pub type Result<T> = std::result::Result<T, ArenaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ArenaError::Exhausted {
                requested: 2048,
                largest_free: 916
            }
            .to_string(),
            "Arena exhausted: requested 2048 bytes, largest free block 916 bytes"
        );
        assert_eq!(
            ArenaError::Corrupted {
                offset: 16,
                kind: Corruption::BadTag { found: 0 }
            }
            .to_string(),
            "Arena corrupted at offset 16: unrecognised block tag 0x00000000"
        );
        assert_eq!(
            ArenaError::DoubleFree { handle: 8 }.to_string(),
            "Double free of handle 0x8"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ArenaError::DoubleFree { handle: 8 }.is_fatal());
        assert!(ArenaError::InvalidHandle { handle: 3 }.is_fatal());
        assert!(
            ArenaError::corrupted(0, Corruption::Cycle).is_fatal()
        );

        assert!(!ArenaError::Uninitialized.is_fatal());
        assert!(!ArenaError::Poisoned.is_fatal());
        assert!(!ArenaError::InvalidSize { requested: 0 }.is_fatal());
        assert!(
            !ArenaError::Exhausted {
                requested: 1,
                largest_free: 0
            }
            .is_fatal()
        );
    }
}
