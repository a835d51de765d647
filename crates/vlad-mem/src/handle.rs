//! Client handles.
//!
//! A [`Handle`] is the arena offset of the first payload byte of an
//! allocated block. Callers never see header offsets.

use std::fmt;

use crate::header::ALLOC_HEADER_SIZE;

/// Opaque reference to a live allocation.
///
/// Handles are plain offsets and carry no lifetime, so the allocator
/// validates every handle it is given: a stale, forged, or double-freed
/// handle is detected through the block tag rather than trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct Handle(u32);

impl Handle {
    pub(crate) const fn for_block(block: u32) -> Self {
        Handle(block + ALLOC_HEADER_SIZE)
    }

    /// Rebuilds a handle from a value previously obtained through
    /// [`Handle::into_raw`]. The allocator validates it on use.
    pub const fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    /// Payload offset inside the arena.
    #[must_use]
    pub const fn into_raw(self) -> u32 {
        self.0
    }

    /// Offset of the block header this handle claims to belong to.
    pub(crate) const fn block(self) -> Option<u32> {
        self.0.checked_sub(ALLOC_HEADER_SIZE)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}
