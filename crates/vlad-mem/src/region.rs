//! Backing memory for an arena.
//!
//! A [`Region`] is one contiguous, zeroed reservation obtained from the
//! system allocator through `std::alloc`. It is never resized and is
//! returned to the system when the region is dropped.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{ArenaError, Result};

/// Alignment of the reservation. Header words are read bytewise, so this only
/// has to be good enough for payloads.
const REGION_ALIGNMENT: usize = 8;

/// One fixed-size block of raw memory owned exclusively by an arena.
pub(crate) struct Region {
    /// Start of the reservation.
    start: NonNull<u8>,
    /// Layout used for both allocation and deallocation.
    layout: Layout,
}

// SAFETY: a Region is the sole owner of its memory; nothing else holds the
// pointer, so moving it to another thread moves all access with it.
unsafe impl Send for Region {}

impl Region {
    /// Reserves `size` zeroed bytes.
    ///
    /// If the system allocator cannot satisfy the reservation the process is
    /// terminated through [`alloc::handle_alloc_error`]: there is no fallback
    /// once the backing store is unavailable.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidSize`] if `size` is zero or does not form a
    /// valid layout on this platform.
    pub(crate) fn reserve(size: u32) -> Result<Self> {
        let invalid = ArenaError::InvalidSize {
            requested: size as usize,
        };
        if size == 0 {
            return Err(invalid);
        }
        let layout = Layout::from_size_align(size as usize, REGION_ALIGNMENT)
            .map_err(|_| invalid)?;

        // SAFETY: layout has a non-zero size (checked above).
        let start = unsafe { alloc::alloc_zeroed(layout) };
        let Some(start) = NonNull::new(start) else {
            alloc::handle_alloc_error(layout);
        };

        Ok(Region { start, layout })
    }

    /// Size of the region in bytes.
    pub(crate) fn len(&self) -> u32 {
        // `reserve` only accepts u32 sizes.
        self.layout.size() as u32
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        // SAFETY: start points to layout.size() bytes that were zeroed at
        // reservation, stay allocated until drop, and are only reachable
        // through this Region, so the shared borrow of self excludes writers.
        unsafe { std::slice::from_raw_parts(self.start.as_ptr(), self.layout.size()) }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `bytes`; the exclusive borrow of self makes this the
        // only live view of the memory.
        unsafe { std::slice::from_raw_parts_mut(self.start.as_ptr(), self.layout.size()) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: start was returned by alloc_zeroed with exactly this layout
        // and has not been freed before.
        unsafe {
            alloc::dealloc(self.start.as_ptr(), self.layout);
        }
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("start", &self.start)
            .field("len", &self.layout.size())
            .finish()
    }
}
