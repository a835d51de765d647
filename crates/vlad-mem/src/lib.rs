//! `vlad` fixed-arena memory allocator
//!
//! This crate carves variable-sized allocations out of one contiguous,
//! power-of-two sized region reserved up front:
//!
//! - **Allocator**: best/worst/first-fit selection over a circular
//!   doubly-linked free list stored inside the arena itself
//! - **Coalescing**: freed blocks merge with their free neighbours, so the
//!   arena never holds two adjacent free blocks
//! - **Integrity checks**: block tags catch double frees, forged handles and
//!   overwritten headers; fatal errors poison the allocator
//! - **Inspection**: block walks, occupancy stats and a full invariant
//!   checker
//!
//! Handles are arena offsets, not pointers. Read and write allocations
//! through [`Allocator::payload`] and [`Allocator::payload_mut`].
//!
//! ```
//! use vlad_mem::{ArenaConfig, FitStrategy};
//!
//! let mut alloc = ArenaConfig::new(1024)
//!     .with_strategy(FitStrategy::BestFit)
//!     .build()
//!     .unwrap();
//!
//! let a = alloc.allocate(100).unwrap();
//! let b = alloc.allocate(100).unwrap();
//! alloc.deallocate(a).unwrap();
//! alloc.deallocate(b).unwrap();
//!
//! alloc.check_invariants().unwrap();
//! assert_eq!(alloc.stats().unwrap().largest_free, 1024);
//! ```

pub mod arena;
pub mod config;
pub mod error;
pub mod handle;
pub mod header;
pub mod inspect;
mod region;
pub mod shared;

pub use arena::Allocator;
pub use config::{
    ArenaConfig, FitStrategy, GRANULARITY, MAX_ARENA_SIZE, MIN_ALLOCATION, MIN_ARENA_SIZE,
    arena_size_for,
};
pub use error::{ArenaError, Corruption, Result};
pub use handle::Handle;
pub use header::{ALLOC_HEADER_SIZE, FREE_HEADER_SIZE, Tag};
pub use inspect::{ArenaStats, BlockInfo, BlockState, Blocks};
pub use shared::SharedAllocator;
