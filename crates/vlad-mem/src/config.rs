//! Arena configuration and size policy.
//!
//! All sizing rules live here: how a size hint becomes an arena size, and
//! how a request becomes a block size.

use crate::arena::Allocator;
use crate::error::{ArenaError, Result};

/// Smallest arena ever reserved, in bytes.
pub const MIN_ARENA_SIZE: u32 = 1024;

/// Largest arena that can be addressed with `u32` offsets and sizes.
pub const MAX_ARENA_SIZE: u32 = 1 << 31;

/// Requests smaller than this are rounded up to it.
///
/// It also guarantees that every allocated block can later be re-tagged as a
/// free block: `ALLOC_HEADER_SIZE + MIN_ALLOCATION >= FREE_HEADER_SIZE`.
pub const MIN_ALLOCATION: u32 = 8;

/// Block sizes are always a multiple of this.
pub const GRANULARITY: u32 = 4;

/// How the free-list walk chooses among blocks that fit a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FitStrategy {
    /// Smallest block that fits; an exact fit ends the walk early.
    #[default]
    BestFit,
    /// Largest block that fits.
    WorstFit,
    /// First block that fits, in list order from the head.
    FirstFit,
}

impl FitStrategy {
    /// Whether `candidate` should replace the current `best` size.
    pub(crate) const fn prefers(self, candidate: u32, best: u32) -> bool {
        match self {
            FitStrategy::BestFit => candidate < best,
            FitStrategy::WorstFit => candidate > best,
            FitStrategy::FirstFit => false,
        }
    }

    /// Whether the walk can stop as soon as `candidate` is chosen.
    pub(crate) const fn settles(self, candidate: u32, need: u32) -> bool {
        match self {
            FitStrategy::BestFit => candidate == need,
            FitStrategy::WorstFit => false,
            FitStrategy::FirstFit => true,
        }
    }
}

/// Configuration for an [`Allocator`].
///
/// # Examples
///
/// ```
/// use vlad_mem::{ArenaConfig, FitStrategy};
///
/// let mut alloc = ArenaConfig::new(3000)
///     .with_strategy(FitStrategy::WorstFit)
///     .build()
///     .unwrap();
///
/// assert_eq!(alloc.arena_size(), Some(4096));
/// let handle = alloc.allocate(64).unwrap();
/// alloc.deallocate(handle).unwrap();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Requested arena size in bytes. Rounded up to a power of two, and never
    /// below [`MIN_ARENA_SIZE`].
    pub size_hint: usize,

    /// Block selection policy.
    pub strategy: FitStrategy,

    /// Abort the process on corruption or an invalid free instead of
    /// poisoning the allocator.
    pub abort_on_corruption: bool,
}

impl ArenaConfig {
    /// Default size hint: the minimum arena.
    pub const DEFAULT_SIZE_HINT: usize = MIN_ARENA_SIZE as usize;

    /// Creates a config for the given size hint with best-fit selection.
    #[must_use]
    pub const fn new(size_hint: usize) -> Self {
        Self {
            size_hint,
            strategy: FitStrategy::BestFit,
            abort_on_corruption: false,
        }
    }

    /// Sets the block selection policy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: FitStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets whether fatal errors abort the process.
    #[must_use]
    pub const fn with_abort_on_corruption(mut self, abort: bool) -> Self {
        self.abort_on_corruption = abort;
        self
    }

    /// The arena size this config will reserve.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidSize`] if the hint exceeds [`MAX_ARENA_SIZE`].
    pub fn arena_size(&self) -> Result<u32> {
        arena_size_for(self.size_hint)
    }

    /// Creates an allocator with this configuration and initialises it.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidSize`] if the hint exceeds [`MAX_ARENA_SIZE`].
    pub fn build(self) -> Result<Allocator> {
        let mut allocator = Allocator::with_config(self);
        allocator.init(self.size_hint)?;
        Ok(allocator)
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIZE_HINT)
    }
}

/// Arena size for a size hint: [`MIN_ARENA_SIZE`] for small hints, otherwise
/// the next power of two.
///
/// # Errors
///
/// [`ArenaError::InvalidSize`] if the hint exceeds [`MAX_ARENA_SIZE`].
pub fn arena_size_for(size_hint: usize) -> Result<u32> {
    if size_hint <= MIN_ARENA_SIZE as usize {
        return Ok(MIN_ARENA_SIZE);
    }
    if size_hint > MAX_ARENA_SIZE as usize {
        return Err(ArenaError::InvalidSize {
            requested: size_hint,
        });
    }
    u32::try_from(size_hint.next_power_of_two()).map_err(|_| ArenaError::InvalidSize {
        requested: size_hint,
    })
}

/// Payload size for a request: at least [`MIN_ALLOCATION`], rounded up to a
/// multiple of [`GRANULARITY`]. `None` if no arena could ever hold it.
pub(crate) fn round_request(n: usize) -> Option<u32> {
    let n = u32::try_from(n).ok()?.max(MIN_ALLOCATION);
    let rounded = n.checked_add(GRANULARITY - 1)? & !(GRANULARITY - 1);
    (rounded <= MAX_ARENA_SIZE).then_some(rounded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_hints_use_minimum() {
        assert_eq!(arena_size_for(0), Ok(MIN_ARENA_SIZE));
        assert_eq!(arena_size_for(1), Ok(MIN_ARENA_SIZE));
        assert_eq!(arena_size_for(1024), Ok(1024));
    }

    #[test]
    fn test_hints_round_up_to_power_of_two() {
        assert_eq!(arena_size_for(1025), Ok(2048));
        assert_eq!(arena_size_for(3000), Ok(4096));
        assert_eq!(arena_size_for(65536), Ok(65536));
        assert_eq!(arena_size_for(MAX_ARENA_SIZE as usize), Ok(MAX_ARENA_SIZE));
    }

    #[test]
    fn test_oversized_hint_rejected() {
        let hint = MAX_ARENA_SIZE as usize + 1;
        assert_eq!(
            arena_size_for(hint),
            Err(ArenaError::InvalidSize { requested: hint })
        );
    }

    #[test]
    fn test_round_request() {
        assert_eq!(round_request(1), Some(8));
        assert_eq!(round_request(8), Some(8));
        assert_eq!(round_request(9), Some(12));
        assert_eq!(round_request(100), Some(100));
        assert_eq!(round_request(101), Some(104));
        assert_eq!(round_request(u32::MAX as usize), None);
    }

    #[test]
    fn test_strategy_preferences() {
        assert!(FitStrategy::BestFit.prefers(64, 96));
        assert!(!FitStrategy::BestFit.prefers(200, 96));
        assert!(FitStrategy::WorstFit.prefers(200, 96));
        assert!(!FitStrategy::FirstFit.prefers(64, 96));

        assert!(FitStrategy::BestFit.settles(64, 64));
        assert!(!FitStrategy::BestFit.settles(96, 64));
        assert!(FitStrategy::FirstFit.settles(96, 64));
        assert!(!FitStrategy::WorstFit.settles(64, 64));
    }

    #[test]
    fn test_config_builder() {
        let config = ArenaConfig::new(5000)
            .with_strategy(FitStrategy::FirstFit)
            .with_abort_on_corruption(true);

        assert_eq!(config.strategy, FitStrategy::FirstFit);
        assert!(config.abort_on_corruption);
        assert_eq!(config.arena_size(), Ok(8192));
        assert_eq!(ArenaConfig::default().arena_size(), Ok(MIN_ARENA_SIZE));
    }
}
