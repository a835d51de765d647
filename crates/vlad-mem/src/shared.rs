//! Thread-safe access to one arena.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::arena::Allocator;
use crate::config::ArenaConfig;
use crate::error::Result;
use crate::handle::Handle;
use crate::inspect::ArenaStats;

/// An [`Allocator`] behind a mutex.
///
/// Every operation holds the lock for its full duration, so operations from
/// different threads never interleave. A panic while the lock is held does
/// not make the arena unusable: the allocator keeps its own poison flag for
/// detected corruption, and that is the only one honoured here.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use vlad_mem::{ArenaConfig, SharedAllocator};
///
/// let shared = Arc::new(SharedAllocator::new(ArenaConfig::new(4096)).unwrap());
///
/// let workers: Vec<_> = (0..4)
///     .map(|_| {
///         let shared = Arc::clone(&shared);
///         thread::spawn(move || {
///             let handle = shared.allocate(64).unwrap();
///             shared.deallocate(handle).unwrap();
///         })
///     })
///     .collect();
/// for worker in workers {
///     worker.join().unwrap();
/// }
///
/// assert_eq!(shared.stats().unwrap().free_blocks, 1);
/// ```
#[derive(Debug, Default)]
pub struct SharedAllocator {
    inner: Mutex<Allocator>,
}

impl SharedAllocator {
    /// Builds and initialises an allocator from `config`.
    ///
    /// # Errors
    ///
    /// As for [`ArenaConfig::build`].
    pub fn new(config: ArenaConfig) -> Result<Self> {
        Ok(Self::from_allocator(config.build()?))
    }

    /// Wraps an existing allocator, initialised or not.
    #[must_use]
    pub fn from_allocator(allocator: Allocator) -> Self {
        SharedAllocator {
            inner: Mutex::new(allocator),
        }
    }

    /// Exclusive access to the allocator for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, Allocator> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with the lock held.
    pub fn with<R>(&self, f: impl FnOnce(&mut Allocator) -> R) -> R {
        f(&mut self.lock())
    }

    /// See [`Allocator::init`].
    ///
    /// # Errors
    ///
    /// As for [`Allocator::init`].
    pub fn init(&self, size_hint: usize) -> Result<()> {
        self.lock().init(size_hint)
    }

    /// See [`Allocator::allocate`].
    ///
    /// # Errors
    ///
    /// As for [`Allocator::allocate`].
    pub fn allocate(&self, n: usize) -> Result<Handle> {
        self.lock().allocate(n)
    }

    /// See [`Allocator::deallocate`].
    ///
    /// # Errors
    ///
    /// As for [`Allocator::deallocate`].
    pub fn deallocate(&self, handle: Handle) -> Result<()> {
        self.lock().deallocate(handle)
    }

    /// See [`Allocator::stats`].
    ///
    /// # Errors
    ///
    /// As for [`Allocator::stats`].
    pub fn stats(&self) -> Result<ArenaStats> {
        self.lock().stats()
    }

    /// See [`Allocator::shutdown`].
    ///
    /// # Errors
    ///
    /// As for [`Allocator::shutdown`].
    pub fn shutdown(&self) -> Result<()> {
        self.lock().shutdown()
    }

    /// Unwraps the allocator.
    #[must_use]
    pub fn into_inner(self) -> Allocator {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<Allocator> for SharedAllocator {
    fn from(allocator: Allocator) -> Self {
        Self::from_allocator(allocator)
    }
}
