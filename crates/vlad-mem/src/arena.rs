//! The arena allocator.
//!
//! An [`Allocator`] reserves one power-of-two block of memory at
//! [`init`](Allocator::init) and serves every later request from it.
//!
//! # Layout
//!
//! The arena is always exactly partitioned into blocks. Each block starts
//! with a header (see [`crate::header`]); free blocks additionally carry the
//! `next`/`prev` offsets of a circular doubly-linked free list:
//!
//! ```text
//!   0                                                               S
//!   ┌────────┬───────────┬──────────────┬────────┬─────────────────┐
//!   │ ALLOC  │   FREE    │    ALLOC     │ ALLOC  │      FREE       │
//!   └────────┴───────────┴──────────────┴────────┴─────────────────┘
//!               ▲   │                                ▲     │
//!               │   └──────────── next ──────────────┘     │
//!               └───────────────── next ───────────────────┘
//! ```
//!
//! # Operations
//!
//! - **allocate**: walk the free list once from the head, pick a block with
//!   the configured [`FitStrategy`], split off the unused tail as a new free
//!   block when it can hold a free header, otherwise hand out the whole
//!   block.
//! - **deallocate**: validate the handle's tag, re-tag the block free, link
//!   it next to the head and coalesce with physically adjacent free blocks
//!   until none are left.
//!
//! # Fatal errors
//!
//! A corrupt free list, a double free or a forged handle poisons the
//! allocator: the error is logged, returned, and every later operation
//! except [`shutdown`](Allocator::shutdown) fails with
//! [`ArenaError::Poisoned`]. The free list is never repaired, since the
//! extent of the damage is unknown. With
//! [`ArenaConfig::with_abort_on_corruption`] the process aborts instead.

use vlad_log::{debug, error, info, trace, warn};

use crate::config::{ArenaConfig, FitStrategy, GRANULARITY, MIN_ALLOCATION, arena_size_for, round_request};
use crate::error::{ArenaError, Corruption, Result};
use crate::handle::Handle;
use crate::header::{self, ALLOC_HEADER_SIZE, FREE_HEADER_SIZE, Links, Tag};
use crate::region::Region;

/// Smallest block that can exist: an allocated header plus the minimum
/// payload. A free header fits in it exactly.
pub(crate) const MIN_BLOCK_SIZE: u32 = ALLOC_HEADER_SIZE + MIN_ALLOCATION;

/// A decoded free-list node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeNode {
    pub offset: u32,
    pub size: u32,
    pub next: u32,
    pub prev: u32,
}

/// Outcome of a free-list search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fit {
    Found(FreeNode),
    NoneFits { largest: u32 },
}

/// One pass around the free list.
///
/// Every node is decoded and validated before it is yielded, and each node
/// must link back to the one before it. The walk is bounded by the number of
/// free blocks the arena could possibly hold; a list that has not returned
/// to its start by then is reported as [`Corruption::Cycle`]. The iterator
/// stops after the first error.
pub(crate) struct FreeList<'a> {
    state: &'a ArenaState,
    start: u32,
    next: Option<u32>,
    prev: Option<u32>,
    remaining: u32,
}

impl FreeList<'_> {
    fn fail(&mut self, err: ArenaError) -> Option<Result<FreeNode>> {
        self.next = None;
        Some(Err(err))
    }
}

impl Iterator for FreeList<'_> {
    type Item = Result<FreeNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next?;
        if self.remaining == 0 {
            return self.fail(ArenaError::corrupted(self.start, Corruption::Cycle));
        }
        self.remaining -= 1;

        let node = match self.state.free_node(offset) {
            Ok(node) => node,
            Err(err) => return self.fail(err),
        };
        if self.prev.is_some_and(|prev| node.prev != prev) {
            return self.fail(ArenaError::corrupted(offset, Corruption::BrokenLink));
        }

        self.prev = Some(offset);
        self.next = (node.next != self.start).then_some(node.next);
        Some(Ok(node))
    }
}

/// State that exists only while the allocator is initialised.
#[derive(Debug)]
pub(crate) struct ArenaState {
    pub region: Region,
    /// Some free block, or `None` when every byte is allocated.
    pub head: Option<u32>,
    pub poisoned: bool,
}

impl ArenaState {
    fn new(size: u32) -> Result<Self> {
        let mut region = Region::reserve(size)?;
        header::write_free(region.bytes_mut(), 0, size, Links { next: 0, prev: 0 })
            .ok_or(ArenaError::corrupted(0, Corruption::OutOfBounds))?;

        Ok(ArenaState {
            region,
            head: Some(0),
            poisoned: false,
        })
    }

    pub fn size(&self) -> u32 {
        self.region.len()
    }

    /// Most free blocks the arena can hold; bounds every list walk.
    pub fn max_nodes(&self) -> u32 {
        self.size() / FREE_HEADER_SIZE
    }

    /// Decodes and bounds-checks the header at `offset`.
    pub fn block_header(&self, offset: u32) -> Result<(Tag, u32)> {
        let raw = header::read_raw(self.region.bytes(), offset)
            .ok_or(ArenaError::corrupted(offset, Corruption::OutOfBounds))?;
        let tag = Tag::from_raw(raw.tag).ok_or(ArenaError::corrupted(
            offset,
            Corruption::BadTag { found: raw.tag },
        ))?;

        if raw.size < MIN_BLOCK_SIZE || raw.size % GRANULARITY != 0 {
            return Err(ArenaError::corrupted(
                offset,
                Corruption::BadSize { size: raw.size },
            ));
        }
        if u64::from(offset) + u64::from(raw.size) > u64::from(self.size()) {
            return Err(ArenaError::corrupted(offset, Corruption::OutOfBounds));
        }

        Ok((tag, raw.size))
    }

    /// Decodes the free block at `offset`, rejecting anything that is not a
    /// well-formed free-list node.
    pub fn free_node(&self, offset: u32) -> Result<FreeNode> {
        let (tag, size) = self.block_header(offset)?;
        if tag != Tag::Free {
            return Err(ArenaError::corrupted(
                offset,
                Corruption::AllocatedInFreeList,
            ));
        }

        let links = header::read_links(self.region.bytes(), offset)
            .ok_or(ArenaError::corrupted(offset, Corruption::OutOfBounds))?;
        if links.next >= self.size() || links.prev >= self.size() {
            return Err(ArenaError::corrupted(offset, Corruption::OutOfBounds));
        }

        Ok(FreeNode {
            offset,
            size,
            next: links.next,
            prev: links.prev,
        })
    }

    /// Walks the circular free list once, starting at `start`.
    pub fn free_list(&self, start: u32) -> FreeList<'_> {
        FreeList {
            state: self,
            start,
            next: Some(start),
            prev: None,
            remaining: self.max_nodes(),
        }
    }

    /// The allocated block a caller handle refers to, as `(offset, size)`.
    pub fn allocated_block(&self, handle: Handle) -> Result<(u32, u32)> {
        let invalid = ArenaError::InvalidHandle {
            handle: handle.into_raw(),
        };
        let Some(block) = handle.block() else {
            return Err(invalid);
        };
        if block % GRANULARITY != 0 {
            return Err(invalid);
        }

        match self.block_header(block) {
            Ok((Tag::Allocated, size)) => Ok((block, size)),
            Ok((Tag::Free, _)) => Err(ArenaError::DoubleFree {
                handle: handle.into_raw(),
            }),
            Err(_) => Err(invalid),
        }
    }

    fn write_free(&mut self, offset: u32, size: u32, links: Links) -> Result<()> {
        header::write_free(self.region.bytes_mut(), offset, size, links)
            .ok_or(ArenaError::corrupted(offset, Corruption::OutOfBounds))
    }

    fn write_allocated(&mut self, offset: u32, size: u32) -> Result<()> {
        header::write_allocated(self.region.bytes_mut(), offset, size)
            .ok_or(ArenaError::corrupted(offset, Corruption::OutOfBounds))
    }

    fn set_size(&mut self, offset: u32, size: u32) -> Result<()> {
        header::write_size(self.region.bytes_mut(), offset, size)
            .ok_or(ArenaError::corrupted(offset, Corruption::OutOfBounds))
    }

    fn set_next(&mut self, offset: u32, next: u32) -> Result<()> {
        header::write_next(self.region.bytes_mut(), offset, next)
            .ok_or(ArenaError::corrupted(offset, Corruption::OutOfBounds))
    }

    fn set_prev(&mut self, offset: u32, prev: u32) -> Result<()> {
        header::write_prev(self.region.bytes_mut(), offset, prev)
            .ok_or(ArenaError::corrupted(offset, Corruption::OutOfBounds))
    }

    /// Walks the free list once from the head and picks a block of at least
    /// `need` bytes.
    fn find_fit(&self, need: u32, strategy: FitStrategy) -> Result<Fit> {
        let Some(head) = self.head else {
            return Ok(Fit::NoneFits { largest: 0 });
        };

        let mut chosen: Option<FreeNode> = None;
        let mut largest = 0;

        // The first node decoded is the head, so a head that is not tagged
        // FREE is reported before any block is considered.
        for node in self.free_list(head) {
            let node = node?;
            trace!("visit free block {} ({} bytes)", node.offset, node.size);
            largest = largest.max(node.size);

            if node.size >= need
                && chosen.is_none_or(|best| strategy.prefers(node.size, best.size))
            {
                chosen = Some(node);
                if strategy.settles(node.size, need) {
                    break;
                }
            }
        }

        Ok(match chosen {
            Some(node) => Fit::Found(node),
            None => Fit::NoneFits { largest },
        })
    }

    /// Removes `node` from the list. The caller fixes up the head.
    fn unlink(&mut self, node: &FreeNode) -> Result<()> {
        self.set_next(node.prev, node.next)?;
        self.set_prev(node.next, node.prev)
    }

    /// Turns the chosen free block into an allocated block of `need` bytes
    /// (or the whole block) and returns the allocated block size.
    fn take(&mut self, node: FreeNode, need: u32) -> Result<u32> {
        let remainder = node.size - need;

        let size = if remainder >= FREE_HEADER_SIZE {
            let tail = node.offset + need;
            let alone = node.next == node.offset;
            let links = if alone {
                Links {
                    next: tail,
                    prev: tail,
                }
            } else {
                Links {
                    next: node.next,
                    prev: node.prev,
                }
            };

            self.write_free(tail, remainder, links)?;
            self.set_next(links.prev, tail)?;
            self.set_prev(links.next, tail)?;
            if self.head == Some(node.offset) {
                self.head = Some(tail);
            }

            debug!(
                "split block {} ({} bytes): {} allocated, {} free at {}",
                node.offset, node.size, need, remainder, tail
            );
            need
        } else {
            if node.next == node.offset {
                self.head = None;
            } else {
                self.unlink(&node)?;
                if self.head == Some(node.offset) {
                    self.head = Some(node.next);
                }
            }
            node.size
        };

        self.write_allocated(node.offset, size)?;
        Ok(size)
    }

    fn allocate(&mut self, n: usize, strategy: FitStrategy) -> Result<Handle> {
        // Requests too large for any arena still get an exhaustion report.
        let need = round_request(n)
            .and_then(|payload| payload.checked_add(ALLOC_HEADER_SIZE))
            .unwrap_or(u32::MAX);

        match self.find_fit(need, strategy)? {
            Fit::Found(node) => {
                let size = self.take(node, need)?;
                let handle = Handle::for_block(node.offset);
                debug!("allocate({n}) -> {handle}, block {} of {size} bytes", node.offset);
                Ok(handle)
            }
            Fit::NoneFits { largest } => Err(ArenaError::Exhausted {
                requested: need,
                largest_free: largest,
            }),
        }
    }

    /// Links the free block at `offset` in next to the head. The lowest
    /// address seen becomes the head.
    fn insert(&mut self, offset: u32, size: u32) -> Result<()> {
        let Some(head) = self.head else {
            self.write_free(
                offset,
                size,
                Links {
                    next: offset,
                    prev: offset,
                },
            )?;
            self.head = Some(offset);
            return Ok(());
        };

        let head_node = self.free_node(head)?;
        self.write_free(
            offset,
            size,
            Links {
                next: head,
                prev: head_node.prev,
            },
        )?;
        self.set_next(head_node.prev, offset)?;
        self.set_prev(head, offset)?;

        if offset < head {
            self.head = Some(offset);
        }
        Ok(())
    }

    /// Finds the free blocks physically adjacent to `node`:
    /// `(successor, predecessor)`.
    fn free_neighbours(&self, node: &FreeNode) -> Result<(Option<FreeNode>, Option<FreeNode>)> {
        let end = node.offset + node.size;
        let mut successor = None;
        let mut predecessor = None;

        for current in self.free_list(node.offset) {
            let current = current?;
            if current.offset == end {
                successor = Some(current);
            } else if current.offset + current.size == node.offset {
                predecessor = Some(current);
            }
        }

        Ok((successor, predecessor))
    }

    /// Merges the free block at `offset` with its free neighbours until no
    /// free block borders it. Returns the offset of the merged block.
    fn coalesce(&mut self, mut offset: u32) -> Result<u32> {
        // Every merge removes one node, so this bound is never reached on a
        // healthy list.
        for _ in 0..=self.max_nodes() {
            let node = self.free_node(offset)?;
            let (successor, predecessor) = self.free_neighbours(&node)?;
            if successor.is_none() && predecessor.is_none() {
                return Ok(offset);
            }

            if let Some(next) = successor {
                self.unlink(&next)?;
                if self.head == Some(next.offset) {
                    self.head = Some(offset);
                }
                self.set_size(offset, node.size + next.size)?;
                debug!(
                    "merge block {} into {} ({} bytes)",
                    next.offset,
                    offset,
                    node.size + next.size
                );
            }

            if let Some(prev) = predecessor {
                let merged = self.free_node(offset)?;
                self.unlink(&merged)?;
                if self.head == Some(offset) {
                    self.head = Some(prev.offset);
                }
                self.set_size(prev.offset, prev.size + merged.size)?;
                debug!(
                    "merge block {} into {} ({} bytes)",
                    offset,
                    prev.offset,
                    prev.size + merged.size
                );
                offset = prev.offset;
            }
        }

        Err(ArenaError::corrupted(offset, Corruption::Cycle))
    }

    fn deallocate(&mut self, handle: Handle) -> Result<()> {
        let (block, size) = self.allocated_block(handle)?;
        self.insert(block, size)?;
        let merged = self.coalesce(block)?;
        debug!("deallocate({handle}): block {block} freed, merged into {merged}");
        Ok(())
    }
}

/// A fixed-size arena sub-allocator.
///
/// All methods take `&mut self` (or `&self` for reads), so one instance is
/// only ever used by one caller at a time. `Allocator` is `Send` but not
/// `Sync`; wrap it in [`SharedAllocator`](crate::SharedAllocator) to share
/// it between threads.
///
/// # Examples
///
/// ```
/// use vlad_mem::Allocator;
///
/// let mut alloc = Allocator::new();
/// alloc.init(1024).unwrap();
///
/// let handle = alloc.allocate(100).unwrap();
/// alloc.payload_mut(handle).unwrap()[..5].copy_from_slice(b"hello");
/// assert_eq!(&alloc.payload(handle).unwrap()[..5], b"hello");
///
/// let stats = alloc.stats().unwrap();
/// assert_eq!(stats.free_bytes, 1024 - (8 + 100));
///
/// alloc.deallocate(handle).unwrap();
/// assert_eq!(alloc.stats().unwrap().largest_free, 1024);
///
/// alloc.shutdown().unwrap();
/// ```
#[derive(Debug, Default)]
pub struct Allocator {
    config: ArenaConfig,
    state: Option<ArenaState>,
}

impl Allocator {
    /// Creates an uninitialised allocator with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an uninitialised allocator with `config`. The config's size
    /// hint is only used by [`ArenaConfig::build`]; [`init`](Self::init)
    /// takes its own.
    #[must_use]
    pub fn with_config(config: ArenaConfig) -> Self {
        Allocator {
            config,
            state: None,
        }
    }

    /// The configuration this allocator was created with.
    #[must_use]
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Whether [`init`](Self::init) has run and [`shutdown`](Self::shutdown)
    /// has not.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Whether a fatal error has been reported since the last init.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.poisoned)
    }

    /// Arena size in bytes, if initialised.
    #[must_use]
    pub fn arena_size(&self) -> Option<u32> {
        self.state.as_ref().map(ArenaState::size)
    }

    /// Reserves the arena.
    ///
    /// The size is [`MIN_ARENA_SIZE`](crate::MIN_ARENA_SIZE) for small hints
    /// and the next power of two otherwise. Calling `init` on an initialised
    /// allocator does nothing, whatever the hint; shut down first to change
    /// the size.
    ///
    /// If the system cannot provide the memory the process is terminated.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidSize`] if the hint exceeds
    /// [`MAX_ARENA_SIZE`](crate::MAX_ARENA_SIZE).
    pub fn init(&mut self, size_hint: usize) -> Result<()> {
        if let Some(state) = &self.state {
            debug!(
                "init({size_hint}) ignored: arena already holds {} bytes",
                state.size()
            );
            return Ok(());
        }

        let size = arena_size_for(size_hint)?;
        self.state = Some(ArenaState::new(size)?);
        info!("arena initialised: {size} bytes (hint {size_hint})");
        Ok(())
    }

    /// Allocates at least `n` bytes.
    ///
    /// `n` is rounded up to 8 bytes and then to a multiple of 4; the block
    /// may be larger still when its remainder is too small to split off.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::Exhausted`] if no free block is large enough. The arena
    ///   is left unchanged.
    /// - [`ArenaError::InvalidSize`] for `n == 0`.
    /// - [`ArenaError::Corrupted`] (fatal) if the free list is damaged.
    /// - [`ArenaError::Uninitialized`], [`ArenaError::Poisoned`].
    pub fn allocate(&mut self, n: usize) -> Result<Handle> {
        let strategy = self.config.strategy;
        let state = self.live_mut()?;
        if n == 0 {
            return Err(ArenaError::InvalidSize { requested: n });
        }

        let result = state.allocate(n, strategy);
        result.map_err(|err| self.report(err))
    }

    /// Returns the allocation behind `handle` to the arena and merges it with
    /// adjacent free blocks.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::DoubleFree`] (fatal) if the block is already free.
    /// - [`ArenaError::InvalidHandle`] (fatal) if `handle` does not name an
    ///   allocated block.
    /// - [`ArenaError::Corrupted`] (fatal) if the free list is damaged.
    /// - [`ArenaError::Uninitialized`], [`ArenaError::Poisoned`].
    pub fn deallocate(&mut self, handle: Handle) -> Result<()> {
        let state = self.live_mut()?;
        let result = state.deallocate(handle);
        result.map_err(|err| self.report(err))
    }

    /// Releases the arena. The allocator can be initialised again afterwards.
    ///
    /// Accepted on a poisoned allocator.
    ///
    /// # Errors
    ///
    /// [`ArenaError::Uninitialized`] if there is no arena to release.
    pub fn shutdown(&mut self) -> Result<()> {
        let state = self.state.take().ok_or(ArenaError::Uninitialized)?;
        info!(
            "arena released: {} bytes{}",
            state.size(),
            if state.poisoned { " (poisoned)" } else { "" }
        );
        Ok(())
    }

    /// Usable bytes behind `handle`: the block size minus its header.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] or [`ArenaError::DoubleFree`] if the
    /// handle is not live. Unlike in [`deallocate`](Self::deallocate), these
    /// do not poison the allocator.
    pub fn usable_size(&self, handle: Handle) -> Result<usize> {
        let (_, size) = self.live()?.allocated_block(handle)?;
        Ok((size - ALLOC_HEADER_SIZE) as usize)
    }

    /// The payload bytes of a live allocation.
    ///
    /// # Errors
    ///
    /// As for [`usable_size`](Self::usable_size).
    pub fn payload(&self, handle: Handle) -> Result<&[u8]> {
        let state = self.live()?;
        let (block, size) = state.allocated_block(handle)?;
        state
            .region
            .bytes()
            .get(handle.into_raw() as usize..(block + size) as usize)
            .ok_or(ArenaError::InvalidHandle {
                handle: handle.into_raw(),
            })
    }

    /// The payload bytes of a live allocation, writable.
    ///
    /// # Errors
    ///
    /// As for [`usable_size`](Self::usable_size).
    pub fn payload_mut(&mut self, handle: Handle) -> Result<&mut [u8]> {
        let state = self.live_mut()?;
        let (block, size) = state.allocated_block(handle)?;
        state
            .region
            .bytes_mut()
            .get_mut(handle.into_raw() as usize..(block + size) as usize)
            .ok_or(ArenaError::InvalidHandle {
                handle: handle.into_raw(),
            })
    }

    /// State of a usable allocator.
    pub(crate) fn live(&self) -> Result<&ArenaState> {
        match &self.state {
            None => Err(ArenaError::Uninitialized),
            Some(state) if state.poisoned => Err(ArenaError::Poisoned),
            Some(state) => Ok(state),
        }
    }

    fn live_mut(&mut self) -> Result<&mut ArenaState> {
        match &mut self.state {
            None => Err(ArenaError::Uninitialized),
            Some(state) if state.poisoned => Err(ArenaError::Poisoned),
            Some(state) => Ok(state),
        }
    }

    #[cfg(test)]
    pub(crate) fn raw_bytes_mut(&mut self) -> &mut [u8] {
        match self.state.as_mut() {
            Some(state) => state.region.bytes_mut(),
            None => &mut [],
        }
    }

    /// Logs `err` and applies the fatal-error policy.
    fn report(&mut self, err: ArenaError) -> ArenaError {
        if err.is_fatal() {
            log_fatal(&err);
            if self.config.abort_on_corruption {
                std::process::abort();
            }
            if let Some(state) = self.state.as_mut() {
                state.poisoned = true;
            }
        } else if let ArenaError::Exhausted { .. } = err {
            warn!("{err}");
        }
        err
    }
}

#[cfg(feature = "fatal_backtrace")]
fn log_fatal(err: &ArenaError) {
    error!("{err}\n{:?}", backtrace::Backtrace::new());
}

#[cfg(not(feature = "fatal_backtrace"))]
fn log_fatal(err: &ArenaError) {
    error!("{err}");
}
