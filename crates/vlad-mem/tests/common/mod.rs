// Common test utilities for integration tests
//
// Shared fixtures and structural assertions used by every integration test.

#![allow(dead_code)]

use vlad_mem::{Allocator, ArenaConfig, BlockInfo, FitStrategy, Handle};

/// Every strategy the allocator supports.
pub const STRATEGIES: [FitStrategy; 3] = [
    FitStrategy::BestFit,
    FitStrategy::WorstFit,
    FitStrategy::FirstFit,
];

/// Creates an initialised allocator with the default strategy.
pub fn arena(size_hint: usize) -> Allocator {
    ArenaConfig::new(size_hint)
        .build()
        .expect("Failed to initialise arena")
}

/// Creates an initialised allocator using `strategy`.
pub fn arena_with(size_hint: usize, strategy: FitStrategy) -> Allocator {
    ArenaConfig::new(size_hint)
        .with_strategy(strategy)
        .build()
        .expect("Failed to initialise arena")
}

/// Collects the physical block walk, panicking on corruption.
pub fn blocks(alloc: &Allocator) -> Vec<BlockInfo> {
    alloc
        .blocks()
        .expect("Arena not live")
        .collect::<Result<_, _>>()
        .expect("Block walk hit a damaged header")
}

/// Asserts the arena is healthy: the blocks tile it exactly and the full
/// invariant check passes.
pub fn assert_healthy(alloc: &Allocator) {
    let blocks = blocks(alloc);
    let mut expected = 0;
    for block in &blocks {
        assert_eq!(block.offset, expected, "gap or overlap at {}", block.offset);
        expected = block.end();
    }
    assert_eq!(Some(expected), alloc.arena_size());
    alloc
        .check_invariants()
        .expect("Arena invariants violated");
}

/// Asserts the arena is back to one free block spanning all of it.
pub fn assert_pristine(alloc: &Allocator) {
    let stats = alloc.stats().expect("Arena not live");
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(Some(stats.largest_free), alloc.arena_size());
    assert_eq!(stats.head, Some(0));
}

/// Fills the payload of `handle` with `byte`.
pub fn fill(alloc: &mut Allocator, handle: Handle, byte: u8) {
    alloc
        .payload_mut(handle)
        .expect("Handle not live")
        .fill(byte);
}

/// Asserts every payload byte of `handle` is still `byte`.
pub fn assert_filled(alloc: &Allocator, handle: Handle, byte: u8) {
    let payload = alloc.payload(handle).expect("Handle not live");
    assert!(
        payload.iter().all(|&b| b == byte),
        "payload of {handle} was overwritten"
    );
}
