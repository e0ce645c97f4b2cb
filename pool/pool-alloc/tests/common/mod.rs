//! Shared arenas and pool drivers for the integration tests.

#![allow(dead_code)]

use pool_alloc::{BlockInfo, HalfFitAllocator, LinearAllocator, SequentialFitAllocator, WORD};
use std::ptr::NonNull;

/// Backing memory aligned well past what any allocator requires.
#[repr(C, align(64))]
pub struct Arena<const N: usize>(pub [u8; N]);

impl<const N: usize> Arena<N> {
    pub fn boxed() -> Box<Self> {
        Box::new(Self([0; N]))
    }
}

/// What the invariant checks need from an allocator.
pub trait Pool {
    /// Distance from a block header to its payload.
    const PAYLOAD_OFFSET: usize = 2 * WORD;

    fn try_alloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// # Safety
    /// `p` must be a live allocation of this pool.
    unsafe fn release(&self, p: NonNull<u8>);

    fn blocks(&self) -> Vec<BlockInfo>;

    fn total(&self) -> usize;

    fn unused(&self) -> usize;
}

fn collect(walk: impl FnOnce(&mut dyn FnMut(BlockInfo))) -> Vec<BlockInfo> {
    let mut v = Vec::new();
    walk(&mut |b| v.push(b));
    v
}

impl Pool for LinearAllocator<'_> {
    fn try_alloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.alloc(size).ok()
    }

    unsafe fn release(&self, p: NonNull<u8>) {
        unsafe { self.free(p) }.unwrap();
    }

    fn blocks(&self) -> Vec<BlockInfo> {
        collect(|f| self.for_each_block(f))
    }

    fn total(&self) -> usize {
        self.total_size()
    }

    fn unused(&self) -> usize {
        self.unused_size()
    }
}

impl Pool for SequentialFitAllocator<'_> {
    fn try_alloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.alloc(size).ok()
    }

    unsafe fn release(&self, p: NonNull<u8>) {
        unsafe { self.free(p) };
    }

    fn blocks(&self) -> Vec<BlockInfo> {
        collect(|f| self.for_each_block(f))
    }

    fn total(&self) -> usize {
        self.total_size()
    }

    fn unused(&self) -> usize {
        self.unused_size()
    }
}

impl Pool for HalfFitAllocator<'_> {
    fn try_alloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.alloc(size).ok()
    }

    unsafe fn release(&self, p: NonNull<u8>) {
        unsafe { self.free(p) };
    }

    fn blocks(&self) -> Vec<BlockInfo> {
        collect(|f| self.for_each_block(f))
    }

    fn total(&self) -> usize {
        self.total_size()
    }

    fn unused(&self) -> usize {
        self.unused_size()
    }
}

/// Blocks must tile `[first, region_len)` without gaps, and their sizes must
/// add up to the pool total.
pub fn assert_partition(blocks: &[BlockInfo], region_len: usize, total: usize) {
    let first = blocks.first().expect("a pool always has a block").offset;
    assert_eq!(region_len - first, total, "blocks do not start at the pool");
    let mut at = first;
    for b in blocks {
        assert_eq!(b.offset, at, "gap or overlap before {b:?}");
        at = b.end();
    }
    assert_eq!(at, region_len, "blocks do not reach the region end");
    assert_eq!(blocks.iter().map(|b| b.size).sum::<usize>(), total);
}

/// Every live payload offset must sit in a distinct used block.
pub fn assert_live_blocks_used(blocks: &[BlockInfo], payloads: &[usize], payload_offset: usize) {
    for &payload in payloads {
        let block = blocks
            .iter()
            .find(|b| b.offset + payload_offset == payload)
            .unwrap_or_else(|| panic!("payload {payload:#x} has no block"));
        assert!(!block.is_free(), "live payload {payload:#x} in a free block");
    }
    let mut sorted = payloads.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), payloads.len(), "two live allocations share a block");
}
