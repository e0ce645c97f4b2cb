//! # In-place pool allocators
//!
//! Allocators that carve a caller-owned byte region into variable-size blocks,
//! for targets without an operating-system heap. Every allocator is `const`
//! constructible, so it can live in a `static`, and takes its region over with
//! `initialize`:
//!
//! ```
//! use pool_alloc::HalfFitAllocator;
//!
//! #[repr(C, align(64))]
//! struct Arena([u8; 4096]);
//!
//! static POOL: HalfFitAllocator<'static> = HalfFitAllocator::new();
//!
//! let arena = Box::leak(Box::new(Arena([0; 4096])));
//! POOL.initialize(&mut arena.0);
//!
//! let p = POOL.alloc(100).expect("fresh pool");
//! unsafe { POOL.free(p) };
//! assert_eq!(POOL.unused_size(), POOL.total_size());
//! ```
//!
//! | Allocator                  | Occupancy        | Coalescing                | Guard                       |
//! |----------------------------|------------------|---------------------------|-----------------------------|
//! | [`LinearAllocator`]        | used/free word   | lazy, one neighbour       | interrupts masked           |
//! | [`SequentialFitAllocator`] | reference count  | lazy, exhaustive          | interrupts masked, fences   |
//! | [`HalfFitAllocator`]       | free lists       | eager, both neighbours    | [`SpinLock`](pool_sync::SpinLock) |
//! | [`AutoLinAlloc`]           | reference count  | lazy, exhaustive          | spin flag                   |
//!
//! Running out of memory is reported as [`AllocError`]. Contract violations
//! (foreign pointers, corrupted headers, re-initialization) panic.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod auto_lin;
mod counted;
mod error;
mod global;
mod half_fit;
mod linear;
mod raw;
mod region;
mod seq_fit;

pub use auto_lin::{AutoLinAlloc, SharedPtr};
pub use error::{AllocError, FreeError};
pub use global::GlobalPool;
pub use half_fit::HalfFitAllocator;
pub use linear::LinearAllocator;
pub use raw::RawAllocator;
pub use region::WORD;
pub use seq_fit::SequentialFitAllocator;

/// One block of a pool, as reported by the `for_each_block` walkers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// Byte offset of the block header from the region start.
    pub offset: usize,
    /// Total block size, header included.
    pub size: usize,
    /// Owners of the block; `0` when free. Binary-state blocks report `1` when used.
    pub ref_count: usize,
}

impl BlockInfo {
    #[inline]
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.ref_count == 0
    }

    /// Offset one past the end of the block.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.size
    }
}
