//! # `GlobalAlloc` adapter
//!
//! Lets any [`RawAllocator`] back `alloc::` collections, e.g. as the
//! `#[global_allocator]` of a firmware image:
//!
//! ```ignore
//! use pool_alloc::{GlobalPool, HalfFitAllocator};
//!
//! #[global_allocator]
//! static HEAP: GlobalPool<HalfFitAllocator<'static>> = GlobalPool::new(HalfFitAllocator::new());
//!
//! #[repr(align(64))]
//! struct HeapMem([u8; 64 * 1024]);
//! static mut HEAP_MEM: HeapMem = HeapMem([0; 64 * 1024]);
//!
//! fn init_heap() {
//!     // Safety: the only reference ever taken to the heap memory.
//!     HEAP.initialize(unsafe { &mut (*(&raw mut HEAP_MEM)).0 });
//! }
//! ```
//!
//! Layouts aligned beyond [`RawAllocator::ALIGN`] cannot be served and get a
//! null pointer, as does an exhausted pool. The layout size is not needed to
//! free a block; every block records its own.

use crate::RawAllocator;
use core::alloc::{GlobalAlloc, Layout};
use core::ops::Deref;
use core::ptr::{self, NonNull};
use log::trace;

/// Wraps a pool allocator for use as a `#[global_allocator]`.
///
/// # Panics
/// Contract violations inside the pool (a foreign pointer, a double free, a
/// corrupted header) panic, and `GlobalAlloc` methods must not unwind. Build
/// the embedding image with `panic = "abort"` so such a panic halts instead.
pub struct GlobalPool<A> {
    pool: A,
}

impl<A> GlobalPool<A> {
    pub const fn new(pool: A) -> Self {
        Self { pool }
    }
}

impl<A> Deref for GlobalPool<A> {
    type Target = A;

    fn deref(&self) -> &A {
        &self.pool
    }
}

unsafe impl<A: RawAllocator + Sync> GlobalAlloc for GlobalPool<A> {
    /// # Safety
    /// The `GlobalAlloc` contract applies. Caller must handle a null return (OOM).
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > A::ALIGN {
            trace!(
                "layout alignment {} exceeds the pool's {}",
                layout.align(),
                A::ALIGN
            );
            return ptr::null_mut();
        }
        self.pool
            .allocate(layout.size())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// # Safety
    /// The `GlobalAlloc` contract applies. `ptr` must come from [`Self::alloc`].
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            // Safety: forwarded from the caller.
            unsafe { self.pool.deallocate(ptr) };
        }
    }
}
