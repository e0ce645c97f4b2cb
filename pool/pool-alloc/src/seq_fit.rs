//! Next-fit allocator over reference-counted blocks.
//!
//! Allocation is serialized with interrupts masked, bracketed by an acquire
//! fence on entry and a release fence on exit. Freeing is a single
//! release-ordered `1 -> 0` exchange on the block's reference count and never
//! takes the lock, so it is safe to call from an interrupt handler that
//! preempted an allocation in progress. The next allocation scan sees the
//! block as free and coalesces it lazily.

use crate::counted::{self, CountedPool, HEADER_SIZE, REF_COUNT};
use crate::region::{Region, RegionSlot, WORD};
use crate::{AllocError, BlockInfo};
use core::ptr::NonNull;
use core::sync::atomic::{Ordering, fence};
use log::{debug, trace};
use pool_sync::SpinMutex;

/// Next-fit allocator whose blocks carry an atomic reference count.
pub struct SequentialFitAllocator<'a> {
    inner: SpinMutex<Option<CountedPool<'a>>>,
    /// The region, for `free` and `is_in_use`, which do not lock.
    shared: RegionSlot<'a>,
}

impl<'a> SequentialFitAllocator<'a> {
    pub const HEADER_SIZE: usize = HEADER_SIZE;
    pub const MIN_BLOCK_SIZE: usize = counted::MIN_BLOCK_SIZE;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: SpinMutex::new(None),
            shared: RegionSlot::empty(),
        }
    }

    /// Takes `memory` over as a single free block.
    ///
    /// # Panics
    /// If already initialized, if `memory` is not word-aligned in start and
    /// length, or if it cannot hold one minimum block.
    pub fn initialize(&self, memory: &'a mut [u8]) {
        let mut inner = self.inner.lock_irq();
        assert!(inner.is_none(), "sequential-fit allocator initialized twice");
        let pool = CountedPool::new(Region::new(memory, WORD));
        self.shared.publish(pool.region);
        debug!("sequential-fit allocator managing {} bytes", pool.len());
        *inner = Some(pool);
    }

    /// Gives the region back.
    ///
    /// # Panics
    /// If not initialized or if any block is still allocated.
    pub fn uninitialize(&self) {
        let mut inner = self.inner.lock_irq();
        let Some(pool) = inner.as_ref() else {
            panic!("sequential-fit allocator not initialized");
        };
        let unused = pool.unused_size();
        assert_eq!(
            unused,
            pool.len(),
            "sequential-fit allocator uninitialized with {} bytes in use",
            pool.len() - unused
        );
        self.shared.clear();
        *inner = None;
        debug!("sequential-fit allocator released its region");
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.lock_irq().is_some()
    }

    /// Allocates at least `size` bytes, word-aligned.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] once the scan has travelled the whole pool
    /// without finding a large enough free run.
    ///
    /// # Panics
    /// If not initialized, or on a corrupted block header.
    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let mut inner = self.inner.lock_irq();
        fence(Ordering::Acquire);
        let Some(pool) = inner.as_mut() else {
            panic!("sequential-fit allocator not initialized");
        };
        let result = next_fit(pool, size).map(|block| {
            trace!("sequential-fit alloc {size} bytes at {block:#x}");
            pool.payload(block)
        });
        fence(Ordering::Release);
        if let Err(e) = &result {
            debug!("sequential-fit alloc of {size} bytes failed: {e}");
        }
        result
    }

    /// Releases the block behind `ptr` without taking the allocation lock.
    ///
    /// # Panics
    /// If not initialized, if `ptr` lies outside the region, or if the block's
    /// reference count is not exactly one.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`alloc`](Self::alloc) on this
    /// allocator, must not have been freed already, and must not be used
    /// after this call.
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        let region = self.published();
        let block = CountedPool::block_of(&region, ptr);
        // Release: the caller's writes to the payload happen-before the block
        // is observed free by the next allocation scan.
        if let Err(count) =
            region
                .word(block + REF_COUNT)
                .compare_exchange(1, 0, Ordering::Release, Ordering::Relaxed)
        {
            panic!("freeing block at offset {block:#x} with reference count {count}");
        }
        trace!("sequential-fit free at {block:#x}");
    }

    /// Whether the block behind `ptr` is currently allocated. Does not lock.
    ///
    /// # Panics
    /// If not initialized or if `ptr` lies outside the region.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`alloc`](Self::alloc) on this
    /// allocator, and no later allocation may have reused its block.
    #[must_use]
    pub unsafe fn is_in_use(&self, ptr: NonNull<u8>) -> bool {
        let region = self.published();
        let block = CountedPool::block_of(&region, ptr);
        region.word(block + REF_COUNT).load(Ordering::Acquire) != 0
    }

    /// Size of the managed region; `0` when uninitialized.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.inner.lock_irq().as_ref().map_or(0, CountedPool::len)
    }

    /// Bytes in free blocks, headers included.
    #[must_use]
    pub fn unused_size(&self) -> usize {
        self.inner
            .lock_irq()
            .as_ref()
            .map_or(0, CountedPool::unused_size)
    }

    #[must_use]
    pub fn used_size(&self) -> usize {
        self.inner
            .lock_irq()
            .as_ref()
            .map_or(0, |p| p.len() - p.unused_size())
    }

    /// Calls `f` for every block in address order, under the allocation
    /// lock; `f` must not call back into this allocator.
    pub fn for_each_block(&self, f: impl FnMut(BlockInfo)) {
        if let Some(pool) = self.inner.lock_irq().as_ref() {
            pool.for_each_block(f);
        }
    }

    fn published(&self) -> Region<'a> {
        let Some(region) = self.shared.get() else {
            panic!("sequential-fit allocator not initialized");
        };
        region
    }
}

impl Default for SequentialFitAllocator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Scans from the cursor until the distance travelled covers the pool.
fn next_fit(pool: &mut CountedPool<'_>, requested: usize) -> Result<usize, AllocError> {
    let oom = AllocError::OutOfMemory { requested };
    let block_size = counted::block_size_for(requested).ok_or(oom)?;
    let mut block = pool.cursor;
    let mut travelled = 0;
    loop {
        if pool.try_claim(block, block_size) {
            return Ok(block);
        }
        travelled += pool.size(block);
        if travelled >= pool.len() {
            return Err(oom);
        }
        block = pool.next_block(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(16))]
    struct Arena([u8; 256]);

    #[test]
    fn alloc_free_restores_unused_size() {
        let mut arena = Arena([0; 256]);
        let a = SequentialFitAllocator::new();
        a.initialize(&mut arena.0);
        let p = a.alloc(24).unwrap();
        assert!(unsafe { a.is_in_use(p) });
        assert_eq!(a.used_size(), 24_usize.next_multiple_of(WORD) + HEADER_SIZE);
        unsafe { a.free(p) };
        assert!(!unsafe { a.is_in_use(p) });
        assert_eq!(a.unused_size(), a.total_size());
        a.uninitialize();
    }

    #[test]
    fn scan_coalesces_the_whole_free_run() {
        let mut arena = Arena([0; 256]);
        let a = SequentialFitAllocator::new();
        a.initialize(&mut arena.0);
        let b = SequentialFitAllocator::MIN_BLOCK_SIZE;
        let ptrs: Vec<_> = (0..4).map(|_| a.alloc(WORD).unwrap()).collect();
        let _tail = a.alloc(256 - 4 * b - HEADER_SIZE).unwrap();
        for &p in &ptrs {
            unsafe { a.free(p) };
        }

        // Four free neighbours are merged into one block holding the request.
        let p = a.alloc(4 * b - HEADER_SIZE).unwrap();
        assert_eq!(p, ptrs[0]);
        let mut sizes = Vec::new();
        a.for_each_block(|info| sizes.push(info.size));
        assert_eq!(sizes, vec![4 * b, 256 - 4 * b]);
    }

    #[test]
    fn oom_after_a_full_lap() {
        let mut arena = Arena([0; 256]);
        let a = SequentialFitAllocator::new();
        a.initialize(&mut arena.0);
        let _p = a.alloc(100).unwrap();
        assert_eq!(a.alloc(200), Err(AllocError::OutOfMemory { requested: 200 }));
    }

    #[test]
    #[should_panic(expected = "reference count 0")]
    fn double_free_panics() {
        let mut arena = Arena([0; 256]);
        let a = SequentialFitAllocator::new();
        a.initialize(&mut arena.0);
        let p = a.alloc(8).unwrap();
        unsafe {
            a.free(p);
            a.free(p);
        }
    }

    #[test]
    #[should_panic(expected = "not handed out")]
    fn foreign_pointer_panics() {
        let mut arena = Arena([0; 256]);
        let mut other = [0_usize; 4];
        let a = SequentialFitAllocator::new();
        a.initialize(&mut arena.0);
        unsafe { a.free(NonNull::from(&mut other).cast()) };
    }

    #[test]
    #[should_panic(expected = "initialized twice")]
    fn second_initialize_panics() {
        let mut one = Arena([0; 256]);
        let mut two = Arena([0; 256]);
        let a = SequentialFitAllocator::new();
        a.initialize(&mut one.0);
        a.initialize(&mut two.0);
    }

    #[test]
    #[should_panic(expected = "in use")]
    fn uninitialize_with_live_blocks_panics() {
        let mut arena = Arena([0; 256]);
        let a = SequentialFitAllocator::new();
        a.initialize(&mut arena.0);
        let _p = a.alloc(8).unwrap();
        a.uninitialize();
    }
}
