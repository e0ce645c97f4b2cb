//! # Half-fit: segregated free lists with boundary tags
//!
//! Free blocks live in doubly-linked lists, one per power-of-two size class
//! ("order"). List `k` holds blocks of size `2^(k + MIN_ORDER)` up to, but
//! excluding, `2^(k + MIN_ORDER + 1)`. Allocation takes the head of the first
//! non-empty list **above** the request's own order, so any block found is
//! large enough without comparing sizes. Every block repeats its size in a
//! footer, which makes the block in front of a freed one reachable in O(1) and
//! lets `free` merge with both neighbours immediately.
//!
//! ```text
//! region:  [ list heads ... | pad ][ block ][ block ] ... [ block ]
//!
//! free:    | size | 0 | prev_free | next_free | ...        | size |
//! used:    | size | 1 | payload ..............................| size |
//!                      ^ block + 2 words
//! ```
//!
//! List heads and links are region offsets; `usize::MAX` marks the end of a
//! list. All operations run under a [`SpinLock`], which keeps interrupts
//! masked while held.

use crate::region::{NIL, Region, WORD};
use crate::{AllocError, BlockInfo};
use core::ptr::NonNull;
use log::{debug, trace, warn};
use pool_sync::SpinLock;

const SIZE: usize = 0;
const REF_COUNT: usize = WORD;
const PREV_FREE: usize = 2 * WORD;
const NEXT_FREE: usize = 3 * WORD;

/// Segregated-free-list allocator with O(1) bidirectional coalescing.
pub struct HalfFitAllocator<'a> {
    inner: SpinLock<Option<HalfFit<'a>>>,
}

struct HalfFit<'a> {
    region: Region<'a>,
    /// Number of free lists; their heads occupy words `0..lists`.
    lists: usize,
    /// Offset of the first block.
    pool_start: usize,
}

impl<'a> HalfFitAllocator<'a> {
    /// Header and footer words of an allocated block.
    pub const USED_OVERHEAD: usize = 3 * WORD;
    /// A free block also stores its two list links.
    pub const FREE_OVERHEAD: usize = 5 * WORD;
    pub const MIN_ORDER: usize = Self::FREE_OVERHEAD.next_power_of_two().trailing_zeros() as usize;
    pub const MIN_BLOCK_SIZE: usize = 1 << Self::MIN_ORDER;
    /// Alignment of every block and of every returned pointer.
    pub const BLOCK_ALIGN: usize = 2 * WORD;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(None),
        }
    }

    /// Size class of a block of `size` bytes.
    ///
    /// # Panics
    /// In debug builds, if `size` is below [`Self::MIN_BLOCK_SIZE`].
    #[inline]
    #[must_use]
    pub const fn order_of(size: usize) -> usize {
        debug_assert!(size >= Self::MIN_BLOCK_SIZE);
        (usize::BITS - 1 - size.leading_zeros()) as usize - Self::MIN_ORDER
    }

    /// Places the list heads at the start of `memory` and the remainder in a
    /// single free block.
    ///
    /// # Panics
    /// If already initialized, if `memory` is not aligned to
    /// [`Self::BLOCK_ALIGN`] in start and length, or if the space after the
    /// list heads cannot hold one minimum block.
    pub fn initialize(&self, memory: &'a mut [u8]) {
        let mut inner = self.inner.lock();
        assert!(inner.is_none(), "half-fit allocator initialized twice");
        let region = Region::new(memory, Self::BLOCK_ALIGN);
        assert!(
            region.len() > Self::MIN_BLOCK_SIZE,
            "region of {} bytes cannot hold a {} byte block",
            region.len(),
            Self::MIN_BLOCK_SIZE
        );
        let lists = 1 + Self::order_of(region.len() - 1);
        let pool_start = (lists * WORD).next_multiple_of(Self::BLOCK_ALIGN);
        assert!(
            region.len() - pool_start >= Self::MIN_BLOCK_SIZE,
            "region of {} bytes has no room for a block after {lists} list heads",
            region.len()
        );
        let mut pool = HalfFit {
            region,
            lists,
            pool_start,
        };
        pool.clear();
        debug!(
            "half-fit allocator managing {} bytes in {lists} size classes",
            pool.total_size()
        );
        *inner = Some(pool);
    }

    /// Gives the region back.
    ///
    /// # Panics
    /// If not initialized or if any block is still allocated.
    pub fn uninitialize(&self) {
        let mut inner = self.inner.lock();
        let pool = initialized(&mut inner);
        let unused = pool.unused_size();
        assert_eq!(
            unused,
            pool.total_size(),
            "half-fit allocator uninitialized with {} bytes in use",
            pool.total_size() - unused
        );
        *inner = None;
        debug!("half-fit allocator released its region");
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Forgets every allocation and starts over with one free block.
    ///
    /// # Panics
    /// If not initialized.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        initialized(&mut inner).clear();
        debug!("half-fit allocator cleared");
    }

    /// Allocates at least `size` bytes, aligned to [`Self::BLOCK_ALIGN`].
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if no list above the request's size class
    /// holds a block.
    ///
    /// # Panics
    /// If not initialized, or on a corrupted free list.
    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let mut inner = self.inner.lock();
        let pool = initialized(&mut inner);
        match pool.alloc(size) {
            Ok(block) => {
                trace!("half-fit alloc {size} bytes at {block:#x}");
                Ok(pool.region.ptr_at(block + PREV_FREE))
            }
            Err(e) => {
                debug!("half-fit alloc of {size} bytes failed: {e}");
                Err(e)
            }
        }
    }

    /// Returns the block behind `ptr` and merges it with free neighbours.
    ///
    /// # Panics
    /// If not initialized, if `ptr` was not handed out by this allocator, if
    /// the block is already free, or if its header and footer disagree.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`alloc`](Self::alloc) on this
    /// allocator, must not have been freed already, and must not be used
    /// after this call.
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        let mut inner = self.inner.lock();
        let pool = initialized(&mut inner);
        let block = pool.free(ptr);
        trace!("half-fit free at {block:#x}");
    }

    /// Bytes available to blocks: the region minus the list heads.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.inner.lock().as_ref().map_or(0, HalfFit::total_size)
    }

    /// Bytes in free blocks, summed over every free list.
    #[must_use]
    pub fn unused_size(&self) -> usize {
        self.inner.lock().as_ref().map_or(0, HalfFit::unused_size)
    }

    #[must_use]
    pub fn used_size(&self) -> usize {
        self.inner
            .lock()
            .as_ref()
            .map_or(0, |p| p.total_size() - p.unused_size())
    }

    /// Calls `f` for every block in address order.
    ///
    /// `f` runs with the lock held and interrupts masked; calling back into
    /// this allocator from it deadlocks.
    pub fn for_each_block(&self, mut f: impl FnMut(BlockInfo)) {
        if let Some(pool) = self.inner.lock().as_ref() {
            let mut block = pool.pool_start;
            while block != pool.region.len() {
                let info = pool.info(block);
                f(info);
                block = info.end();
            }
        }
    }

    /// Calls `f` with the order and the block for every free-list entry,
    /// lists in ascending order, each from head to tail.
    ///
    /// As with [`for_each_block`](Self::for_each_block), `f` must not call
    /// back into this allocator.
    pub fn for_each_free_block(&self, mut f: impl FnMut(usize, BlockInfo)) {
        if let Some(pool) = self.inner.lock().as_ref() {
            for order in 0..pool.lists {
                let mut block = pool.head(order);
                while block != NIL {
                    f(order, pool.info(block));
                    block = pool.region.load(block + NEXT_FREE);
                }
            }
        }
    }
}

impl Default for HalfFitAllocator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HalfFitAllocator<'_> {
    fn drop(&mut self) {
        if let Some(pool) = self.inner.get_mut() {
            let used = pool.total_size() - pool.unused_size();
            if used != 0 {
                warn!("half-fit allocator dropped with {used} bytes still allocated");
            }
        }
    }
}

fn initialized<'p, 'a>(inner: &'p mut Option<HalfFit<'a>>) -> &'p mut HalfFit<'a> {
    let Some(pool) = inner.as_mut() else {
        panic!("half-fit allocator not initialized");
    };
    pool
}

impl HalfFit<'_> {
    const MIN_BLOCK_SIZE: usize = HalfFitAllocator::MIN_BLOCK_SIZE;
    const BLOCK_ALIGN: usize = HalfFitAllocator::BLOCK_ALIGN;

    const fn total_size(&self) -> usize {
        self.region.len() - self.pool_start
    }

    fn order_of(&self, size: usize) -> usize {
        let order = HalfFitAllocator::order_of(size);
        debug_assert!(order < self.lists);
        order
    }

    fn head(&self, order: usize) -> usize {
        self.region.load(order * WORD)
    }

    fn set_head(&self, order: usize, block: usize) {
        self.region.store(order * WORD, block);
    }

    fn clear(&mut self) {
        for order in 0..self.lists {
            self.set_head(order, NIL);
        }
        let block = self.pool_start;
        self.set_size(block, self.total_size());
        self.region.store(block + REF_COUNT, 0);
        self.register(block);
    }

    /// Size from the header, checked for plausibility.
    fn size(&self, block: usize) -> usize {
        let size = self.region.load(block + SIZE);
        assert!(
            size >= Self::MIN_BLOCK_SIZE
                && size.is_multiple_of(Self::BLOCK_ALIGN)
                && size <= self.region.len() - block,
            "corrupted block header at offset {block:#x} (size {size})"
        );
        size
    }

    /// Writes the header size and the matching footer.
    fn set_size(&self, block: usize, size: usize) {
        self.region.store(block + SIZE, size);
        self.region.store(block + size - WORD, size);
    }

    fn is_free(&self, block: usize) -> bool {
        self.region.load(block + REF_COUNT) == 0
    }

    fn info(&self, block: usize) -> BlockInfo {
        BlockInfo {
            offset: block,
            size: self.size(block),
            ref_count: self.region.load(block + REF_COUNT),
        }
    }

    /// Pushes the free `block` onto the list for its size.
    fn register(&self, block: usize) {
        let order = self.order_of(self.size(block));
        let head = self.head(order);
        self.region.store(block + PREV_FREE, NIL);
        self.region.store(block + NEXT_FREE, head);
        if head != NIL {
            self.region.store(head + PREV_FREE, block);
        }
        self.set_head(order, block);
    }

    fn unlink(&self, block: usize) {
        let order = self.order_of(self.size(block));
        let prev = self.region.load(block + PREV_FREE);
        let next = self.region.load(block + NEXT_FREE);
        if prev == NIL {
            assert_eq!(
                self.head(order),
                block,
                "free list {order} does not lead to block {block:#x}"
            );
            self.set_head(order, next);
        } else {
            self.region.store(prev + NEXT_FREE, next);
        }
        if next != NIL {
            self.region.store(next + PREV_FREE, prev);
        }
    }

    fn alloc(&mut self, requested: usize) -> Result<usize, AllocError> {
        let oom = AllocError::OutOfMemory { requested };
        let needed = requested
            .checked_add(HalfFitAllocator::USED_OVERHEAD)
            .map(|n| n.max(Self::MIN_BLOCK_SIZE))
            .and_then(|n| n.checked_next_multiple_of(Self::BLOCK_ALIGN))
            .ok_or(oom)?;

        // Any block one order up is at least 2^(order + 1) > needed.
        let first = HalfFitAllocator::order_of(needed) + 1;
        let Some(order) = (first..self.lists).find(|&k| self.head(k) != NIL) else {
            return Err(oom);
        };

        let block = self.head(order);
        self.unlink(block);
        let size = self.size(block);
        if size - needed >= Self::MIN_BLOCK_SIZE {
            let rest = block + needed;
            self.set_size(rest, size - needed);
            self.region.store(rest + REF_COUNT, 0);
            self.register(rest);
            self.set_size(block, needed);
        }
        self.region.store(block + REF_COUNT, 1);
        Ok(block)
    }

    fn free(&mut self, ptr: NonNull<u8>) -> usize {
        let block = self
            .region
            .offset_of(ptr)
            .and_then(|offset| offset.checked_sub(PREV_FREE))
            .filter(|&b| b >= self.pool_start && b.is_multiple_of(Self::BLOCK_ALIGN));
        let Some(mut block) = block else {
            panic!("pointer {ptr:p} was not handed out by this allocator");
        };

        let mut size = self.size(block);
        let footer = self.region.load(block + size - WORD);
        assert_eq!(
            footer, size,
            "header/footer mismatch at offset {block:#x}: {size} vs {footer}"
        );
        assert!(!self.is_free(block), "double free of block at offset {block:#x}");

        let next = block + size;
        if next != self.region.len() && self.is_free(next) {
            let next_size = self.size(next);
            self.unlink(next);
            size += next_size;
        }

        if block != self.pool_start {
            let prev_size = self.region.load(block - WORD);
            let prev = block
                .checked_sub(prev_size)
                .filter(|&p| p >= self.pool_start);
            let Some(prev) = prev else {
                panic!("corrupted footer in front of block {block:#x}: {prev_size}");
            };
            if self.is_free(prev) {
                assert_eq!(
                    self.size(prev),
                    prev_size,
                    "header/footer mismatch at offset {prev:#x}"
                );
                self.unlink(prev);
                block = prev;
                size += prev_size;
            }
        }

        self.set_size(block, size);
        self.region.store(block + REF_COUNT, 0);
        self.register(block);
        block
    }

    fn unused_size(&self) -> usize {
        let mut unused = 0;
        for order in 0..self.lists {
            let mut block = self.head(order);
            while block != NIL {
                unused += self.size(block);
                block = self.region.load(block + NEXT_FREE);
            }
        }
        unused
    }
}
