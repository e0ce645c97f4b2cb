//! Blocks headed by `[size, ref_count]`.
//!
//! Shared by [`SequentialFitAllocator`](crate::SequentialFitAllocator) and
//! [`AutoLinAlloc`](crate::AutoLinAlloc). A block is free exactly when its
//! reference count is zero. Counts may drop to zero at any time without the
//! allocation lock, so every occupancy check is an acquire load: whatever
//! the last owner wrote into the block happens-before the block is absorbed
//! or handed out again.
//!
//! ```text
//! +------+-----------+---------------------------+
//! | size | ref_count |  payload (size - 2 words) |
//! +------+-----------+---------------------------+
//! ^ block            ^ block + HEADER_SIZE
//! ```

use crate::BlockInfo;
use crate::region::{Region, WORD};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

pub(crate) const SIZE: usize = 0;
pub(crate) const REF_COUNT: usize = WORD;

pub(crate) const HEADER_SIZE: usize = 2 * WORD;
pub(crate) const MIN_PAYLOAD: usize = WORD;
pub(crate) const MIN_BLOCK_SIZE: usize = HEADER_SIZE + MIN_PAYLOAD;

/// Total block size needed for a `requested`-byte payload, or `None` on overflow.
pub(crate) fn block_size_for(requested: usize) -> Option<usize> {
    requested
        .max(MIN_PAYLOAD)
        .checked_next_multiple_of(WORD)?
        .checked_add(HEADER_SIZE)
}

/// The pool plus its next-search cursor.
pub(crate) struct CountedPool<'a> {
    pub(crate) region: Region<'a>,
    pub(crate) cursor: usize,
}

impl<'a> CountedPool<'a> {
    /// Carves `region` into a single free block.
    pub(crate) fn new(region: Region<'a>) -> Self {
        assert!(
            region.len() >= MIN_BLOCK_SIZE,
            "region of {} bytes cannot hold a {MIN_BLOCK_SIZE} byte block",
            region.len()
        );
        region.store(SIZE, region.len());
        region.word(REF_COUNT).store(0, Ordering::Release);
        Self { region, cursor: 0 }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.region.len()
    }

    /// Size of `block`, checked against the region bounds.
    pub(crate) fn size(&self, block: usize) -> usize {
        let size = self.region.load(block + SIZE);
        assert!(
            size >= MIN_BLOCK_SIZE && size <= self.len() - block,
            "corrupted block header at offset {block:#x} (size {size})"
        );
        size
    }

    #[inline]
    pub(crate) fn ref_count(&self, block: usize) -> &'a AtomicUsize {
        self.region.word(block + REF_COUNT)
    }

    #[inline]
    pub(crate) fn is_free(&self, block: usize) -> bool {
        self.ref_count(block).load(Ordering::Acquire) == 0
    }

    /// The block after `block`, wrapping to the region start.
    pub(crate) fn next_block(&self, block: usize) -> usize {
        let next = block + self.size(block);
        if next == self.len() { 0 } else { next }
    }

    /// Size `block` would have after absorbing the run of free blocks behind
    /// it. Stops at the region end and writes nothing.
    pub(crate) fn free_run(&self, block: usize) -> usize {
        let mut size = self.size(block);
        while block + size != self.len() && self.is_free(block + size) {
            size += self.size(block + size);
        }
        size
    }

    /// Splits `block` after `first` bytes if the rest can hold a minimum block.
    pub(crate) fn split(&self, block: usize, first: usize) {
        let size = self.size(block);
        if size >= first + MIN_BLOCK_SIZE {
            let rest = block + first;
            self.region.store(rest + SIZE, size - first);
            self.ref_count(rest).store(0, Ordering::Relaxed);
            self.region.store(block + SIZE, first);
        }
    }

    /// Claims `block` for a `block_size` allocation if it is free and large
    /// enough once the free run behind it is absorbed. Headers are only
    /// rewritten when the claim succeeds.
    pub(crate) fn try_claim(&mut self, block: usize, block_size: usize) -> bool {
        if !self.is_free(block) {
            return false;
        }
        let size = self.free_run(block);
        if size < block_size {
            return false;
        }
        self.region.store(block + SIZE, size);
        self.split(block, block_size);
        self.ref_count(block).store(1, Ordering::Relaxed);
        self.cursor = block;
        true
    }

    #[inline]
    pub(crate) fn payload(&self, block: usize) -> NonNull<u8> {
        self.region.ptr_at(block + HEADER_SIZE)
    }

    /// Block owning the payload pointer `ptr`.
    ///
    /// # Panics
    /// If `ptr` does not point into this pool at a payload position.
    pub(crate) fn block_of(region: &Region<'a>, ptr: NonNull<u8>) -> usize {
        let block = region
            .offset_of(ptr)
            .and_then(|offset| offset.checked_sub(HEADER_SIZE));
        let Some(block) = block else {
            panic!("pointer {ptr:p} was not handed out by this allocator");
        };
        block
    }

    pub(crate) fn for_each_block(&self, mut f: impl FnMut(BlockInfo)) {
        let mut block = 0;
        while block != self.len() {
            let size = self.size(block);
            f(BlockInfo {
                offset: block,
                size,
                ref_count: self.ref_count(block).load(Ordering::Acquire),
            });
            block += size;
        }
    }

    pub(crate) fn unused_size(&self) -> usize {
        let mut unused = 0;
        self.for_each_block(|b| {
            if b.is_free() {
                unused += b.size;
            }
        });
        unused
    }
}
