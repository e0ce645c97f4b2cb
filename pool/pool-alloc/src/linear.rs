//! Next-fit allocator over `{state, size}` blocks.
//!
//! ```text
//! +-------+------+---------------------------+
//! | state | size |  payload (size - 2 words) |
//! +-------+------+---------------------------+
//! ```
//!
//! `free` only flips the state word. Neighbouring free blocks are merged
//! lazily: the allocation scan tests each free block together with the free
//! block right after it, and merges the two only when it claims them.

use crate::region::{Region, WORD};
use crate::{AllocError, BlockInfo, FreeError};
use core::ptr::NonNull;
use log::{debug, trace};
use pool_sync::SpinMutex;

const STATE: usize = 0;
const SIZE: usize = WORD;

const USED: usize = 0xA110_C8ED;
const FREE: usize = 0xF4EE_B10C;

/// Next-fit allocator with binary block state and lazy forward coalescing.
///
/// All operations run with interrupts masked (and, on hosted targets, a spin
/// flag held), so the allocator is neither reentrant nor reentered.
pub struct LinearAllocator<'a> {
    inner: SpinMutex<Option<Linear<'a>>>,
}

struct Linear<'a> {
    region: Region<'a>,
    cursor: usize,
}

impl<'a> LinearAllocator<'a> {
    pub const HEADER_SIZE: usize = 2 * WORD;
    pub const MIN_PAYLOAD: usize = WORD;
    pub const MIN_BLOCK_SIZE: usize = Self::HEADER_SIZE + Self::MIN_PAYLOAD;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: SpinMutex::new(None),
        }
    }

    /// Takes `memory` over as a single free block.
    ///
    /// # Panics
    /// If already initialized, if `memory` is not word-aligned in start and
    /// length, or if it cannot hold one minimum block.
    pub fn initialize(&self, memory: &'a mut [u8]) {
        let mut inner = self.inner.lock_irq();
        assert!(inner.is_none(), "linear allocator initialized twice");
        let region = Region::new(memory, WORD);
        assert!(
            region.len() >= Self::MIN_BLOCK_SIZE,
            "region of {} bytes cannot hold a {} byte block",
            region.len(),
            Self::MIN_BLOCK_SIZE
        );
        region.store(STATE, FREE);
        region.store(SIZE, region.len());
        debug!("linear allocator managing {} bytes", region.len());
        *inner = Some(Linear { region, cursor: 0 });
    }

    /// Gives the region back.
    ///
    /// # Panics
    /// If not initialized or if any block is still allocated.
    pub fn uninitialize(&self) {
        let mut inner = self.inner.lock_irq();
        let pool = initialized(&mut inner);
        let unused = pool.unused_size();
        assert_eq!(
            unused,
            pool.region.len(),
            "linear allocator uninitialized with {} bytes in use",
            pool.region.len() - unused
        );
        *inner = None;
        debug!("linear allocator released its region");
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.lock_irq().is_some()
    }

    /// Allocates at least `size` bytes, word-aligned.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if a full lap over the pool finds no
    /// block large enough.
    ///
    /// # Panics
    /// If not initialized, or on a corrupted block header.
    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let mut inner = self.inner.lock_irq();
        let pool = initialized(&mut inner);
        match pool.alloc(size) {
            Ok(block) => {
                trace!("linear alloc {size} bytes at {block:#x}");
                Ok(pool.region.ptr_at(block + Self::HEADER_SIZE))
            }
            Err(e) => {
                debug!("linear alloc of {size} bytes failed: {e}");
                Err(e)
            }
        }
    }

    /// Marks the block behind `ptr` free.
    ///
    /// # Errors
    /// [`FreeError::DoubleFree`] if the block is already free.
    ///
    /// # Panics
    /// If not initialized, if `ptr` lies outside the region, or if the block
    /// header is neither used nor free.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`alloc`](Self::alloc) on this
    /// allocator, and must not be used after it is freed.
    pub unsafe fn free(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        let mut inner = self.inner.lock_irq();
        let pool = initialized(&mut inner);
        let block = pool.block_of(ptr);
        match pool.region.load(block + STATE) {
            USED => {
                pool.region.store(block + STATE, FREE);
                trace!("linear free at {block:#x}");
                Ok(())
            }
            FREE => Err(FreeError::DoubleFree { offset: block }),
            state => panic!("corrupted block state {state:#x} at offset {block:#x}"),
        }
    }

    /// Size of the managed region; `0` when uninitialized.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.inner.lock_irq().as_ref().map_or(0, |p| p.region.len())
    }

    /// Bytes in free blocks, headers included.
    #[must_use]
    pub fn unused_size(&self) -> usize {
        self.inner.lock_irq().as_ref().map_or(0, Linear::unused_size)
    }

    #[must_use]
    pub fn used_size(&self) -> usize {
        self.inner
            .lock_irq()
            .as_ref()
            .map_or(0, |p| p.region.len() - p.unused_size())
    }

    /// Calls `f` for every block in address order, under the allocation
    /// lock; `f` must not call back into this allocator.
    pub fn for_each_block(&self, f: impl FnMut(BlockInfo)) {
        if let Some(pool) = self.inner.lock_irq().as_ref() {
            pool.for_each_block(f);
        }
    }
}

impl Default for LinearAllocator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

fn initialized<'p, 'a>(inner: &'p mut Option<Linear<'a>>) -> &'p mut Linear<'a> {
    let Some(pool) = inner.as_mut() else {
        panic!("linear allocator not initialized");
    };
    pool
}

impl Linear<'_> {
    const HEADER_SIZE: usize = LinearAllocator::HEADER_SIZE;
    const MIN_BLOCK_SIZE: usize = LinearAllocator::MIN_BLOCK_SIZE;

    fn size(&self, block: usize) -> usize {
        let size = self.region.load(block + SIZE);
        assert!(
            size >= Self::MIN_BLOCK_SIZE
                && size <= self.region.len() - block
                && size.is_multiple_of(WORD),
            "corrupted block header at offset {block:#x} (size {size})"
        );
        size
    }

    fn is_free(&self, block: usize) -> bool {
        match self.region.load(block + STATE) {
            FREE => true,
            USED => false,
            state => panic!("corrupted block state {state:#x} at offset {block:#x}"),
        }
    }

    fn block_of(&self, ptr: NonNull<u8>) -> usize {
        let block = self
            .region
            .offset_of(ptr)
            .and_then(|offset| offset.checked_sub(Self::HEADER_SIZE));
        let Some(block) = block else {
            panic!("pointer {ptr:p} was not handed out by this allocator");
        };
        block
    }

    /// Size of free `block` once its free successor, if any, is absorbed.
    /// Never reaches across the region end and writes nothing.
    fn merged_size(&self, block: usize) -> usize {
        let size = self.size(block);
        let next = block + size;
        if next != self.region.len() && self.is_free(next) {
            size + self.size(next)
        } else {
            size
        }
    }

    fn next_block(&self, block: usize) -> usize {
        let next = block + self.size(block);
        if next == self.region.len() { 0 } else { next }
    }

    fn alloc(&mut self, requested: usize) -> Result<usize, AllocError> {
        let oom = AllocError::OutOfMemory { requested };
        let block_size = requested
            .max(LinearAllocator::MIN_PAYLOAD)
            .checked_next_multiple_of(WORD)
            .and_then(|payload| payload.checked_add(Self::HEADER_SIZE))
            .ok_or(oom)?;

        // Headers change only once a block fits; the cursor always sits on a
        // block boundary, so the lap ends on it.
        let start = self.cursor;
        let mut block = start;
        loop {
            if self.is_free(block) {
                let mut size = self.merged_size(block);
                if size >= block_size {
                    if size >= block_size + Self::MIN_BLOCK_SIZE {
                        let rest = block + block_size;
                        self.region.store(rest + STATE, FREE);
                        self.region.store(rest + SIZE, size - block_size);
                        size = block_size;
                    }
                    self.region.store(block + SIZE, size);
                    self.region.store(block + STATE, USED);
                    self.cursor = block;
                    return Ok(block);
                }
            }
            block = self.next_block(block);
            if block == start {
                return Err(oom);
            }
        }
    }

    fn for_each_block(&self, mut f: impl FnMut(BlockInfo)) {
        let mut block = 0;
        while block != self.region.len() {
            let size = self.size(block);
            f(BlockInfo {
                offset: block,
                size,
                ref_count: usize::from(!self.is_free(block)),
            });
            block += size;
        }
    }

    fn unused_size(&self) -> usize {
        let mut unused = 0;
        self.for_each_block(|b| {
            if b.is_free() {
                unused += b.size;
            }
        });
        unused
    }
}
