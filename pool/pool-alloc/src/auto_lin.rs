//! Auto-reclaiming arena.
//!
//! [`AutoLinAlloc`] hands out blocks only as [`SharedPtr`] handles. A block
//! whose last handle dropped is not returned anywhere; its reference count is
//! simply zero, and the next allocation that needs the space absorbs it into
//! the block it claims.

mod shared_ptr;

pub use shared_ptr::SharedPtr;

use crate::counted::{self, CountedPool, HEADER_SIZE};
use crate::region::{Region, WORD};
use crate::{AllocError, BlockInfo};
use log::{debug, trace};
use pool_sync::SpinMutex;

/// Next-fit arena of reference-counted blocks with passive reclamation.
///
/// Allocation is serialized by a spin flag owned by the instance. Handles are
/// cloned and dropped without it.
///
/// ```
/// use pool_alloc::AutoLinAlloc;
///
/// #[repr(C, align(16))]
/// struct Arena([u8; 256]);
///
/// let mut arena = Arena([0; 256]);
/// let pool = AutoLinAlloc::new();
/// pool.initialize(&mut arena.0);
///
/// let a = pool.alloc(32).unwrap();
/// let b = a.clone();
/// assert_eq!(a, b);
/// assert_eq!(a.ref_count(), 2);
/// drop((a, b));
/// assert_eq!(pool.unused_size(), 256);
/// ```
pub struct AutoLinAlloc<'a> {
    inner: SpinMutex<Option<CountedPool<'a>>>,
}

impl<'a> AutoLinAlloc<'a> {
    pub const HEADER_SIZE: usize = HEADER_SIZE;
    pub const MIN_BLOCK_SIZE: usize = counted::MIN_BLOCK_SIZE;

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
        let mut inner = self.inner.lock();
        assert!(inner.is_none(), "auto-reclaiming arena initialized twice");
        let pool = CountedPool::new(Region::new(memory, WORD));
        debug!("auto-reclaiming arena managing {} bytes", pool.len());
        *inner = Some(pool);
    }

    /// Gives the region back.
    ///
    /// # Panics
    /// If not initialized or if any handle is still alive.
    pub fn uninitialize(&self) {
        let mut inner = self.inner.lock();
        let Some(pool) = inner.as_ref() else {
            panic!("auto-reclaiming arena not initialized");
        };
        let unused = pool.unused_size();
        assert_eq!(
            unused,
            pool.len(),
            "auto-reclaiming arena uninitialized with {} bytes in use",
            pool.len() - unused
        );
        *inner = None;
        debug!("auto-reclaiming arena released its region");
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Allocates at least `size` bytes and returns the only handle to them.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if a full lap over the pool finds no
    /// large enough run of unreferenced blocks.
    ///
    /// # Panics
    /// If not initialized, or on a corrupted block header.
    pub fn alloc(&self, size: usize) -> Result<SharedPtr<'a>, AllocError> {
        let mut inner = self.inner.lock();
        let Some(pool) = inner.as_mut() else {
            panic!("auto-reclaiming arena not initialized");
        };
        match next_fit(pool, size) {
            Ok(block) => {
                trace!("auto-reclaiming alloc {size} bytes at {block:#x}");
                // Safety: the block was just claimed with a count of one,
                // which the new handle now owns.
                Ok(unsafe { SharedPtr::adopt(pool.payload(block)) })
            }
            Err(e) => {
                debug!("auto-reclaiming alloc of {size} bytes failed: {e}");
                Err(e)
            }
        }
    }

    /// Size of the managed region; `0` when uninitialized.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.inner.lock().as_ref().map_or(0, CountedPool::len)
    }

    /// Bytes in blocks without a live handle, headers included.
    #[must_use]
    pub fn unused_size(&self) -> usize {
        self.inner.lock().as_ref().map_or(0, CountedPool::unused_size)
    }

    #[must_use]
    pub fn used_size(&self) -> usize {
        self.inner
            .lock()
            .as_ref()
            .map_or(0, |p| p.len() - p.unused_size())
    }

    /// Calls `f` for every block in address order.
    ///
    /// Unreferenced blocks that no scan has absorbed yet show up separately.
    /// `f` runs under the allocation lock and must not allocate from here.
    pub fn for_each_block(&self, f: impl FnMut(BlockInfo)) {
        if let Some(pool) = self.inner.lock().as_ref() {
            pool.for_each_block(f);
        }
    }
}

impl Default for AutoLinAlloc<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Scans from the cursor until the lap closes on the starting block.
fn next_fit(pool: &mut CountedPool<'_>, requested: usize) -> Result<usize, AllocError> {
    let oom = AllocError::OutOfMemory { requested };
    let block_size = counted::block_size_for(requested).ok_or(oom)?;
    let start = pool.cursor;
    let mut block = start;
    loop {
        if pool.try_claim(block, block_size) {
            return Ok(block);
        }
        block = pool.next_block(block);
        if block == start {
            return Err(oom);
        }
    }
}
