use crate::{
    AllocError, FreeError, HalfFitAllocator, LinearAllocator, SequentialFitAllocator, WORD,
};
use core::ptr::NonNull;

/// The plain allocate/free pair containers are built on.
///
/// Implemented by the allocators that hand out raw pointers; the
/// [`AutoLinAlloc`](crate::AutoLinAlloc) arena only hands out counted handles.
pub trait RawAllocator {
    /// Alignment of every pointer returned by [`allocate`](Self::allocate).
    const ALIGN: usize;

    /// Allocates at least `size` bytes aligned to [`Self::ALIGN`].
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] when the pool cannot satisfy the request.
    fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError>;

    /// Returns a block to the pool.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`allocate`](Self::allocate) on this
    /// allocator, must not have been released already, and must not be used
    /// after this call.
    unsafe fn deallocate(&self, ptr: NonNull<u8>);
}

impl RawAllocator for LinearAllocator<'_> {
    const ALIGN: usize = WORD;

    fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.alloc(size)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        // Safety: forwarded from the caller.
        if let Err(FreeError::DoubleFree { offset }) = unsafe { self.free(ptr) } {
            panic!("double free of the block at offset {offset:#x}");
        }
    }
}

impl RawAllocator for SequentialFitAllocator<'_> {
    const ALIGN: usize = WORD;

    fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.alloc(size)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        // Safety: forwarded from the caller.
        unsafe { self.free(ptr) }
    }
}

impl RawAllocator for HalfFitAllocator<'_> {
    const ALIGN: usize = Self::BLOCK_ALIGN;

    fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.alloc(size)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        // Safety: forwarded from the caller.
        unsafe { self.free(ptr) }
    }
}
