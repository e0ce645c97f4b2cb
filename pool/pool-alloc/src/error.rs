//! Recoverable allocator errors.
//!
//! Only conditions a caller can reasonably react to are reported as values.
//! Misuse that leaves the book-keeping in doubt (foreign pointers, double
//! free outside [`LinearAllocator`](crate::LinearAllocator), re-initialization,
//! corrupted headers) panics instead.

/// No free block can satisfy the request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("out of memory: no free block can hold {requested} bytes")]
    OutOfMemory { requested: usize },
}

/// Failure of [`LinearAllocator::free`](crate::LinearAllocator::free).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FreeError {
    #[error("double free of the block at offset {offset:#x}")]
    DoubleFree { offset: usize },
}
