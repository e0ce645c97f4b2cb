use crate::counted::{HEADER_SIZE, REF_COUNT, SIZE};
use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Counted handle to a block of an [`AutoLinAlloc`](crate::AutoLinAlloc).
///
/// Cloning bumps the block's reference count, dropping (or overwriting) a
/// handle lowers it. Once it reaches zero the block is up for reuse by the
/// next allocation that scans past it. A handle may also be null, which owns
/// nothing.
///
/// Handles compare equal when they point to the same block.
pub struct SharedPtr<'a> {
    payload: Option<NonNull<u8>>,
    _block: PhantomData<&'a AtomicUsize>,
}

// Safety: a handle only touches its block's header, and only atomically.
unsafe impl Send for SharedPtr<'_> {}
unsafe impl Sync for SharedPtr<'_> {}

impl<'a> SharedPtr<'a> {
    /// A handle that owns nothing.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            payload: None,
            _block: PhantomData,
        }
    }

    /// Wraps a payload whose block count already accounts for this handle.
    ///
    /// # Safety
    /// `payload` must be the payload of a live block of an arena that
    /// outlives `'a`, and the block's count must include this handle.
    pub(crate) const unsafe fn adopt(payload: NonNull<u8>) -> Self {
        Self {
            payload: Some(payload),
            _block: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        self.payload.is_some()
    }

    /// Start of the payload, or null.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.payload.map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Usable payload bytes; `0` for a null handle.
    ///
    /// May exceed the requested size when the block kept a remainder too
    /// small to split off.
    #[must_use]
    pub fn size(&self) -> usize {
        self.header(SIZE)
            .map_or(0, |size| size.load(Ordering::Relaxed) - HEADER_SIZE)
    }

    /// Live handles to this block; `0` for a null handle.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.header(REF_COUNT)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    /// Exchanges the blocks two handles point to. Counts are unchanged.
    pub const fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.payload, &mut other.payload);
    }

    fn header(&self, field: usize) -> Option<&'a AtomicUsize> {
        let payload = self.payload?;
        // Safety: a live handle keeps its block allocated; the header words
        // sit right in front of the payload and are only accessed atomically.
        Some(unsafe {
            AtomicUsize::from_ptr(payload.as_ptr().sub(HEADER_SIZE).add(field).cast())
        })
    }
}

impl Clone for SharedPtr<'_> {
    fn clone(&self) -> Self {
        if let Some(count) = self.header(REF_COUNT) {
            // Relaxed: the count cannot reach zero while `self` holds it up.
            count.fetch_add(1, Ordering::Relaxed);
        }
        Self {
            payload: self.payload,
            _block: PhantomData,
        }
    }
}

impl Drop for SharedPtr<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.header(REF_COUNT) {
            // Release: writes through this handle happen-before the block is
            // observed free by the allocation scan.
            count.fetch_sub(1, Ordering::Release);
        }
    }
}

impl Default for SharedPtr<'_> {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialEq for SharedPtr<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload
    }
}

impl Eq for SharedPtr<'_> {}

impl fmt::Debug for SharedPtr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPtr")
            .field("payload", &self.as_ptr())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::AutoLinAlloc;
    use crate::region::WORD;

    use super::*;

    #[repr(C, align(16))]
    struct Arena([u8; 256]);

    #[test]
    fn null_handles_own_nothing() {
        let p = SharedPtr::default();
        assert!(!p.is_allocated());
        assert!(p.as_ptr().is_null());
        assert_eq!(p.size(), 0);
        assert_eq!(p.ref_count(), 0);
        assert_eq!(p.clone(), SharedPtr::null());
    }

    #[test]
    fn clones_and_drops_balance() {
        let mut arena = Arena([0; 256]);
        let a = AutoLinAlloc::new();
        a.initialize(&mut arena.0);
        let p = a.alloc(4 * WORD).unwrap();
        assert_eq!(p.size(), 4 * WORD);
        let clones: Vec<_> = (0..5).map(|_| p.clone()).collect();
        assert_eq!(p.ref_count(), 6);
        assert!(clones.iter().all(|c| *c == p));
        drop(clones);
        assert_eq!(p.ref_count(), 1);
    }

    #[test]
    fn overwriting_releases_the_old_block() {
        let mut arena = Arena([0; 256]);
        let a = AutoLinAlloc::new();
        a.initialize(&mut arena.0);
        let mut p = a.alloc(8).unwrap();
        let q = a.alloc(8).unwrap();
        let keep = p.clone();
        p = q.clone();
        assert_eq!(keep.ref_count(), 1);
        assert_eq!(q.ref_count(), 2);
        assert_eq!(p, q);
        p = SharedPtr::null();
        assert_eq!(q.ref_count(), 1);
        assert!(!p.is_allocated());
    }

    #[test]
    fn swap_exchanges_targets() {
        let mut arena = Arena([0; 256]);
        let a = AutoLinAlloc::new();
        a.initialize(&mut arena.0);
        let mut p = a.alloc(8).unwrap();
        let mut q = SharedPtr::null();
        let addr = p.as_ptr();
        p.swap(&mut q);
        assert!(!p.is_allocated());
        assert_eq!(q.as_ptr(), addr);
        assert_eq!(q.ref_count(), 1);
    }

    #[test]
    fn moves_carry_no_count_traffic() {
        let mut arena = Arena([0; 256]);
        let a = AutoLinAlloc::new();
        a.initialize(&mut arena.0);
        let p = a.alloc(8).unwrap();
        let moved = p;
        let boxed = Box::new(moved);
        assert_eq!(boxed.ref_count(), 1);
    }
}
