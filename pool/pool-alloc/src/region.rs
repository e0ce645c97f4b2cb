//! # Caller-owned memory regions
//!
//! Every allocator in this crate manages a byte range it borrows from the
//! caller for `'a`. Blocks are addressed by their byte **offset** from the
//! region start; headers, footers and free-list links are machine words read
//! and written through [`AtomicUsize`] views of that memory.
//!
//! Going through atomics for every book-keeping word keeps concurrent
//! readers (a lock-free `free`, a [`SharedPtr`](crate::SharedPtr) dropping its
//! reference) well-defined while an allocation scan runs, and keeps the
//! allocator's own accesses disjoint from the payload bytes handed to users.

use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Size of a machine word; the unit of every header field.
pub const WORD: usize = size_of::<usize>();

/// "No block" marker for free-list links.
pub(crate) const NIL: usize = usize::MAX;

const _: () = assert!(align_of::<AtomicUsize>() == WORD);

/// A borrowed, word-aligned byte range.
#[derive(Clone, Copy)]
pub(crate) struct Region<'a> {
    base: NonNull<u8>,
    len: usize,
    _memory: PhantomData<&'a [AtomicUsize]>,
}

// Safety: all accesses made through a `Region` are atomic word accesses.
unsafe impl Send for Region<'_> {}
unsafe impl Sync for Region<'_> {}

impl<'a> Region<'a> {
    /// Takes `memory` over for `'a`.
    ///
    /// # Panics
    /// If the start address or the length is not a multiple of `align`.
    pub(crate) fn new(memory: &'a mut [u8], align: usize) -> Self {
        debug_assert!(align.is_power_of_two() && align >= WORD);
        let len = memory.len();
        let base = NonNull::from(memory).cast::<u8>();
        assert!(
            base.as_ptr().addr().is_multiple_of(align),
            "region start {base:p} is not aligned to {align} bytes"
        );
        assert!(
            len.is_multiple_of(align),
            "region length {len} is not a multiple of {align} bytes"
        );
        Self {
            base,
            len,
            _memory: PhantomData,
        }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// The book-keeping word at `offset`.
    ///
    /// # Panics
    /// If `offset` is not word-aligned or lies outside the region.
    #[inline]
    pub(crate) fn word(&self, offset: usize) -> &'a AtomicUsize {
        assert!(
            offset.is_multiple_of(WORD) && offset < self.len,
            "header offset {offset:#x} outside the {} byte region",
            self.len
        );
        // Safety: in bounds and word-aligned (checked above); the region is
        // borrowed for 'a and only ever accessed atomically by the allocator.
        unsafe { AtomicUsize::from_ptr(self.base.as_ptr().add(offset).cast()) }
    }

    #[inline]
    pub(crate) fn load(&self, offset: usize) -> usize {
        self.word(offset).load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn store(&self, offset: usize, value: usize) {
        self.word(offset).store(value, Ordering::Relaxed);
    }

    /// Pointer to the byte at `offset`.
    #[inline]
    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset < self.len, "offset {offset:#x} outside region");
        // Safety: in bounds of the borrowed region.
        unsafe { self.base.add(offset) }
    }

    /// Offset of `ptr` inside the region, if it is in bounds and word-aligned.
    #[inline]
    pub(crate) fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = ptr.as_ptr().addr().checked_sub(self.base.as_ptr().addr())?;
        (offset < self.len && offset.is_multiple_of(WORD)).then_some(offset)
    }
}

/// A [`Region`] published for readers that do not take the allocator lock.
pub(crate) struct RegionSlot<'a> {
    base: AtomicPtr<u8>,
    len: AtomicUsize,
    _memory: PhantomData<&'a [AtomicUsize]>,
}

impl<'a> RegionSlot<'a> {
    pub(crate) const fn empty() -> Self {
        Self {
            base: AtomicPtr::new(ptr::null_mut()),
            len: AtomicUsize::new(0),
            _memory: PhantomData,
        }
    }

    pub(crate) fn publish(&self, region: Region<'a>) {
        self.len.store(region.len, Ordering::Relaxed);
        self.base.store(region.base.as_ptr(), Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        self.base.store(ptr::null_mut(), Ordering::Release);
    }

    pub(crate) fn get(&self) -> Option<Region<'a>> {
        let base = NonNull::new(self.base.load(Ordering::Acquire))?;
        Some(Region {
            base,
            len: self.len.load(Ordering::Relaxed),
            _memory: PhantomData,
        })
    }
}
