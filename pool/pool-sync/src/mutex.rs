use crate::SpinFlag;
use crate::irq::{self, IrqGuard};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// Allocator state behind a [`SpinFlag`].
///
/// [`lock`](Self::lock) leaves interrupts alone and suits state that is never
/// touched from an interrupt handler. [`lock_irq`](Self::lock_irq) masks
/// interrupts before spinning; on a single core the mask alone already
/// excludes every other context, and the flag adds exclusion against other
/// cores (and other threads on hosted targets, where masking is a no-op).
pub struct SpinMutex<T> {
    flag: SpinFlag,
    cell: UnsafeCell<T>,
}

// Safety: the flag grants exclusive access; only T: Send may cross threads.
unsafe impl<T: Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            flag: SpinFlag::new(),
            cell: UnsafeCell::new(value),
        }
    }

    /// Spins until the flag is taken. Interrupts stay as they are.
    #[inline]
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        self.flag.acquire();
        SpinMutexGuard {
            mutex: self,
            irq_state: None,
        }
    }

    /// Masks interrupts, then spins until the flag is taken. The guard
    /// restores the previous interrupt state after releasing the flag.
    #[inline]
    pub fn lock_irq(&self) -> SpinMutexGuard<'_, T> {
        let irq = IrqGuard::new();
        self.flag.acquire();
        SpinMutexGuard {
            mutex: self,
            irq_state: Some(irq),
        }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
        self.flag.try_acquire().then(|| SpinMutexGuard {
            mutex: self,
            irq_state: None,
        })
    }

    /// Like [`lock_irq`](Self::lock_irq), but gives up at once if the flag is
    /// held. Interrupts are restored on failure.
    #[inline]
    pub fn try_lock_irq(&self) -> Option<SpinMutexGuard<'_, T>> {
        let irq = IrqGuard::new();
        self.flag.try_acquire().then(|| SpinMutexGuard {
            mutex: self,
            irq_state: Some(irq),
        })
    }

    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        f(&mut self.lock())
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.flag.is_held()
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.cell.get_mut()
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.cell.into_inner()
    }
}

/// Access to the value of a [`SpinMutex`]; releases the flag on drop, then
/// restores interrupts if the lock masked them.
pub struct SpinMutexGuard<'a, T> {
    mutex: &'a SpinMutex<T>,
    // Dropped after `Drop::drop` has released the flag.
    irq_state: Option<IrqGuard>,
}

impl<T> SpinMutexGuard<'_, T> {
    /// Whether this guard holds interrupts masked.
    #[inline]
    #[must_use]
    pub const fn masks_interrupts(&self) -> bool {
        self.irq_state.is_some()
    }
}

impl<T> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the flag is held for the guard's lifetime.
        unsafe { &*self.mutex.cell.get() }
    }
}

impl<T> DerefMut for SpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as above, and `&mut self` makes this the only access.
        unsafe { &mut *self.mutex.cell.get() }
    }
}

impl<T> Drop for SpinMutexGuard<'_, T> {
    fn drop(&mut self) {
        // Nothing inside the critical section may re-enable interrupts.
        debug_assert!(
            self.irq_state.is_none() || !irq::MASKS_INTERRUPTS || !irq::are_enabled(),
            "interrupts re-enabled inside a masked critical section"
        );
        // Safety: the guard exists only while the flag is held.
        unsafe { self.mutex.flag.release() }
    }
}
