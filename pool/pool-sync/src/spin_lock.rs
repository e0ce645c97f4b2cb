use crate::{SpinMutex, SpinMutexGuard};

/// A [`SpinMutex`] that is only ever taken with interrupts masked.
///
/// Masking happens before the spin, so an interrupt handler can never preempt
/// the holder and then spin forever on the same lock. Guards must be dropped
/// in reverse order of acquisition, or the wrong interrupt state is restored.
pub struct SpinLock<T> {
    inner: SpinMutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: SpinMutex::new(value),
        }
    }

    #[inline]
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        self.inner.lock_irq()
    }

    #[inline]
    pub fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
        self.inner.try_lock_irq()
    }

    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        f(&mut self.lock())
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}
