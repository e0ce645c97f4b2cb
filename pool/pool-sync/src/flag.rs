use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// Exchange-based spin flag; `true` while held.
///
/// Waiters retry the exchange only after a relaxed load saw the flag clear,
/// so a contended flag is mostly read, not written. Interrupts are not
/// touched; [`SpinMutex::lock_irq`](crate::SpinMutex::lock_irq) and
/// [`SpinLock`](crate::SpinLock) add that.
pub struct SpinFlag {
    held: AtomicBool,
}

impl Default for SpinFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinFlag {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn acquire(&self) {
        while self.held.swap(true, Ordering::Acquire) {
            while self.held.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
    }

    #[inline]
    pub fn try_acquire(&self) -> bool {
        !self.held.swap(true, Ordering::Acquire)
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    /// # Safety
    /// The caller must hold the flag; the critical section ends here.
    #[inline]
    pub unsafe fn release(&self) {
        self.held.store(false, Ordering::Release);
    }
}
