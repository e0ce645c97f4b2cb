//! Interrupt-enable state of the current core.

use core::sync::atomic::{Ordering, compiler_fence};

/// `true` when this build really masks hardware interrupts.
///
/// Hosted builds (anything not targeting bare metal on a supported
/// architecture) fall back to a no-op mask and rely on the spin flag alone.
pub const MASKS_INTERRUPTS: bool = arch::MASKS_INTERRUPTS;

/// Returns whether interrupts are currently enabled on this core.
///
/// Always `true` on hosted builds.
#[inline]
#[must_use]
pub fn are_enabled() -> bool {
    arch::are_enabled()
}

/// Masks interrupts on this core (`cli` / `cpsid i`).
///
/// Only meaningful at a privilege level that may mask interrupts; calling it
/// elsewhere faults or hangs. Prefer [`IrqGuard`], which restores the state.
#[inline]
pub fn disable() {
    arch::disable();
    compiler_fence(Ordering::SeqCst);
}

/// Unmasks interrupts on this core (`sti` / `cpsie i`).
#[inline]
pub fn enable() {
    compiler_fence(Ordering::SeqCst);
    arch::enable();
}

/// Masks interrupts for as long as it lives.
///
/// Creating one records whether interrupts were on and masks them; dropping
/// it unmasks them only if they were on to begin with. An allocator that is
/// entered from a handler (where interrupts are already off) therefore leaves
/// them off on the way out. Nested guards must drop in reverse order.
///
/// ```
/// use pool_sync::irq::{self, IrqGuard};
///
/// let before = irq::are_enabled();
/// {
///     let _masked = IrqGuard::new();
///     // carve a block
/// }
/// assert_eq!(irq::are_enabled(), before);
/// ```
pub struct IrqGuard {
    unmask_on_drop: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let unmask_on_drop = are_enabled();
        if unmask_on_drop {
            disable();
        }
        Self { unmask_on_drop }
    }

    /// Whether interrupts will be re-enabled when this guard drops.
    #[inline]
    #[must_use]
    pub const fn restores(&self) -> bool {
        self.unmask_on_drop
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.unmask_on_drop {
            enable();
        }
    }
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
mod arch {
    pub const MASKS_INTERRUPTS: bool = true;

    /// Reads `RFLAGS` (via `pushfq/pop`); bit 9 (`IF`) is the enable flag.
    #[inline]
    pub fn are_enabled() -> bool {
        let r: u64;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(nomem, preserves_flags)) }
        (r & (1 << 9)) != 0
    }

    #[inline]
    pub fn disable() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack)) }
    }

    #[inline]
    pub fn enable() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)) }
    }
}

#[cfg(all(target_os = "none", target_arch = "arm"))]
mod arch {
    pub const MASKS_INTERRUPTS: bool = true;

    /// Reads `PRIMASK`; bit 0 set means interrupts are masked.
    #[inline]
    pub fn are_enabled() -> bool {
        let primask: u32;
        unsafe {
            core::arch::asm!("mrs {}, PRIMASK", out(reg) primask, options(nomem, nostack, preserves_flags));
        }
        primask & 1 == 0
    }

    #[inline]
    pub fn disable() {
        unsafe { core::arch::asm!("cpsid i", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    pub fn enable() {
        unsafe { core::arch::asm!("cpsie i", options(nomem, nostack, preserves_flags)) }
    }
}

#[cfg(not(all(target_os = "none", any(target_arch = "x86_64", target_arch = "arm"))))]
mod arch {
    pub const MASKS_INTERRUPTS: bool = false;

    #[inline]
    pub const fn are_enabled() -> bool {
        true
    }

    #[inline]
    pub const fn disable() {}

    #[inline]
    pub const fn enable() {}
}
