//! # Locks for the pool allocators
//!
//! * [`irq`]: saving, masking and restoring the interrupt-enable state.
//! * [`SpinFlag`]: the exchange-based flag every lock here spins on.
//! * [`SpinMutex`]: a flag-protected cell, taken with or without interrupts
//!   masked.
//! * [`SpinLock`]: a [`SpinMutex`] that always masks interrupts.
//!
//! ```
//! use pool_sync::SpinMutex;
//!
//! static NEXT_FREE: SpinMutex<usize> = SpinMutex::new(0);
//!
//! {
//!     let mut g = NEXT_FREE.lock_irq();
//!     assert!(g.masks_interrupts());
//!     *g += 64;
//! }
//! assert_eq!(*NEXT_FREE.lock(), 64);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod flag;
pub mod irq;
mod mutex;
mod spin_lock;

pub use flag::SpinFlag;
pub use irq::IrqGuard;
pub use mutex::{SpinMutex, SpinMutexGuard};
pub use spin_lock::SpinLock;
