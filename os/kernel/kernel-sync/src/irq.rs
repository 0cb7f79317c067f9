//! Interrupt masking and the interrupt-safe mutex guard.
//!
//! On bare-metal x86 targets (`target_os = "none"`) the helpers execute
//! `cli`/`sti` and read `EFLAGS.IF`. On hosted targets there are no hardware
//! interrupts to mask, so the helpers are no-ops and report interrupts as
//! disabled; this is what host-side unit tests run against.

use crate::{Mutex, MutexGuard, RawLock, RawUnlock};
use core::ops::{Deref, DerefMut};

/// Bit 9 of `EFLAGS`/`RFLAGS`.
const FLAGS_IF: usize = 1 << 9;

#[cfg(all(target_os = "none", any(target_arch = "x86", target_arch = "x86_64")))]
mod arch {
    /// Disables hardware interrupts (`cli`).
    #[inline]
    pub fn cli() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    /// Enables hardware interrupts (`sti`).
    #[inline]
    pub fn sti() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }

    #[cfg(target_arch = "x86")]
    #[inline]
    pub fn flags() -> usize {
        let r: u32;
        unsafe { core::arch::asm!("pushfd; pop {}", out(reg) r, options(preserves_flags)) }
        r as usize
    }

    #[cfg(target_arch = "x86_64")]
    #[inline]
    pub fn flags() -> usize {
        let r: u64;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(preserves_flags)) }
        r as usize
    }
}

#[cfg(not(all(target_os = "none", any(target_arch = "x86", target_arch = "x86_64"))))]
mod arch {
    #[inline]
    pub const fn cli() {}

    #[inline]
    pub const fn sti() {}

    #[inline]
    pub const fn flags() -> usize {
        0
    }
}

/// Disables hardware interrupts.
///
/// # Safety & Privilege
///
/// Must only be called where `cli` is permitted (ring 0).
#[inline]
pub fn cli_stop_interrupts() {
    arch::cli();
}

/// Enables hardware interrupts.
///
/// # Safety & Privilege
///
/// Must only be called where `sti` is permitted (ring 0). Typically used to
/// restore a previously saved interrupt state.
#[inline]
pub fn sti_enable_interrupts() {
    arch::sti();
}

/// Returns `true` if `EFLAGS.IF` is set.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    arch::flags() & FLAGS_IF != 0
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// The guard snapshots `IF`. If interrupts were enabled it executes `cli`, and
/// on drop it executes `sti` **only** in that case, so nested guards compose.
///
/// # Examples
///
/// ```
/// use kernel_sync::irq::{IrqGuard, interrupts_enabled};
///
/// let before = interrupts_enabled();
/// {
///     let _g = IrqGuard::new(); // interrupts disabled here
///     assert!(!interrupts_enabled());
/// }
/// assert_eq!(interrupts_enabled(), before);
/// ```
pub struct IrqGuard {
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
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
        let enabled = interrupts_enabled();
        if enabled {
            cli_stop_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }

    #[inline]
    #[must_use]
    pub const fn were_enabled(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            sti_enable_interrupts();
        }
    }
}

/// A mutex guard that also keeps interrupts disabled while held.
///
/// Created by [`Mutex::lock_irq`]. It
///
/// 1. saves the current interrupt state and disables interrupts, then
/// 2. acquires the underlying mutex,
///
/// and releases them in reverse order on drop. An interrupt handler on the
/// same CPU can therefore never spin on a lock held by the code it
/// interrupted.
pub struct IrqMutexGuard<'a, T, R: RawLock + RawUnlock> {
    // Field order is drop order: unlock first, then restore interrupts.
    guard: MutexGuard<'a, T, R>,
    _irq: IrqGuard,
}

impl<T, R: RawLock + RawUnlock> Deref for IrqMutexGuard<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, R: RawLock + RawUnlock> DerefMut for IrqMutexGuard<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T, R: RawLock + RawUnlock> Mutex<T, R> {
    /// Acquires the mutex with interrupts disabled for the guard's lifetime.
    ///
    /// # Platform / Privilege
    ///
    /// On bare metal this requires a context where `cli/sti` are permitted.
    #[inline]
    pub fn lock_irq(&self) -> IrqMutexGuard<'_, T, R> {
        let irq = IrqGuard::new();
        let guard = self.lock();
        IrqMutexGuard { guard, _irq: irq }
    }

    /// Like [`Mutex::lock_irq`] but gives up immediately if the lock is held.
    /// Interrupts are restored before returning `None`.
    #[inline]
    pub fn try_lock_irq(&self) -> Option<IrqMutexGuard<'_, T, R>> {
        let irq = IrqGuard::new();
        let guard = self.try_lock()?;
        Some(IrqMutexGuard { guard, _irq: irq })
    }

    /// Closure convenience for [`Mutex::lock_irq`].
    #[inline]
    pub fn with_lock_irq<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut g = self.lock_irq();
        f(&mut g)
    }
}
