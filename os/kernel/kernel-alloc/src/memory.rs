//! # The kernel's physical memory handle
//!
//! [`PhysicalMemory`] owns the [`BuddyAllocator`] behind an interrupt-safe spin
//! lock. Every operation takes the lock with interrupts disabled for its whole
//! duration, so task code and interrupt handlers may both allocate and free.
//!
//! There is no global instance: the kernel builds one during boot and passes it
//! by reference to whatever needs frames.
//!
//! ```text
//!  MemorySurvey ──► BootMem ──carves──► frame table + bitmaps
//!                      │                        │
//!                      └──────► BuddyAllocator ◄┘
//!                                     │
//!                              SpinMutex (lock_irq)
//!                                     │
//!                              PhysicalMemory
//! ```

use crate::bootmem::BootMem;
use crate::buddy::{AllocError, BuddyAllocator, InitError, MemoryStats};
use crate::frame::FrameError;
use crate::phys_mapper::PhysMapper;
use crate::zone::{ConsistencyError, ZoneKind};
use kernel_info::boot::{BootMemoryInfo, MemorySurvey};
use kernel_info::memory::MAX_PHYS_LIMIT;
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::SpinMutex;
use log::{info, warn};

pub struct PhysicalMemory<'m> {
    inner: SpinMutex<BuddyAllocator<'m>>,
}

impl<'m> PhysicalMemory<'m> {
    #[must_use]
    pub const fn new(allocator: BuddyAllocator<'m>) -> Self {
        Self {
            inner: SpinMutex::new(allocator),
        }
    }

    /// Build the allocator over `[start, limit)`, carving metadata from `bootmem`.
    ///
    /// # Errors
    /// See [`BuddyAllocator::new`].
    ///
    /// # Safety
    /// See [`BuddyAllocator::new`].
    pub unsafe fn init<M: PhysMapper>(
        bootmem: BootMem,
        mapper: &M,
        start: PhysicalAddress,
        limit: PhysicalAddress,
    ) -> Result<Self, InitError> {
        // SAFETY: Upheld by the caller.
        let allocator = unsafe { BuddyAllocator::new(bootmem, mapper, start, limit)? };
        Ok(Self::new(allocator))
    }

    /// Manage everything from `kernel_end` up to the surveyed top of memory.
    ///
    /// The surveyed size is clamped to [`MAX_PHYS_LIMIT`]. Bootstrap metadata is
    /// carved directly after the kernel image and ends up reserved.
    ///
    /// # Errors
    /// - [`InitError::Bootstrap`] if nothing lies above `kernel_end`, or the
    ///   metadata does not fit.
    /// - [`InitError::RegionTooSmall`] if no top-order block remains.
    ///
    /// # Safety
    /// Everything from `kernel_end` to the surveyed top must be unused RAM,
    /// mapped and writable through `mapper`.
    pub unsafe fn from_survey<S: MemorySurvey, M: PhysMapper>(
        survey: &S,
        kernel_end: PhysicalAddress,
        mapper: &M,
    ) -> Result<Self, InitError> {
        let usable = survey.usable_bytes();
        let top = u32::try_from(usable)
            .unwrap_or(u32::MAX)
            .min(MAX_PHYS_LIMIT);
        if u64::from(top) < usable {
            warn!("pmm: {usable} usable bytes reported, only managing up to 0x{top:08X}");
        }
        let limit = PhysicalAddress::new(top);
        info!("pmm: kernel ends at {kernel_end}, memory tops out at {limit}");

        let bootmem = BootMem::new(kernel_end, limit)?;
        // SAFETY: Upheld by the caller.
        unsafe { Self::init(bootmem, mapper, kernel_end, limit) }
    }

    /// [`Self::from_survey`] with the facts the boot stub handed over.
    ///
    /// # Errors
    /// See [`Self::from_survey`].
    ///
    /// # Safety
    /// See [`Self::from_survey`].
    pub unsafe fn from_boot_info<M: PhysMapper>(
        info: &BootMemoryInfo,
        mapper: &M,
    ) -> Result<Self, InitError> {
        // SAFETY: Upheld by the caller.
        unsafe { Self::from_survey(info, info.kernel_end(), mapper) }
    }

    /// # Errors
    /// See [`BuddyAllocator::alloc_pages`].
    pub fn alloc_pages(&self, order: usize) -> Result<PhysicalAddress, AllocError> {
        self.inner.lock_irq().alloc_pages(order)
    }

    /// # Errors
    /// See [`BuddyAllocator::alloc_pages_from`].
    pub fn alloc_pages_from(
        &self,
        kind: ZoneKind,
        order: usize,
    ) -> Result<PhysicalAddress, AllocError> {
        self.inner.lock_irq().alloc_pages_from(kind, order)
    }

    /// # Errors
    /// See [`BuddyAllocator::free_pages`].
    pub fn free_pages(&self, address: PhysicalAddress, order: usize) -> Result<(), AllocError> {
        self.inner.lock_irq().free_pages(address, order)
    }

    /// # Errors
    /// See [`BuddyAllocator::retain`].
    pub fn retain(&self, address: PhysicalAddress) -> Result<u32, FrameError> {
        self.inner.lock_irq().retain(address)
    }

    /// # Errors
    /// See [`BuddyAllocator::release`].
    pub fn release(&self, address: PhysicalAddress) -> Result<u32, FrameError> {
        self.inner.lock_irq().release(address)
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.inner.lock_irq().stats()
    }

    #[must_use]
    pub fn total_free_bytes(&self) -> u64 {
        self.inner.lock_irq().total_free_bytes()
    }

    #[must_use]
    pub fn total_used_bytes(&self) -> u64 {
        self.inner.lock_irq().total_used_bytes()
    }

    /// # Errors
    /// See [`BuddyAllocator::verify`].
    pub fn verify(&self) -> Result<(), ConsistencyError> {
        self.inner.lock_irq().verify()
    }

    pub fn log_state(&self) {
        self.inner.lock_irq().log_state();
    }

    /// Run `f` with exclusive access for a multi-step sequence that must not
    /// interleave with other allocator users.
    pub fn with_allocator<U>(&self, f: impl FnOnce(&mut BuddyAllocator<'m>) -> U) -> U {
        self.inner.with_lock_irq(f)
    }

    #[must_use]
    pub fn into_inner(self) -> BuddyAllocator<'m> {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Arena;

    #[test]
    fn handle_forwards_under_the_lock() {
        let arena = Arena::new(2);
        let mem = PhysicalMemory::new(arena.allocator());

        let a = mem.alloc_pages(9).unwrap();
        let b = mem.alloc_pages_from(ZoneKind::Normal, 9).unwrap();
        assert_ne!(a, b);
        assert_eq!(mem.alloc_pages(0), Err(AllocError::OutOfMemory(0)));
        assert_eq!(mem.total_free_bytes(), 0);

        assert_eq!(mem.retain(a), Ok(2));
        assert_eq!(mem.release(a), Ok(1));
        mem.free_pages(a, 9).unwrap();
        mem.free_pages(b, 9).unwrap();
        mem.verify().unwrap();
        assert_eq!(mem.stats().free_frames(), 1024);

        let allocator = mem.into_inner();
        assert_eq!(allocator.stats().allocated_frames(), 0);
    }

    #[test]
    fn with_allocator_groups_operations() {
        let arena = Arena::new(1);
        let mem = PhysicalMemory::new(arena.allocator());
        let (x, y) = mem.with_allocator(|buddy| {
            let x = buddy.alloc_pages(3).unwrap();
            let y = buddy.alloc_pages(3).unwrap();
            (x, y)
        });
        assert_eq!(y, x + 8 * 4096);
        mem.with_allocator(|buddy| {
            buddy.free_pages(y, 3).unwrap();
            buddy.free_pages(x, 3).unwrap();
        });
        assert_eq!(mem.stats().zone(ZoneKind::Normal).unwrap().free_blocks[9], 1);
    }
}
