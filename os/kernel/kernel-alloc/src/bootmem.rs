//! # Bootstrap (bump) allocator
//!
//! Hands out physical memory linearly before any general allocator exists.
//! There is no `free`: everything consumed here stays consumed, and the buddy
//! allocator later marks the consumed span as reserved.
//!
//! ```text
//!  start            current                    limit
//!    │  consumed      │        remaining          │
//!    ├────────────────┼───────────────────────────┤
//! ```
//!
//! `start <= current <= limit` holds at all times and `current` never moves
//! backward, not even when an allocation fails.

use crate::phys_mapper::PhysMapper;
use core::mem::MaybeUninit;
use kernel_info::memory::{BOOTMEM_ALIGN, PAGE_SIZE};
use kernel_memory_addresses::PhysicalAddress;
use log::trace;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootMemError {
    #[error("degenerate bootstrap region [{start}, {limit})")]
    DegenerateRegion {
        start: PhysicalAddress,
        limit: PhysicalAddress,
    },
    #[error("bootstrap memory exhausted: {requested} bytes requested, {remaining} remaining")]
    OutOfMemory { requested: u64, remaining: u32 },
}

#[derive(Debug)]
pub struct BootMem {
    start: PhysicalAddress,
    current: PhysicalAddress,
    limit: PhysicalAddress,
}

impl BootMem {
    /// Manage `[start, limit)`.
    ///
    /// # Errors
    /// [`BootMemError::DegenerateRegion`] if `start >= limit`.
    pub fn new(start: PhysicalAddress, limit: PhysicalAddress) -> Result<Self, BootMemError> {
        if start >= limit {
            return Err(BootMemError::DegenerateRegion { start, limit });
        }
        Ok(Self {
            start,
            current: start,
            limit,
        })
    }

    /// Reserve `size` bytes, rounded up to [`BOOTMEM_ALIGN`].
    ///
    /// # Errors
    /// [`BootMemError::OutOfMemory`] if the request does not fit below `limit`.
    pub fn allocate(&mut self, size: u32) -> Result<PhysicalAddress, BootMemError> {
        self.allocate_aligned(size, BOOTMEM_ALIGN)
    }

    /// Reserve `size` bytes (rounded up to [`BOOTMEM_ALIGN`]) at an address
    /// aligned to `align`. Padding skipped for alignment is consumed too.
    ///
    /// # Errors
    /// [`BootMemError::OutOfMemory`] if the request does not fit below `limit`.
    ///
    /// # Panics
    /// In debug builds, if `align` is not a power of two.
    pub fn allocate_aligned(
        &mut self,
        size: u32,
        align: u32,
    ) -> Result<PhysicalAddress, BootMemError> {
        debug_assert!(align.is_power_of_two());
        let align = align.max(BOOTMEM_ALIGN);
        let exhausted = BootMemError::OutOfMemory {
            requested: u64::from(size),
            remaining: self.remaining(),
        };

        let addr = self.current.checked_align_up(align).ok_or(exhausted)?;
        let rounded = size
            .checked_next_multiple_of(BOOTMEM_ALIGN)
            .ok_or(exhausted)?;
        let end = addr.checked_add(rounded).ok_or(exhausted)?;
        if end > self.limit {
            return Err(exhausted);
        }

        self.current = end;
        trace!("bootmem: {size} bytes at {addr}, {} left", self.remaining());
        Ok(addr)
    }

    /// Reserve one page-aligned 4 KiB frame.
    ///
    /// # Errors
    /// [`BootMemError::OutOfMemory`] if no whole frame is left.
    pub fn allocate_frame(&mut self) -> Result<PhysicalAddress, BootMemError> {
        self.allocate_aligned(PAGE_SIZE, PAGE_SIZE)
    }

    /// Carve an array of `len` `T`s and return it through `mapper`.
    ///
    /// The contents are uninitialized.
    ///
    /// # Errors
    /// [`BootMemError::OutOfMemory`] if the array does not fit.
    ///
    /// # Safety
    /// The carved range must be mapped and writable through `mapper`, and
    /// nothing else may access it for `'a`.
    pub unsafe fn allocate_array<'a, T, M: PhysMapper>(
        &mut self,
        mapper: &M,
        len: usize,
    ) -> Result<&'a mut [MaybeUninit<T>], BootMemError> {
        let bytes = len.saturating_mul(size_of::<T>());
        let size = u32::try_from(bytes).map_err(|_| BootMemError::OutOfMemory {
            requested: u64::try_from(bytes).unwrap_or(u64::MAX),
            remaining: self.remaining(),
        })?;
        let align = u32::try_from(align_of::<T>()).unwrap_or(PAGE_SIZE);
        let pa = self.allocate_aligned(size, align)?;
        // SAFETY: Freshly carved, so exclusively ours; mapping upheld by the caller.
        Ok(unsafe { mapper.phys_to_slice_mut(pa, len) })
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn limit(&self) -> PhysicalAddress {
        self.limit
    }

    /// First address not yet handed out.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> PhysicalAddress {
        self.current
    }

    /// Bytes consumed so far, alignment padding included.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.current.as_u32() - self.start.as_u32()
    }

    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.limit.as_u32() - self.current.as_u32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pa(v: u32) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    #[test]
    fn rejects_degenerate_regions() {
        assert_eq!(
            BootMem::new(pa(0x2000), pa(0x2000)).unwrap_err(),
            BootMemError::DegenerateRegion {
                start: pa(0x2000),
                limit: pa(0x2000)
            }
        );
        assert!(BootMem::new(pa(0x3000), pa(0x2000)).is_err());
    }

    #[test]
    fn bumps_in_aligned_steps() {
        let mut bm = BootMem::new(pa(0x1000), pa(0x2000)).unwrap();
        assert_eq!(bm.allocate(3).unwrap(), pa(0x1000));
        assert_eq!(bm.allocate(8).unwrap(), pa(0x1008));
        assert_eq!(bm.allocate(0).unwrap(), pa(0x1010));
        assert_eq!(bm.position(), pa(0x1010));
        assert_eq!(bm.size(), 0x10);
        assert_eq!(bm.remaining(), 0x1000 - 0x10);
    }

    #[test]
    fn failure_leaves_position_untouched() {
        let mut bm = BootMem::new(pa(0x1000), pa(0x1040)).unwrap();
        bm.allocate(0x20).unwrap();
        let err = bm.allocate(0x40).unwrap_err();
        assert_eq!(
            err,
            BootMemError::OutOfMemory {
                requested: 0x40,
                remaining: 0x20
            }
        );
        assert_eq!(bm.position(), pa(0x1020));

        // exactly filling the region is fine
        assert_eq!(bm.allocate(0x20).unwrap(), pa(0x1020));
        assert_eq!(bm.remaining(), 0);
        assert!(bm.allocate(1).is_err());
    }

    #[test]
    fn aligned_allocations_consume_padding() {
        let mut bm = BootMem::new(pa(0x1008), pa(0x4000)).unwrap();
        assert_eq!(bm.allocate_frame().unwrap(), pa(0x2000));
        assert_eq!(bm.position(), pa(0x3000));
        assert_eq!(bm.size(), 0x3000 - 0x1008);
    }

    #[test]
    fn overflow_near_top_of_address_space_is_exhaustion() {
        let mut bm = BootMem::new(pa(0xFFFF_FFF0), pa(0xFFFF_FFF8)).unwrap();
        assert!(bm.allocate(u32::MAX).is_err());
        assert!(bm.allocate_frame().is_err());
        assert_eq!(bm.position(), pa(0xFFFF_FFF0));
    }
}
