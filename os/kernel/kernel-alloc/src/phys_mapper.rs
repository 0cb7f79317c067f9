//! # Physical-to-virtual access for allocator metadata
//!
//! The bootstrap allocator hands out *physical* addresses, but the frame table
//! and free-area bitmaps carved from it must be written through pointers that
//! are valid in the current address space. [`PhysMapper`] abstracts over how
//! physical memory is reachable:
//!
//! - **Identity**: before paging, or with low memory identity-mapped.
//! - **Offset**: a higher-half kernel maps low physical memory at
//!   `KERNEL_BASE + pa`; host tests map it onto a leaked buffer.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::{OffsetPhysMapper, PhysMapper};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let mapper = OffsetPhysMapper::higher_half();
//! let ptr = mapper.phys_to_ptr(PhysicalAddress::new(0x0010_0000));
//! assert_eq!(ptr.addr(), 0xC010_0000_usize);
//! ```

use core::mem::MaybeUninit;
use core::ptr;
use kernel_info::memory::KERNEL_BASE;
use kernel_memory_addresses::PhysicalAddress;

/// Converts physical addresses to pointers usable in the current address space.
pub trait PhysMapper {
    /// Pointer through which the byte at `pa` is reachable.
    ///
    /// Producing the pointer is safe; dereferencing it is not.
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8;

    /// View `len` possibly uninitialized `T`s starting at `pa` as a slice.
    ///
    /// # Safety
    /// - `[pa, pa + len * size_of::<T>())` must be mapped, writable and
    ///   exclusively owned by the caller for `'a`.
    /// - The mapped pointer must be suitably aligned for `T`.
    unsafe fn phys_to_slice_mut<'a, T>(
        &self,
        pa: PhysicalAddress,
        len: usize,
    ) -> &'a mut [MaybeUninit<T>] {
        let ptr = self.phys_to_ptr(pa).cast::<MaybeUninit<T>>();
        debug_assert!(ptr.is_aligned(), "misaligned metadata at {pa}");
        // SAFETY: Upheld by the caller.
        unsafe { core::slice::from_raw_parts_mut(ptr, len) }
    }
}

/// Physical memory is mapped 1:1.
#[derive(Debug, Default, Copy, Clone)]
pub struct IdentityPhysMapper;

impl PhysMapper for IdentityPhysMapper {
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        ptr::with_exposed_provenance_mut(pa.as_usize())
    }
}

/// Physical memory is mapped at a constant virtual offset.
#[derive(Debug, Copy, Clone)]
pub struct OffsetPhysMapper {
    offset: usize,
}

impl OffsetPhysMapper {
    #[must_use]
    pub const fn new(offset: usize) -> Self {
        Self { offset }
    }

    /// The kernel's direct map of low physical memory at [`KERNEL_BASE`].
    #[must_use]
    pub const fn higher_half() -> Self {
        Self::new(KERNEL_BASE as usize)
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }
}

impl PhysMapper for OffsetPhysMapper {
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        ptr::with_exposed_provenance_mut(self.offset.wrapping_add(pa.as_usize()))
    }
}
