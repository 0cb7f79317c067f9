//! # Physical Memory Address Types (32-bit x86)
//!
//! Strongly typed wrappers for raw physical addresses and page bases used by
//! the physical memory manager.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] | A raw 32-bit physical address. |
//! | [`PhysicalPage<S>`] | A page-aligned base of a page of size `S`. |
//! | [`PageSize`] | Marker trait implemented by [`Size4K`]. |
//!
//! Page frames are always 4 KiB.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0040_1234);
//! let page = pa.page::<Size4K>();
//! assert_eq!(page.number(), 0x401);
//! assert_eq!(page.base().as_u32() + pa.offset::<Size4K>(), pa.as_u32());
//! assert!(page.base().is_aligned(Size4K::SIZE));
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`
//!   and `Hash`.
//! - Arithmetic that can leave the 32-bit space is `checked_*` and returns
//!   `Option`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod page_size;
mod physical_address;
mod physical_page;

pub use page_size::{PageSize, Size4K};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_and_offset_4k() {
        let a = PhysicalAddress::new(0x1234_5678);
        let p = a.page::<Size4K>();
        assert_eq!(p.base().as_u32(), 0x1234_5000);
        assert_eq!(a.offset::<Size4K>(), 0x678);
        assert_eq!(p.number(), 0x1_2345);
    }

    #[test]
    fn alignment_helpers() {
        let a = PhysicalAddress::new(0x12345);
        assert_eq!(a.align_down(0x1000).as_u32(), 0x12000);
        assert_eq!(a.checked_align_up(0x1000).unwrap().as_u32(), 0x13000);
        assert_eq!(a.checked_align_up(8).unwrap().as_u32(), 0x12348);
        assert!(!a.is_aligned(2));
        assert!(PhysicalAddress::new(0x13000).is_aligned(0x1000));
    }

    #[test]
    fn align_up_at_the_top_of_the_space() {
        let top = PhysicalAddress::new(0xFFFF_F001);
        assert_eq!(top.checked_align_up(0x1000), None);
        assert_eq!(
            PhysicalAddress::new(0xFFFF_F000).checked_align_up(0x1000),
            Some(PhysicalAddress::new(0xFFFF_F000))
        );
    }

    #[test]
    fn checked_arithmetic() {
        let a = PhysicalAddress::new(0xFFFF_FF00);
        assert_eq!(a.checked_add(0xFF), Some(PhysicalAddress::new(0xFFFF_FFFF)));
        assert_eq!(a.checked_add(0x100), None);
        assert_eq!(a.offset_from(PhysicalAddress::new(0xFFFF_0000)), Some(0xFF00));
        assert_eq!(PhysicalAddress::zero().offset_from(a), None);
    }

    #[test]
    fn pages_from_aligned_addresses_only() {
        assert!(PhysicalPage::<Size4K>::from_aligned(PhysicalAddress::new(0x2000)).is_some());
        assert!(PhysicalPage::<Size4K>::from_aligned(PhysicalAddress::new(0x2004)).is_none());
        let last = PhysicalPage::<Size4K>::from_number(0xF_FFFF);
        assert_eq!(last.checked_next(), None);
    }

    #[test]
    fn formatting() {
        let a = PhysicalAddress::new(0xB8000);
        assert_eq!(format!("{a}"), "0x000B8000");
        assert_eq!(format!("{a:?}"), "PA(0x000B8000)");
        assert_eq!(format!("{}", a.page::<Size4K>()), "0x000B8000/4K");
    }
}
