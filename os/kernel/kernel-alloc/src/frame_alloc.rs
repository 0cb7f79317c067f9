//! Single-frame allocation for page-table code.
//!
//! Page-table builders only ever need one 4 KiB frame at a time and should not
//! care whether they run during early boot (bump allocation, nothing is ever
//! returned) or after the buddy allocator is up.

use crate::bootmem::BootMem;
use crate::buddy::AllocError;
use crate::memory::PhysicalMemory;
use kernel_memory_addresses::{PhysicalPage, Size4K};

/// Source of 4 KiB physical frames.
///
/// Returns `None` on out-of-memory.
pub trait FrameAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;
}

/// Sink for frames previously obtained from the matching [`FrameAlloc`].
pub trait FrameFree {
    /// Return `frame`.
    ///
    /// # Errors
    /// Frames not obtained from `alloc_4k`, or already returned, are refused
    /// with [`AllocError::InvalidAddress`].
    fn free_4k(&mut self, frame: PhysicalPage<Size4K>) -> Result<(), AllocError>;
}

impl FrameAlloc for BootMem {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.allocate_frame().ok().map(PhysicalPage::containing)
    }
}

impl FrameAlloc for &PhysicalMemory<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.alloc_pages(0).ok().map(PhysicalPage::containing)
    }
}

impl FrameFree for &PhysicalMemory<'_> {
    fn free_4k(&mut self, frame: PhysicalPage<Size4K>) -> Result<(), AllocError> {
        self.free_pages(frame.base(), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Arena;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn bootmem_hands_out_aligned_frames_until_exhausted() {
        let mut bm = BootMem::new(PhysicalAddress::new(0x1010), PhysicalAddress::new(0x4000))
            .unwrap();
        let a = bm.alloc_4k().unwrap();
        let b = bm.alloc_4k().unwrap();
        assert_eq!(a.base().as_u32(), 0x2000);
        assert_eq!(b.base().as_u32(), 0x3000);
        assert!(bm.alloc_4k().is_none());
    }

    #[test]
    fn physical_memory_round_trips_single_frames() {
        let arena = Arena::new(1);
        let mem = PhysicalMemory::new(arena.allocator());
        let mut source = &mem;

        let frames: Vec<_> = (0..4).map(|_| source.alloc_4k().unwrap()).collect();
        assert_eq!(frames[3].base(), arena.zone_start() + 3 * 4096);
        for &f in &frames {
            source.free_4k(f).unwrap();
        }
        mem.verify().unwrap();
        assert_eq!(mem.stats().free_frames(), 512);

        let foreign = PhysicalPage::containing(PhysicalAddress::new(0));
        assert_eq!(
            source.free_4k(foreign),
            Err(AllocError::InvalidAddress {
                address: PhysicalAddress::new(0),
                order: 0
            })
        );
        assert!(matches!(
            source.free_4k(frames[0]),
            Err(AllocError::InvalidAddress { order: 0, .. })
        ));
        assert_eq!(mem.stats().free_frames(), 512);
    }
}
