//! Host-side fixtures: allocator metadata lives in leaked buffers that an
//! [`OffsetPhysMapper`] makes appear at a fixed physical address.

use crate::bitmap::Bitmap;
use crate::bootmem::BootMem;
use crate::buddy::BuddyAllocator;
use crate::frame::{FrameTable, PageFrame};
use crate::phys_mapper::OffsetPhysMapper;
use crate::zone::{Zone, ZoneKind};
use kernel_info::memory::{MAX_ORDER_PAGES, PAGE_SIZE};
use kernel_memory_addresses::PhysicalAddress;

/// Where bootstrap metadata appears to live; below the zone, so zones stay clean.
pub const META_BASE: u32 = 0x0010_0000;

/// Start of the managed range; Normal memory.
pub const ZONE_BASE: u32 = 0x0100_0000;

pub fn leak_frames(len: usize) -> FrameTable<'static> {
    FrameTable::init(
        Box::leak(Box::new_uninit_slice(len)),
        PhysicalAddress::zero(),
        |_| ZoneKind::Normal,
    )
}

pub fn leak_bitmap(bits: usize) -> Bitmap<'static> {
    Bitmap::init(
        Box::leak(Box::new_uninit_slice(Bitmap::bytes_for(bits))),
        bits,
    )
}

/// A Normal zone of `superblocks` top-order blocks at [`ZONE_BASE`] whose
/// metadata is backed by host memory.
pub struct Arena {
    mapper: OffsetPhysMapper,
    meta_len: u32,
    frames: usize,
}

impl Arena {
    pub fn new(superblocks: usize) -> Self {
        let frames = superblocks * MAX_ORDER_PAGES;
        let meta_len = frames * size_of::<PageFrame>() + Zone::bitmap_bytes(frames) + 64;
        let buf: &'static mut [u64] = Box::leak(vec![0u64; meta_len.div_ceil(8)].into_boxed_slice());
        let host = buf.as_mut_ptr().expose_provenance();
        Self {
            mapper: OffsetPhysMapper::new(host.wrapping_sub(META_BASE as usize)),
            meta_len: u32::try_from(meta_len).unwrap(),
            frames,
        }
    }

    pub fn zone_start(&self) -> PhysicalAddress {
        PhysicalAddress::new(ZONE_BASE)
    }

    pub fn zone_limit(&self) -> PhysicalAddress {
        self.zone_start() + u32::try_from(self.frames).unwrap() * PAGE_SIZE
    }

    /// Build the allocator. Call once per arena; the metadata buffer is reused.
    pub fn allocator(&self) -> BuddyAllocator<'static> {
        let meta = PhysicalAddress::new(META_BASE);
        let bootmem = BootMem::new(meta, meta + self.meta_len).unwrap();
        unsafe { BuddyAllocator::new(bootmem, &self.mapper, self.zone_start(), self.zone_limit()) }
            .unwrap()
    }
}
