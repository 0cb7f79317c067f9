#![allow(dead_code)]

use kernel_alloc::{BootMem, BuddyAllocator, OffsetPhysMapper, PageFrame, PhysicalMemory, Zone};
use kernel_info::memory::{MAX_ORDER_PAGES, PAGE_SIZE};
use kernel_memory_addresses::PhysicalAddress;

pub const MIB: u32 = 1024 * 1024;
pub const TOP_BLOCK: u32 = MAX_ORDER_PAGES as u32 * PAGE_SIZE;

/// Bootstrap bytes needed for `frames` managed frames split over at most two zones.
pub fn metadata_bytes(frames: usize) -> u32 {
    let bytes = frames * size_of::<PageFrame>() + 2 * Zone::bitmap_bytes(frames) + 64;
    u32::try_from(bytes).unwrap()
}

/// Host memory standing in for physical `[base, base + len)`.
pub struct Backing {
    mapper: OffsetPhysMapper,
    base: PhysicalAddress,
    len: u32,
}

impl Backing {
    pub fn new(base: u32, len: u32) -> Self {
        let words = (len as usize).div_ceil(8);
        let buf: &'static mut [u64] = Box::leak(vec![0u64; words].into_boxed_slice());
        let host = buf.as_mut_ptr().expose_provenance();
        Self {
            mapper: OffsetPhysMapper::new(host.wrapping_sub(base as usize)),
            base: PhysicalAddress::new(base),
            len,
        }
    }

    pub fn mapper(&self) -> &OffsetPhysMapper {
        &self.mapper
    }

    pub fn bootmem(&self) -> BootMem {
        BootMem::new(self.base, self.base + self.len).unwrap()
    }
}

/// Allocator over `[start, start + len)` with metadata carved at `meta`.
pub fn allocator_with_metadata_at(meta: u32, start: u32, len: u32) -> BuddyAllocator<'static> {
    let frames = (len / PAGE_SIZE) as usize;
    let backing = Backing::new(meta, metadata_bytes(frames));
    let bootmem = backing.bootmem();
    let start = PhysicalAddress::new(start);
    unsafe { BuddyAllocator::new(bootmem, backing.mapper(), start, start + len) }.unwrap()
}

/// `superblocks` top-order blocks of Normal memory at 16 MiB, metadata elsewhere.
pub fn clean_normal_zone(superblocks: u32) -> BuddyAllocator<'static> {
    allocator_with_metadata_at(MIB, 16 * MIB, superblocks * TOP_BLOCK)
}

pub fn shared_normal_zone(superblocks: u32) -> PhysicalMemory<'static> {
    PhysicalMemory::new(clean_normal_zone(superblocks))
}

/// Tiny deterministic generator for churn tests.
pub struct Lcg(u64);

impl Lcg {
    pub const fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    pub fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}
