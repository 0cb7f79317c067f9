//! # Memory Layout

/// Size of one physical page frame in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// Number of buddy orders. Order `MAX_ORDER - 1` is the largest block.
pub const MAX_ORDER: usize = 10;

/// Frames in a top-order block. Every zone is a multiple of this.
pub const MAX_ORDER_PAGES: usize = 1 << (MAX_ORDER - 1);

/// Bytes in a top-order block (2 MiB).
pub const MAX_ORDER_BYTES: u32 = (MAX_ORDER_PAGES as u32) * PAGE_SIZE;

/// Granularity of bootstrap (bump) allocations.
pub const BOOTMEM_ALIGN: u32 = 8;

/// Upper bound of memory reachable by legacy ISA DMA.
/// Frames below this address form the DMA zone.
pub const DMA_ZONE_LIMIT: u32 = 16 * 1024 * 1024;

/// Highest exclusive physical limit the allocator manages without PAE.
pub const MAX_PHYS_LIMIT: u32 = 0xFFFF_F000;

/// Where the kernel executes (VMA), matches the linker script.
///
/// The kernel maps all of low physical memory at this offset, so physical
/// address `pa` is reachable at `KERNEL_BASE + pa`.
pub const KERNEL_BASE: u32 = 0xC000_0000;

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    assert!(MAX_ORDER_PAGES == 512);
    assert!(BOOTMEM_ALIGN.is_power_of_two());
    assert!(DMA_ZONE_LIMIT.is_multiple_of(MAX_ORDER_BYTES));
    assert!(MAX_PHYS_LIMIT.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_BASE > DMA_ZONE_LIMIT);
};
