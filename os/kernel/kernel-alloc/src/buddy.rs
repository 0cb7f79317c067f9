//! # Zoned buddy page allocator
//!
//! Blocks of `2^order` contiguous frames, `0 <= order < MAX_ORDER`. A block of
//! order `o` at zone-relative frame `p` has its buddy at `p ^ (1 << o)`; two free
//! buddies merge into one block of order `o + 1`.
//!
//! ## Lifecycle
//!
//! 1. [`BuddyAllocator::new`] plans the zones, carves the frame table and all
//!    bitmaps from [`BootMem`], reserves whatever bootmem consumed, and seeds
//!    the free lists. Bootmem is moved in and dropped there.
//! 2. From then on it is the only path through which frames enter or leave
//!    circulation.
//!
//! ## Allocation
//!
//! Scan from the requested order upward for a non-empty free area, take its
//! lowest block, and split it down, returning each upper half to the free
//! area one order below. Normal memory is preferred; the DMA zone is the
//! fallback.
//!
//! ## Contract violations
//!
//! An invalid order, a foreign address, or a double free is logged at `error`
//! level. Debug builds and the `strict` feature then panic; release builds
//! refuse the call and leave the allocator untouched.

use crate::bootmem::{BootMem, BootMemError};
use crate::frame::{FrameError, FrameTable, PageFrame};
use crate::phys_mapper::PhysMapper;
use crate::zone::{ConsistencyError, Zone, ZoneKind, ZoneLayout, ZoneStats};
use kernel_info::memory::{MAX_ORDER, PAGE_SHIFT, PAGE_SIZE};
use kernel_memory_addresses::PhysicalAddress;
use log::{debug, error, info, trace};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    #[error("order {0} is not below MAX_ORDER")]
    InvalidOrder(usize),
    #[error("no free block of order {0}")]
    OutOfMemory(usize),
    #[error("{address} is not the head of an allocated order-{order} block")]
    InvalidAddress {
        address: PhysicalAddress,
        order: usize,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Bootstrap(#[from] BootMemError),
    #[error("[{start}, {limit}) does not hold a single top-order block")]
    RegionTooSmall {
        start: PhysicalAddress,
        limit: PhysicalAddress,
    },
}

/// Smallest order whose block holds `size` bytes, or `None` if even the
/// largest block is too small.
#[must_use]
pub const fn order_for_bytes(size: u32) -> Option<usize> {
    let pages = size.div_ceil(PAGE_SIZE);
    let order = if pages <= 1 {
        0
    } else {
        (u32::BITS - (pages - 1).leading_zeros()) as usize
    };
    if order < MAX_ORDER { Some(order) } else { None }
}

/// Bytes covered by a block of `order`.
#[must_use]
pub const fn order_bytes(order: usize) -> u64 {
    1u64 << (PAGE_SHIFT as usize + order)
}

/// Whether contract violations panic. The crate's own unit tests keep the
/// refusal path so they can check it leaves no trace.
const PANIC_ON_VIOLATION: bool = cfg!(any(feature = "strict", all(debug_assertions, not(test))));

#[cold]
#[track_caller]
fn contract_violation(err: AllocError) -> AllocError {
    error!("pmm: refused: {err}");
    if PANIC_ON_VIOLATION {
        panic!("pmm contract violation: {err}");
    }
    err
}

/// Accounting snapshot over all zones.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct MemoryStats {
    pub zones: [Option<ZoneStats>; ZoneKind::COUNT],
}

impl MemoryStats {
    #[must_use]
    pub const fn zone(&self, kind: ZoneKind) -> Option<&ZoneStats> {
        self.zones[kind.index()].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ZoneStats> + '_ {
        self.zones.iter().flatten()
    }

    #[must_use]
    pub fn total_frames(&self) -> usize {
        self.iter().map(|z| z.total_frames).sum()
    }

    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.iter().map(|z| z.free_frames).sum()
    }

    #[must_use]
    pub fn allocated_frames(&self) -> usize {
        self.iter().map(|z| z.allocated_frames).sum()
    }

    #[must_use]
    pub fn reserved_frames(&self) -> usize {
        self.iter().map(|z| z.reserved_frames).sum()
    }

    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.iter().map(ZoneStats::free_bytes).sum()
    }

    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.iter().map(ZoneStats::used_bytes).sum()
    }
}

pub struct BuddyAllocator<'m> {
    frames: FrameTable<'m>,
    zones: [Option<Zone<'m>>; ZoneKind::COUNT],
    layout: ZoneLayout,
}

impl<'m> BuddyAllocator<'m> {
    /// Build the allocator over `[start, limit)`.
    ///
    /// Metadata is carved from `bootmem` and written through `mapper`. Every
    /// frame `bootmem` has consumed by the time the metadata is carved, the
    /// metadata itself included, is reserved if it lies in the managed range.
    /// Bootmem is consumed: whatever it had left becomes ordinary free memory,
    /// so it can never hand out a frame the allocator also owns.
    ///
    /// ```compile_fail
    /// use kernel_alloc::{BootMem, BuddyAllocator, FrameAlloc, IdentityPhysMapper};
    /// use kernel_memory_addresses::PhysicalAddress;
    ///
    /// let start = PhysicalAddress::new(0x0100_0000);
    /// let limit = PhysicalAddress::new(0x0120_0000);
    /// let mut bootmem = BootMem::new(start, limit).unwrap();
    /// let _ = unsafe { BuddyAllocator::new(bootmem, &IdentityPhysMapper, start, limit) };
    /// let _ = bootmem.alloc_4k(); // use after move
    /// ```
    ///
    /// # Errors
    /// - [`InitError::RegionTooSmall`] if no top-order block fits.
    /// - [`InitError::Bootstrap`] if bootmem cannot hold the metadata.
    ///
    /// # Safety
    /// Bootmem's region must be mapped and writable through `mapper` and must
    /// not be in use by anything else for `'m`.
    pub unsafe fn new<M: PhysMapper>(
        mut bootmem: BootMem,
        mapper: &M,
        start: PhysicalAddress,
        limit: PhysicalAddress,
    ) -> Result<Self, InitError> {
        let layout = ZoneLayout::plan(start, limit)?;
        info!(
            "pmm: managing {}..0x{:08X} ({} frames)",
            layout.start(),
            layout.end(),
            layout.frame_count()
        );

        // SAFETY: Upheld by the caller.
        let slots =
            unsafe { bootmem.allocate_array::<PageFrame, M>(mapper, layout.frame_count())? };
        let mut frames = FrameTable::init(slots, layout.start(), |index| {
            layout.kind_of_frame(index)
        });

        let mut zones = [None, None];
        for span in layout.spans() {
            let bytes = Zone::bitmap_bytes(span.frame_count());
            // SAFETY: Upheld by the caller.
            let storage = unsafe { bootmem.allocate_array::<u8, M>(mapper, bytes)? };
            zones[span.kind().index()] = Some(Zone::new(*span, storage));
        }

        let reserved = frames.reserve_range(bootmem.start(), bootmem.position().as_u64());
        if reserved != 0 {
            info!(
                "pmm: {reserved} frames reserved for bootstrap data {}..{}",
                bootmem.start(),
                bootmem.position()
            );
        }

        for zone in zones.iter_mut().flatten() {
            zone.seed(&mut frames);
        }

        let this = Self {
            frames,
            zones,
            layout,
        };
        this.log_state();
        Ok(this)
    }

    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &ZoneLayout {
        &self.layout
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &FrameTable<'m> {
        &self.frames
    }

    #[inline]
    #[must_use]
    pub const fn zone(&self, kind: ZoneKind) -> Option<&Zone<'m>> {
        self.zones[kind.index()].as_ref()
    }

    /// Allocate `2^order` contiguous frames, preferring the Normal zone.
    ///
    /// # Errors
    /// - [`AllocError::InvalidOrder`] if `order >= MAX_ORDER`.
    /// - [`AllocError::OutOfMemory`] if no zone has a large enough block.
    pub fn alloc_pages(&mut self, order: usize) -> Result<PhysicalAddress, AllocError> {
        Self::check_order(order)?;
        [ZoneKind::Normal, ZoneKind::Dma]
            .into_iter()
            .find_map(|kind| self.alloc_in(kind, order))
            .ok_or_else(|| Self::out_of_memory(order))
    }

    /// Allocate `2^order` contiguous frames from exactly the zone `kind`.
    ///
    /// # Errors
    /// - [`AllocError::InvalidOrder`] if `order >= MAX_ORDER`.
    /// - [`AllocError::OutOfMemory`] if the zone is absent or has no large
    ///   enough block.
    pub fn alloc_pages_from(
        &mut self,
        kind: ZoneKind,
        order: usize,
    ) -> Result<PhysicalAddress, AllocError> {
        Self::check_order(order)?;
        self.alloc_in(kind, order)
            .ok_or_else(|| Self::out_of_memory(order))
    }

    fn alloc_in(&mut self, kind: ZoneKind, order: usize) -> Option<PhysicalAddress> {
        let zone = self.zones[kind.index()].as_mut()?;
        let frame = zone.alloc(&mut self.frames, order)?;
        let address = self.frames.get(frame).address();
        trace!("pmm: alloc order {order} from {kind} at {address}");
        Some(address)
    }

    /// Return the block of `order` at `address`, merging it with free buddies.
    ///
    /// # Errors
    /// - [`AllocError::InvalidOrder`] if `order >= MAX_ORDER`.
    /// - [`AllocError::InvalidAddress`] if `address` is outside every zone,
    ///   not order-aligned relative to its zone, or not the head of an
    ///   allocated block of exactly `order`.
    pub fn free_pages(&mut self, address: PhysicalAddress, order: usize) -> Result<(), AllocError> {
        Self::check_order(order)?;
        let invalid = || contract_violation(AllocError::InvalidAddress { address, order });

        if !address.is_aligned(PAGE_SIZE) {
            return Err(invalid());
        }
        let Ok(frame) = self.frames.index_of(address) else {
            return Err(invalid());
        };
        let head = self.frames.get(frame);
        let Some(zone) = self.zones[head.zone().index()].as_mut() else {
            return Err(invalid());
        };
        let aligned = (frame - zone.span().first_frame()).is_multiple_of(1 << order);
        if !aligned || !head.is_allocated() || head.order() != order {
            return Err(invalid());
        }

        let (merged, merged_order) = zone.free(&mut self.frames, frame, order);
        trace!(
            "pmm: free order {order} at {address}, now part of a free order-{merged_order} block at frame {merged}"
        );
        Ok(())
    }

    /// Add an owner to the allocated block at `address`.
    ///
    /// # Errors
    /// See [`FrameTable::retain`].
    pub fn retain(&mut self, address: PhysicalAddress) -> Result<u32, FrameError> {
        self.frames.retain(address)
    }

    /// Drop an owner from the allocated block at `address`. A count of zero
    /// does not free the block.
    ///
    /// # Errors
    /// See [`FrameTable::release`].
    pub fn release(&mut self, address: PhysicalAddress) -> Result<u32, FrameError> {
        self.frames.release(address)
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            zones: core::array::from_fn(|i| self.zones[i].as_ref().map(Zone::stats)),
        }
    }

    #[must_use]
    pub fn total_free_bytes(&self) -> u64 {
        self.stats().free_bytes()
    }

    /// Allocated plus reserved bytes.
    #[must_use]
    pub fn total_used_bytes(&self) -> u64 {
        self.stats().used_bytes()
    }

    /// Check every zone against the frame table.
    ///
    /// # Errors
    /// The first violated invariant.
    pub fn verify(&self) -> Result<(), ConsistencyError> {
        self.zones
            .iter()
            .flatten()
            .try_for_each(|zone| zone.verify(&self.frames))
    }

    /// Dump per-zone, per-order free counts at `info` level.
    pub fn log_state(&self) {
        for zone in self.zones.iter().flatten() {
            zone.log_state();
        }
    }

    fn check_order(order: usize) -> Result<(), AllocError> {
        if order < MAX_ORDER {
            Ok(())
        } else {
            Err(contract_violation(AllocError::InvalidOrder(order)))
        }
    }

    fn out_of_memory(order: usize) -> AllocError {
        debug!(
            "pmm: out of memory for order {order} ({} KiB)",
            (PAGE_SIZE << order) >> 10
        );
        AllocError::OutOfMemory(order)
    }
}
