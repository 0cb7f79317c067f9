//! # Page Frame Table
//!
//! One [`PageFrame`] descriptor per physical page in the managed range,
//! stored in a single slice carved by the bootstrap allocator. Descriptors are
//! built once and never destroyed, only re-tagged.
//!
//! Lookups are index arithmetic: frame `i` describes
//! `base + i * PAGE_SIZE`.

use crate::zone::ZoneKind;
use bitfield_struct::bitfield;
use core::mem::MaybeUninit;
use kernel_info::memory::{PAGE_SHIFT, PAGE_SIZE};
use kernel_memory_addresses::PhysicalAddress;

/// Sentinel for "no frame" in the intrusive free-list links.
pub(crate) const NIL: u32 = u32::MAX;

/// Per-frame state bits.
#[bitfield(u8)]
pub struct FrameFlags {
    /// Never allocatable (kernel image, bootstrap carve-outs).
    pub reserved: bool,
    /// Head of an allocated block.
    pub allocated: bool,
    /// First frame of a block, free or allocated.
    pub head: bool,
    #[bits(5)]
    __: u8,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("{0} is outside the managed physical range")]
    OutOfRange(PhysicalAddress),
    #[error("{0} is not the head of an allocated block")]
    NotAllocated(PhysicalAddress),
    #[error("{0} has no outstanding references")]
    NotReferenced(PhysicalAddress),
}

/// Descriptor of one physical page frame.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct PageFrame {
    address: PhysicalAddress,
    ref_count: u32,
    pub(crate) next: u32,
    pub(crate) prev: u32,
    pub(crate) flags: FrameFlags,
    pub(crate) order: u8,
    zone: ZoneKind,
}

impl PageFrame {
    const fn new(address: PhysicalAddress, zone: ZoneKind) -> Self {
        Self {
            address,
            ref_count: 0,
            next: NIL,
            prev: NIL,
            flags: FrameFlags::new(),
            order: 0,
            zone,
        }
    }

    #[inline]
    #[must_use]
    pub const fn address(&self) -> PhysicalAddress {
        self.address
    }

    /// Active owners; 0 means free.
    #[inline]
    #[must_use]
    pub const fn ref_count(&self) -> u32 {
        self.ref_count
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Order of the block this frame heads. Meaningless unless [`Self::is_head`].
    #[inline]
    #[must_use]
    pub const fn order(&self) -> usize {
        self.order as usize
    }

    #[inline]
    #[must_use]
    pub const fn zone(&self) -> ZoneKind {
        self.zone
    }

    #[inline]
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        self.flags.reserved()
    }

    #[inline]
    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        self.flags.allocated()
    }

    #[inline]
    #[must_use]
    pub const fn is_head(&self) -> bool {
        self.flags.head()
    }

    /// Tag as the head of a freshly allocated block of `order`.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn mark_allocated(&mut self, order: usize) {
        self.flags = self.flags.with_allocated(true).with_head(true);
        self.order = order as u8;
        self.ref_count = 1;
    }

    /// Drop the allocated-head tag; the free-area insert re-tags the block.
    pub(crate) const fn mark_released(&mut self) {
        self.flags = self.flags.with_allocated(false).with_head(false);
        self.ref_count = 0;
    }
}

/// The shared descriptor array for the whole managed range.
pub struct FrameTable<'m> {
    frames: &'m mut [PageFrame],
    base: PhysicalAddress,
}

impl<'m> FrameTable<'m> {
    /// Build one descriptor per slot, starting at `base`, every frame
    /// unreserved, unallocated and owned by `zone_of(index)`.
    pub fn init(
        slots: &'m mut [MaybeUninit<PageFrame>],
        base: PhysicalAddress,
        zone_of: impl Fn(usize) -> ZoneKind,
    ) -> Self {
        debug_assert!(base.is_aligned(PAGE_SIZE));
        let mut address = base;
        for (index, slot) in slots.iter_mut().enumerate() {
            slot.write(PageFrame::new(address, zone_of(index)));
            address = PhysicalAddress::new(address.as_u32().wrapping_add(PAGE_SIZE));
        }
        // SAFETY: Every slot was written above.
        let frames = unsafe {
            core::slice::from_raw_parts_mut(slots.as_mut_ptr().cast::<PageFrame>(), slots.len())
        };
        Self { frames, base }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Address of frame 0.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    /// Exclusive end of the described range, as `u64` so a range ending at
    /// 4 GiB is representable.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.as_u64() + ((self.frames.len() as u64) << PAGE_SHIFT)
    }

    /// Index of the frame containing `address`.
    ///
    /// # Errors
    /// [`FrameError::OutOfRange`] if `address` is not described by this table.
    pub fn index_of(&self, address: PhysicalAddress) -> Result<usize, FrameError> {
        address
            .offset_from(self.base)
            .map(|offset| (offset >> PAGE_SHIFT) as usize)
            .filter(|&index| index < self.frames.len())
            .ok_or(FrameError::OutOfRange(address))
    }

    /// Descriptor of the frame containing `address`.
    ///
    /// # Errors
    /// [`FrameError::OutOfRange`] if `address` is not described by this table.
    pub fn frame_for(&self, address: PhysicalAddress) -> Result<&PageFrame, FrameError> {
        self.index_of(address).map(|index| &self.frames[index])
    }

    /// Add an owner to the allocated block headed at `address`.
    /// Returns the new count.
    ///
    /// # Errors
    /// - [`FrameError::OutOfRange`] for addresses outside the table.
    /// - [`FrameError::NotAllocated`] unless `address` heads an allocated block.
    pub fn retain(&mut self, address: PhysicalAddress) -> Result<u32, FrameError> {
        let frame = self.allocated_head_mut(address)?;
        frame.ref_count = frame.ref_count.saturating_add(1);
        Ok(frame.ref_count)
    }

    /// Drop an owner from the allocated block headed at `address`.
    /// Returns the new count. Reaching zero does **not** free the block.
    ///
    /// # Errors
    /// - [`FrameError::OutOfRange`] for addresses outside the table.
    /// - [`FrameError::NotAllocated`] unless `address` heads an allocated block.
    /// - [`FrameError::NotReferenced`] if the count is already zero.
    pub fn release(&mut self, address: PhysicalAddress) -> Result<u32, FrameError> {
        let frame = self.allocated_head_mut(address)?;
        if frame.ref_count == 0 {
            return Err(FrameError::NotReferenced(address));
        }
        frame.ref_count -= 1;
        Ok(frame.ref_count)
    }

    fn allocated_head_mut(
        &mut self,
        address: PhysicalAddress,
    ) -> Result<&mut PageFrame, FrameError> {
        let index = self.index_of(address)?;
        let frame = &mut self.frames[index];
        if frame.is_allocated() && frame.address == address {
            Ok(frame)
        } else {
            Err(FrameError::NotAllocated(address))
        }
    }

    /// Tag every frame overlapping `[start, end)` as reserved.
    /// Returns how many frames changed.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn reserve_range(&mut self, start: PhysicalAddress, end: u64) -> usize {
        let first = u64::from(start.align_down(PAGE_SIZE).as_u32()).max(self.base.as_u64());
        let end = end.min(self.end());
        if first >= end {
            return 0;
        }
        let from = ((first - self.base.as_u64()) >> PAGE_SHIFT) as usize;
        let to = (end - self.base.as_u64()).div_ceil(u64::from(PAGE_SIZE)) as usize;
        let mut changed = 0;
        for frame in &mut self.frames[from..to] {
            if !frame.is_reserved() {
                frame.flags.set_reserved(true);
                changed += 1;
            }
        }
        changed
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> &PageFrame {
        &self.frames[index]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, index: usize) -> &mut PageFrame {
        &mut self.frames[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageFrame> + '_ {
        self.frames.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(len: usize, base: u32) -> FrameTable<'static> {
        let slots = Box::leak(Box::new_uninit_slice(len));
        FrameTable::init(slots, PhysicalAddress::new(base), |_| ZoneKind::Normal)
    }

    #[test]
    fn flags_pack_into_one_byte() {
        assert_eq!(size_of::<FrameFlags>(), 1);
        let f = FrameFlags::new().with_reserved(true).with_head(true);
        assert_eq!(f.into_bits(), 0b101);
    }

    #[test]
    fn descriptors_start_clean() {
        let t = table(4, 0x0100_0000);
        assert_eq!(t.len(), 4);
        for (i, f) in t.iter().enumerate() {
            assert_eq!(f.address().as_u32(), 0x0100_0000 + (i as u32) * PAGE_SIZE);
            assert_eq!(f.ref_count(), 0);
            assert!(!f.is_reserved() && !f.is_allocated() && !f.is_head());
            assert_eq!(f.zone(), ZoneKind::Normal);
        }
    }

    #[test]
    fn lookup_is_bounds_checked() {
        let t = table(4, 0x0100_0000);
        assert_eq!(t.index_of(PhysicalAddress::new(0x0100_0000)), Ok(0));
        assert_eq!(t.index_of(PhysicalAddress::new(0x0100_3FFF)), Ok(3));
        let below = PhysicalAddress::new(0x00FF_F000);
        let above = PhysicalAddress::new(0x0100_4000);
        assert_eq!(t.index_of(below), Err(FrameError::OutOfRange(below)));
        assert_eq!(t.index_of(above), Err(FrameError::OutOfRange(above)));
        assert_eq!(
            t.frame_for(PhysicalAddress::new(0x0100_2010)).map(PageFrame::address),
            Ok(PhysicalAddress::new(0x0100_2000))
        );
    }

    #[test]
    fn reference_counting_needs_an_allocated_head() {
        let mut t = table(4, 0);
        let pa = PhysicalAddress::new(0x1000);
        assert_eq!(t.retain(pa), Err(FrameError::NotAllocated(pa)));

        t.get_mut(1).mark_allocated(0);
        assert_eq!(t.retain(pa), Ok(2));
        assert_eq!(t.release(pa), Ok(1));
        assert_eq!(t.release(pa), Ok(0));
        assert_eq!(t.release(pa), Err(FrameError::NotReferenced(pa)));
        // zero references leave the block allocated
        assert!(t.get(1).is_allocated());

        // interior addresses are not heads
        let inner = PhysicalAddress::new(0x1800);
        assert_eq!(t.retain(inner), Err(FrameError::NotAllocated(inner)));
    }

    #[test]
    fn reserve_range_clamps_and_rounds_outward() {
        let mut t = table(8, 0x1_0000);
        // starts below the table, ends mid-frame 2
        assert_eq!(t.reserve_range(PhysicalAddress::new(0x8000), 0x1_2001), 3);
        assert!(t.get(0).is_reserved() && t.get(2).is_reserved());
        assert!(!t.get(3).is_reserved());
        // already reserved frames are not counted twice
        assert_eq!(t.reserve_range(PhysicalAddress::new(0x1_1000), 0x1_4000), 1);
        // entirely outside
        assert_eq!(t.reserve_range(PhysicalAddress::new(0x2_0000), 0x3_0000), 0);
    }
}
