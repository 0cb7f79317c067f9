//! # Zones
//!
//! The managed range is tiled by at most two contiguous zones:
//!
//! ```text
//! start                    16 MiB                              end
//!   ├──────── DMA ───────────┼──────────── Normal ───────────────┤
//! ```
//!
//! Each zone is a whole number of top-order blocks (512 frames) and owns one
//! [`FreeArea`] per order. Buddy arithmetic is relative to the zone start, so
//! a block of order `o` starts at a multiple of `2^o` frames from it.

use crate::bitmap::Bitmap;
use crate::buddy::InitError;
use crate::frame::FrameTable;
use crate::free_area::FreeArea;
use core::fmt;
use core::mem::MaybeUninit;
use kernel_info::memory::{DMA_ZONE_LIMIT, MAX_ORDER, MAX_ORDER_PAGES, PAGE_SHIFT, PAGE_SIZE};
use kernel_memory_addresses::PhysicalAddress;
use log::{info, trace, warn};

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ZoneKind {
    /// Below [`DMA_ZONE_LIMIT`], reachable by legacy ISA DMA.
    Dma = 0,
    Normal = 1,
}

impl ZoneKind {
    pub const COUNT: usize = 2;
    pub const ALL: [Self; Self::COUNT] = [Self::Dma, Self::Normal];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dma => "DMA",
            Self::Normal => "Normal",
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where one zone lives.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ZoneSpan {
    kind: ZoneKind,
    start: PhysicalAddress,
    first_frame: usize,
    frame_count: usize,
}

impl ZoneSpan {
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ZoneKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        self.start
    }

    /// Frame-table index of the first frame.
    #[inline]
    #[must_use]
    pub const fn first_frame(&self) -> usize {
        self.first_frame
    }

    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Exclusive end address.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start.as_u64() + ((self.frame_count as u64) << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn contains_frame(&self, index: usize) -> bool {
        index >= self.first_frame && index - self.first_frame < self.frame_count
    }
}

/// How a physical range is cut into zones.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ZoneLayout {
    start: PhysicalAddress,
    frame_count: usize,
    truncated_bytes: u64,
    spans: [Option<ZoneSpan>; ZoneKind::COUNT],
}

impl ZoneLayout {
    /// Plan the zones for `[start, limit)`.
    ///
    /// `start` is aligned up to a page and the range is truncated down to a
    /// whole number of top-order blocks. Everything cut off is reported by
    /// [`Self::truncated_bytes`]. A range straddling [`DMA_ZONE_LIMIT`] gets a
    /// DMA zone rounded down to whole top-order blocks and a Normal zone
    /// holding the rest.
    ///
    /// # Errors
    /// [`InitError::RegionTooSmall`] if not even one top-order block fits.
    pub fn plan(start: PhysicalAddress, limit: PhysicalAddress) -> Result<Self, InitError> {
        let too_small = InitError::RegionTooSmall { start, limit };
        let aligned = start
            .checked_align_up(PAGE_SIZE)
            .filter(|a| *a < limit)
            .ok_or(too_small)?;

        let available = ((limit.as_u32() - aligned.as_u32()) >> PAGE_SHIFT) as usize;
        let frame_count = available / MAX_ORDER_PAGES * MAX_ORDER_PAGES;
        if frame_count == 0 {
            return Err(too_small);
        }

        let managed = (frame_count as u64) << PAGE_SHIFT;
        let truncated_bytes = u64::from(limit.as_u32() - start.as_u32()) - managed;
        if truncated_bytes != 0 {
            warn!(
                "pmm: {truncated_bytes} bytes of [{start}, {limit}) are not a whole {MAX_ORDER_PAGES}-frame block and stay unmanaged"
            );
        }

        let end = aligned.as_u64() + managed;
        let dma_frames = if aligned.as_u32() >= DMA_ZONE_LIMIT {
            0
        } else if end <= u64::from(DMA_ZONE_LIMIT) {
            frame_count
        } else {
            let below = ((DMA_ZONE_LIMIT - aligned.as_u32()) >> PAGE_SHIFT) as usize;
            below / MAX_ORDER_PAGES * MAX_ORDER_PAGES
        };

        let mut spans = [None; ZoneKind::COUNT];
        if dma_frames > 0 {
            spans[ZoneKind::Dma.index()] = Some(ZoneSpan {
                kind: ZoneKind::Dma,
                start: aligned,
                first_frame: 0,
                frame_count: dma_frames,
            });
        }
        if dma_frames < frame_count {
            #[allow(clippy::cast_possible_truncation)]
            let offset = (dma_frames as u32) << PAGE_SHIFT;
            spans[ZoneKind::Normal.index()] = Some(ZoneSpan {
                kind: ZoneKind::Normal,
                start: aligned + offset,
                first_frame: dma_frames,
                frame_count: frame_count - dma_frames,
            });
        }

        Ok(Self {
            start: aligned,
            frame_count,
            truncated_bytes,
            spans,
        })
    }

    /// First managed address (page aligned).
    #[inline]
    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        self.start
    }

    /// Exclusive end of the managed range.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start.as_u64() + ((self.frame_count as u64) << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Bytes of the requested range left unmanaged by alignment and truncation.
    #[inline]
    #[must_use]
    pub const fn truncated_bytes(&self) -> u64 {
        self.truncated_bytes
    }

    #[must_use]
    pub const fn span(&self, kind: ZoneKind) -> Option<&ZoneSpan> {
        self.spans[kind.index()].as_ref()
    }

    /// Zones in address order.
    pub fn spans(&self) -> impl Iterator<Item = &ZoneSpan> + '_ {
        self.spans.iter().flatten()
    }

    /// Zone owning frame-table index `index`.
    #[must_use]
    pub const fn kind_of_frame(&self, index: usize) -> ZoneKind {
        match &self.spans[ZoneKind::Dma.index()] {
            Some(dma) if index < dma.frame_count => ZoneKind::Dma,
            _ => ZoneKind::Normal,
        }
    }
}

/// A snapshot of one zone's accounting.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ZoneStats {
    pub kind: ZoneKind,
    pub start: PhysicalAddress,
    pub total_frames: usize,
    pub free_frames: usize,
    pub allocated_frames: usize,
    pub reserved_frames: usize,
    /// Free blocks per order.
    pub free_blocks: [usize; MAX_ORDER],
}

impl ZoneStats {
    #[must_use]
    pub const fn free_bytes(&self) -> u64 {
        (self.free_frames as u64) << PAGE_SHIFT
    }

    /// Allocated plus reserved bytes.
    #[must_use]
    pub const fn used_bytes(&self) -> u64 {
        ((self.allocated_frames + self.reserved_frames) as u64) << PAGE_SHIFT
    }
}

/// A broken allocator invariant, found by [`Zone::verify`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ConsistencyError {
    #[error("{zone} order {order}: {listed} blocks listed, {counted} counted, {marked} marked free")]
    ListBitmapMismatch {
        zone: ZoneKind,
        order: usize,
        listed: usize,
        counted: usize,
        marked: usize,
    },
    #[error("{zone} order {order}: free list not strictly ascending at {address}")]
    UnorderedList {
        zone: ZoneKind,
        order: usize,
        address: PhysicalAddress,
    },
    #[error("{zone} order {order}: listed block {address} is not a well-formed free block")]
    MalformedBlock {
        zone: ZoneKind,
        order: usize,
        address: PhysicalAddress,
    },
    #[error("{zone}: frame {address} is covered {coverage} times")]
    Coverage {
        zone: ZoneKind,
        address: PhysicalAddress,
        coverage: usize,
    },
    #[error("{zone}: {what} counter says {counted} frames, descriptors say {derived}")]
    Accounting {
        zone: ZoneKind,
        what: &'static str,
        counted: usize,
        derived: usize,
    },
}

pub struct Zone<'m> {
    span: ZoneSpan,
    areas: [FreeArea<'m>; MAX_ORDER],
    allocated_frames: usize,
    reserved_frames: usize,
}

impl<'m> Zone<'m> {
    /// Bitmap storage needed by all free areas of a zone of `frame_count` frames.
    #[must_use]
    pub fn bitmap_bytes(frame_count: usize) -> usize {
        (0..MAX_ORDER)
            .map(|order| Bitmap::bytes_for(frame_count >> order))
            .sum()
    }

    /// Build an empty zone; every bitmap bit starts set.
    ///
    /// # Panics
    /// If `storage` is shorter than [`Self::bitmap_bytes`].
    pub fn new(span: ZoneSpan, storage: &'m mut [MaybeUninit<u8>]) -> Self {
        let mut rest = storage;
        let areas = core::array::from_fn(|order| {
            let bits = span.frame_count >> order;
            let (bytes, tail) = core::mem::take(&mut rest).split_at_mut(Bitmap::bytes_for(bits));
            rest = tail;
            FreeArea::new(order, span.first_frame, Bitmap::init(bytes, bits))
        });
        Self {
            span,
            areas,
            allocated_frames: 0,
            reserved_frames: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ZoneKind {
        self.span.kind
    }

    #[inline]
    #[must_use]
    pub const fn span(&self) -> &ZoneSpan {
        &self.span
    }

    #[inline]
    #[must_use]
    pub const fn area(&self, order: usize) -> &FreeArea<'m> {
        &self.areas[order]
    }

    /// Populate the free lists from every non-reserved frame, greedily using
    /// the largest aligned block free of reserved frames.
    pub(crate) fn seed(&mut self, frames: &mut FrameTable<'_>) {
        let first = self.span.first_frame;
        let count = self.span.frame_count;
        let reserved = |frames: &FrameTable<'_>, from: usize, len: usize| {
            (first + from..first + from + len).any(|i| frames.get(i).is_reserved())
        };

        self.reserved_frames = (first..first + count)
            .filter(|&i| frames.get(i).is_reserved())
            .count();

        let mut offset = 0;
        while offset < count {
            if frames.get(first + offset).is_reserved() {
                offset += 1;
                continue;
            }
            let order = (0..MAX_ORDER)
                .rev()
                .find(|&order| {
                    let size = 1 << order;
                    offset.is_multiple_of(size)
                        && offset + size <= count
                        && !reserved(frames, offset, size)
                })
                .unwrap_or(0);
            self.areas[order].insert(frames, first + offset);
            offset += 1 << order;
        }

        trace!(
            "{} zone seeded: {} top-order blocks, {} reserved frames",
            self.span.kind,
            self.areas[MAX_ORDER - 1].len(),
            self.reserved_frames
        );
    }

    /// Take the lowest block of the smallest sufficient order and split it
    /// down to `order`. Returns the head frame index.
    pub(crate) fn alloc(&mut self, frames: &mut FrameTable<'_>, order: usize) -> Option<usize> {
        let (found, frame) = (order..MAX_ORDER)
            .find_map(|k| self.areas[k].pop_front(frames).map(|frame| (k, frame)))?;

        let mut k = found;
        while k > order {
            k -= 1;
            self.areas[k].insert(frames, frame + (1 << k));
            trace!(
                "{}: split order-{} block at frame {frame}",
                self.span.kind,
                k + 1
            );
        }

        frames.get_mut(frame).mark_allocated(order);
        self.allocated_frames += 1 << order;
        Some(frame)
    }

    /// Return the allocated block of `order` headed by `frame` and merge it
    /// with free buddies. Returns the head and order of the resulting free block.
    ///
    /// The caller has validated `frame` and `order`.
    pub(crate) fn free(
        &mut self,
        frames: &mut FrameTable<'_>,
        frame: usize,
        order: usize,
    ) -> (usize, usize) {
        frames.get_mut(frame).mark_released();
        self.allocated_frames -= 1 << order;

        let (mut frame, mut order) = (frame, order);
        while order < MAX_ORDER - 1 {
            let area = &mut self.areas[order];
            let buddy_block = area.block_of(frame) ^ 1;
            if !area.is_free(buddy_block) {
                break;
            }
            let buddy = area.frame_of(buddy_block);
            area.remove(frames, buddy);
            trace!(
                "{}: merge order-{order} buddies at frames {frame} and {buddy}",
                self.span.kind
            );
            frame = frame.min(buddy);
            order += 1;
        }

        self.areas[order].insert(frames, frame);
        (frame, order)
    }

    #[must_use]
    pub fn stats(&self) -> ZoneStats {
        let free_blocks = core::array::from_fn(|order| self.areas[order].len());
        let free_frames = self
            .areas
            .iter()
            .map(|area| area.len() << area.order())
            .sum();
        ZoneStats {
            kind: self.span.kind,
            start: self.span.start,
            total_frames: self.span.frame_count,
            free_frames,
            allocated_frames: self.allocated_frames,
            reserved_frames: self.reserved_frames,
            free_blocks,
        }
    }

    pub fn log_state(&self) {
        let s = self.stats();
        info!(
            "{} zone {}..0x{:08X}: {}/{} frames free, {} allocated, {} reserved, free blocks per order {:?}",
            s.kind,
            s.start,
            self.span.end(),
            s.free_frames,
            s.total_frames,
            s.allocated_frames,
            s.reserved_frames,
            s.free_blocks
        );
    }

    /// Check every invariant the zone maintains against the frame table.
    ///
    /// Runs in `O(frames * MAX_ORDER)` without scratch memory.
    ///
    /// # Errors
    /// The first violated invariant.
    pub fn verify(&self, frames: &FrameTable<'_>) -> Result<(), ConsistencyError> {
        let zone = self.span.kind;
        let first = self.span.first_frame;

        for area in &self.areas {
            let order = area.order();
            let marked = area.bitmap().count_zeros();
            let mismatch = |listed| ConsistencyError::ListBitmapMismatch {
                zone,
                order,
                listed,
                counted: area.len(),
                marked,
            };

            let mut listed = 0;
            let mut last = None;
            for frame in area.iter(frames) {
                listed += 1;
                if listed > area.bitmap().len() {
                    // cycle
                    return Err(mismatch(listed));
                }
                let f = frames.get(frame);
                let address = f.address();
                if last.is_some_and(|last| last >= frame) {
                    return Err(ConsistencyError::UnorderedList {
                        zone,
                        order,
                        address,
                    });
                }
                last = Some(frame);

                let well_formed = self.span.contains_frame(frame)
                    && (frame - first).is_multiple_of(1 << order)
                    && area.is_free(area.block_of(frame))
                    && f.is_head()
                    && !f.is_allocated()
                    && !f.is_reserved()
                    && f.order() == order;
                if !well_formed {
                    return Err(ConsistencyError::MalformedBlock {
                        zone,
                        order,
                        address,
                    });
                }
            }
            if listed != area.len() || listed != marked {
                return Err(mismatch(listed));
            }
        }

        let mut allocated = 0;
        let mut reserved = 0;
        for offset in 0..self.span.frame_count {
            let f = frames.get(first + offset);
            let mut coverage = usize::from(f.is_reserved());
            reserved += usize::from(f.is_reserved());
            for area in &self.areas {
                let order = area.order();
                let block = offset >> order;
                if area.is_free(block) {
                    coverage += 1;
                }
                let head = frames.get(first + (block << order));
                if head.is_allocated() && head.order() == order {
                    coverage += 1;
                    allocated += 1;
                }
            }
            if coverage != 1 {
                return Err(ConsistencyError::Coverage {
                    zone,
                    address: f.address(),
                    coverage,
                });
            }
        }

        for (what, counted, derived) in [
            ("allocated", self.allocated_frames, allocated),
            ("reserved", self.reserved_frames, reserved),
        ] {
            if counted != derived {
                return Err(ConsistencyError::Accounting {
                    zone,
                    what,
                    counted,
                    derived,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u32 = 1024 * 1024;

    fn pa(v: u32) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    #[test]
    fn plan_rejects_ranges_without_a_whole_block() {
        let err = ZoneLayout::plan(pa(0x0010_0000), pa(0x0020_0000)).unwrap_err();
        assert_eq!(
            err,
            InitError::RegionTooSmall {
                start: pa(0x0010_0000),
                limit: pa(0x0020_0000)
            }
        );
        assert!(ZoneLayout::plan(pa(0x3000), pa(0x2000)).is_err());
        assert!(ZoneLayout::plan(pa(0xFFFF_F001), pa(0xFFFF_F800)).is_err());
    }

    #[test]
    fn plan_truncates_and_reports() {
        // 1 page of misalignment, then 2 MiB + 3 pages
        let layout = ZoneLayout::plan(pa(0x0100_0800), pa(0x0120_4000)).unwrap();
        assert_eq!(layout.start(), pa(0x0100_1000));
        assert_eq!(layout.frame_count(), 512);
        assert_eq!(layout.end(), 0x0120_1000);
        assert_eq!(layout.truncated_bytes(), 0x0120_4000 - 0x0100_0800 - 2 * u64::from(MIB));
    }

    #[test]
    fn plan_below_dma_limit_is_one_dma_zone() {
        let layout = ZoneLayout::plan(pa(0), pa(8 * MIB)).unwrap();
        let spans: Vec<_> = layout.spans().copied().collect();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind(), ZoneKind::Dma);
        assert_eq!(spans[0].frame_count(), 2048);
        assert!(layout.span(ZoneKind::Normal).is_none());
        assert_eq!(layout.kind_of_frame(2047), ZoneKind::Dma);
    }

    #[test]
    fn plan_above_dma_limit_is_one_normal_zone() {
        let layout = ZoneLayout::plan(pa(16 * MIB), pa(20 * MIB)).unwrap();
        assert!(layout.span(ZoneKind::Dma).is_none());
        let normal = layout.span(ZoneKind::Normal).unwrap();
        assert_eq!(normal.start(), pa(16 * MIB));
        assert_eq!(normal.first_frame(), 0);
        assert_eq!(layout.kind_of_frame(0), ZoneKind::Normal);
    }

    #[test]
    fn plan_splits_a_straddling_range() {
        // DMA part below 16 MiB is 15 MiB - 4 KiB, rounds down to 14 MiB
        let layout = ZoneLayout::plan(pa(MIB + 0x1000), pa(32 * MIB)).unwrap();
        let dma = *layout.span(ZoneKind::Dma).unwrap();
        let normal = *layout.span(ZoneKind::Normal).unwrap();

        assert_eq!(dma.start(), pa(MIB + 0x1000));
        assert_eq!(dma.frame_count(), 7 * 512);
        assert_eq!(normal.first_frame(), 7 * 512);
        assert_eq!(normal.start().as_u64(), dma.end());
        assert_eq!(dma.frame_count() + normal.frame_count(), layout.frame_count());
        assert_eq!(normal.frame_count() % MAX_ORDER_PAGES, 0);
        assert_eq!(layout.kind_of_frame(7 * 512 - 1), ZoneKind::Dma);
        assert_eq!(layout.kind_of_frame(7 * 512), ZoneKind::Normal);
    }

    #[test]
    fn bitmap_storage_covers_every_order() {
        // 512 + 256 + ... + 1 bits
        assert_eq!(Zone::bitmap_bytes(512), 64 + 32 + 16 + 8 + 4 + 2 + 1 + 1 + 1 + 1);
    }
}
