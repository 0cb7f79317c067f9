//! Free blocks of a single order within one zone.
//!
//! Two synchronized views of the same set:
//!
//! - an intrusive doubly linked list threaded through the head frames'
//!   `next`/`prev` indices, kept **sorted by address** so the lowest block is
//!   always at the front, and
//! - a [`Bitmap`] with one bit per order-sized block of the zone.
//!
//! A block's bit is clear exactly when the block is in the list.

use crate::bitmap::Bitmap;
use crate::frame::{FrameTable, NIL};

pub struct FreeArea<'m> {
    order: usize,
    /// Frame-table index of the zone's first frame.
    base: usize,
    head: u32,
    tail: u32,
    count: usize,
    map: Bitmap<'m>,
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn link(index: usize) -> u32 {
    index as u32
}

impl<'m> FreeArea<'m> {
    pub(crate) const fn new(order: usize, base: usize, map: Bitmap<'m>) -> Self {
        Self {
            order,
            base,
            head: NIL,
            tail: NIL,
            count: 0,
            map,
        }
    }

    #[inline]
    #[must_use]
    pub const fn order(&self) -> usize {
        self.order
    }

    /// Number of free blocks in the list.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    #[must_use]
    pub const fn bitmap(&self) -> &Bitmap<'m> {
        &self.map
    }

    /// Block number (within the zone, at this order) of the block headed by `frame`.
    #[inline]
    #[must_use]
    pub const fn block_of(&self, frame: usize) -> usize {
        (frame - self.base) >> self.order
    }

    /// Frame-table index of the head of `block`.
    #[inline]
    #[must_use]
    pub const fn frame_of(&self, block: usize) -> usize {
        self.base + (block << self.order)
    }

    /// Whether `block` is in the free list.
    #[inline]
    #[must_use]
    pub fn is_free(&self, block: usize) -> bool {
        !self.map.get(block)
    }

    /// Lowest free block, if any.
    #[must_use]
    pub const fn first(&self) -> Option<usize> {
        if self.head == NIL {
            None
        } else {
            Some(self.head as usize)
        }
    }

    /// Add the block headed by `frame`, keeping address order.
    pub(crate) fn insert(&mut self, frames: &mut FrameTable<'_>, frame: usize) {
        let block = self.block_of(frame);
        debug_assert!(!self.is_free(block), "block {block} already free");

        // Find the first listed block above `frame`. Ascending inserts (seeding)
        // land at the tail without a walk.
        let mut next = NIL;
        if self.tail != NIL && (self.tail as usize) > frame {
            next = self.head;
            while next != NIL && (next as usize) < frame {
                next = frames.get(next as usize).next;
            }
        }
        let prev = if next == NIL {
            self.tail
        } else {
            frames.get(next as usize).prev
        };

        let entry = frames.get_mut(frame);
        entry.next = next;
        entry.prev = prev;
        entry.flags.set_head(true);
        #[allow(clippy::cast_possible_truncation)]
        let order = self.order as u8;
        entry.order = order;

        if prev == NIL {
            self.head = link(frame);
        } else {
            frames.get_mut(prev as usize).next = link(frame);
        }
        if next == NIL {
            self.tail = link(frame);
        } else {
            frames.get_mut(next as usize).prev = link(frame);
        }

        self.map.clear(block);
        self.count += 1;
    }

    /// Unlink the block headed by `frame`, which must be in the list.
    pub(crate) fn remove(&mut self, frames: &mut FrameTable<'_>, frame: usize) {
        let block = self.block_of(frame);
        debug_assert!(self.is_free(block), "block {block} is not free");

        let entry = frames.get_mut(frame);
        let (prev, next) = (entry.prev, entry.next);
        entry.prev = NIL;
        entry.next = NIL;
        entry.flags.set_head(false);

        if prev == NIL {
            self.head = next;
        } else {
            frames.get_mut(prev as usize).next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            frames.get_mut(next as usize).prev = prev;
        }

        self.map.set(block);
        self.count -= 1;
    }

    /// Remove and return the lowest free block.
    pub(crate) fn pop_front(&mut self, frames: &mut FrameTable<'_>) -> Option<usize> {
        let frame = self.first()?;
        self.remove(frames, frame);
        Some(frame)
    }

    /// Walk the list front to back.
    pub fn iter<'a>(&'a self, frames: &'a FrameTable<'_>) -> Iter<'a> {
        Iter {
            frames,
            cursor: self.head,
        }
    }
}

/// Iterator over the head frame indices of a [`FreeArea`].
pub struct Iter<'a> {
    frames: &'a FrameTable<'a>,
    cursor: u32,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cursor == NIL {
            return None;
        }
        let current = self.cursor as usize;
        self.cursor = self.frames.get(current).next;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{leak_bitmap, leak_frames};

    #[test]
    fn list_and_bitmap_move_together() {
        let mut frames = leak_frames(16);
        let mut area = FreeArea::new(1, 0, leak_bitmap(8));

        area.insert(&mut frames, 4);
        area.insert(&mut frames, 0);
        area.insert(&mut frames, 10);
        area.insert(&mut frames, 6);

        assert_eq!(area.len(), 4);
        assert_eq!(area.iter(&frames).collect::<Vec<_>>(), vec![0, 4, 6, 10]);
        assert_eq!(area.bitmap().iter_zeros().collect::<Vec<_>>(), vec![0, 2, 3, 5]);
        assert!(frames.get(6).is_head());
        assert_eq!(frames.get(6).order(), 1);

        area.remove(&mut frames, 4);
        assert_eq!(area.iter(&frames).collect::<Vec<_>>(), vec![0, 6, 10]);
        assert!(!area.is_free(2));
        assert!(!frames.get(4).is_head());

        assert_eq!(area.pop_front(&mut frames), Some(0));
        assert_eq!(area.pop_front(&mut frames), Some(6));
        assert_eq!(area.pop_front(&mut frames), Some(10));
        assert_eq!(area.pop_front(&mut frames), None);
        assert!(area.is_empty());
        assert_eq!(area.bitmap().count_zeros(), 0);
    }

    #[test]
    fn removing_the_tail_keeps_appends_ordered() {
        let mut frames = leak_frames(8);
        let mut area = FreeArea::new(0, 0, leak_bitmap(8));
        for f in [1, 3, 5] {
            area.insert(&mut frames, f);
        }
        area.remove(&mut frames, 5);
        area.insert(&mut frames, 2);
        area.insert(&mut frames, 7);
        assert_eq!(area.iter(&frames).collect::<Vec<_>>(), vec![1, 2, 3, 7]);
    }

    #[test]
    fn block_numbers_are_relative_to_the_zone() {
        let area = FreeArea::new(3, 512, leak_bitmap(64));
        assert_eq!(area.block_of(512), 0);
        assert_eq!(area.block_of(512 + 24), 3);
        assert_eq!(area.frame_of(3), 536);
    }
}
