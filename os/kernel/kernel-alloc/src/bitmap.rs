//! Packed bit-per-unit occupancy map over borrowed storage.
//!
//! Bit `i` **set** means unit `i` is occupied; **clear** means it is free.
//! The storage is carved by the bootstrap allocator, so the bitmap never owns
//! or resizes its bytes.

use core::mem::MaybeUninit;

pub struct Bitmap<'m> {
    bytes: &'m mut [u8],
    len: usize,
}

impl<'m> Bitmap<'m> {
    /// Bytes of storage needed for `len` bits.
    #[inline]
    #[must_use]
    pub const fn bytes_for(len: usize) -> usize {
        len.div_ceil(8)
    }

    /// Take ownership of `storage` and mark all `len` bits as occupied.
    ///
    /// # Panics
    /// If `storage` is shorter than [`Bitmap::bytes_for(len)`](Self::bytes_for).
    pub fn init(storage: &'m mut [MaybeUninit<u8>], len: usize) -> Self {
        let storage = &mut storage[..Self::bytes_for(len)];
        for byte in storage.iter_mut() {
            byte.write(0xFF);
        }
        // SAFETY: Every byte was written above.
        let bytes = unsafe {
            core::slice::from_raw_parts_mut(storage.as_mut_ptr().cast::<u8>(), storage.len())
        };
        Self { bytes, len }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        self.bytes[index / 8] & (1 << (index % 8)) != 0
    }

    #[inline]
    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.len);
        self.bytes[index / 8] |= 1 << (index % 8);
    }

    #[inline]
    pub fn clear(&mut self, index: usize) {
        debug_assert!(index < self.len);
        self.bytes[index / 8] &= !(1 << (index % 8));
    }

    /// Number of set bits among the first `len`.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        let full = self.len / 8;
        let mut n: usize = self.bytes[..full]
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum();
        let rem = self.len % 8;
        if rem != 0 {
            let mask = (1u8 << rem) - 1;
            n += (self.bytes[full] & mask).count_ones() as usize;
        }
        n
    }

    /// Number of clear bits among the first `len`.
    #[must_use]
    pub fn count_zeros(&self) -> usize {
        self.len - self.count_ones()
    }

    /// Indices of all clear bits, ascending.
    pub fn iter_zeros(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|&i| !self.get(i))
    }
}
