// Fixed-width reader bitmap, one bit per possible reader.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of reader bits in every bitmap; also the hard cap on readers per channel.
pub const BITMAP_WIDTH: u32 = u64::BITS;

/// Single-bit mask for `bit`.
#[inline]
pub const fn bit_mask(bit: u32) -> u64 {
    1u64 << bit
}

/// Lowest zero bit of `bits` below `limit`, if any.
#[inline]
pub fn find_first_zero(bits: u64, limit: u32) -> Option<u32> {
    let pos = (!bits).trailing_zeros();
    (pos < limit.min(BITMAP_WIDTH)).then_some(pos)
}

/// Lock-free bitmap living in shared memory.
///
/// `#[repr(transparent)]` over `AtomicU64` so it can be embedded in the
/// `#[repr(C)]` ring layout.
#[repr(transparent)]
#[derive(Default)]
pub struct AtomicBitmap(AtomicU64);

impl AtomicBitmap {
    pub const fn new(bits: u64) -> Self {
        Self(AtomicU64::new(bits))
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> u64 {
        self.0.load(order)
    }

    #[inline]
    pub fn store(&self, bits: u64, order: Ordering) {
        self.0.store(bits, order)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.load(Ordering::Acquire) == 0
    }

    #[inline]
    pub fn test(&self, bit: u32) -> bool {
        self.0.load(Ordering::Acquire) & bit_mask(bit) != 0
    }

    /// Sets `bit`, returning whether it was already set.
    #[inline]
    pub fn set(&self, bit: u32) -> bool {
        self.0.fetch_or(bit_mask(bit), Ordering::AcqRel) & bit_mask(bit) != 0
    }

    /// Clears `bit`, returning the bits that remain set afterwards.
    #[inline]
    pub fn clear(&self, bit: u32) -> u64 {
        self.clear_mask(bit_mask(bit))
    }

    /// Clears every bit of `mask`, returning the bits that remain set afterwards.
    #[inline]
    pub fn clear_mask(&self, mask: u64) -> u64 {
        self.0.fetch_and(!mask, Ordering::AcqRel) & !mask
    }

    /// Lowest zero bit below `limit`.
    #[inline]
    pub fn find_first_zero(&self, limit: u32) -> Option<u32> {
        find_first_zero(self.0.load(Ordering::Acquire), limit)
    }
}

impl fmt::Debug for AtomicBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_test_clear() {
        let b = AtomicBitmap::new(0);
        assert!(b.is_empty());
        assert!(!b.set(3));
        assert!(b.set(3));
        assert!(b.test(3));
        assert!(!b.test(2));
        b.set(63);
        assert_eq!(b.clear(3), bit_mask(63));
        assert_eq!(b.clear(63), 0);
        assert!(b.is_empty());
    }

    #[test]
    fn clear_mask_reports_remaining() {
        let b = AtomicBitmap::new(0b1111);
        assert_eq!(b.clear_mask(0b0101), 0b1010);
        assert_eq!(b.load(Ordering::Relaxed), 0b1010);
    }

    #[test]
    fn first_zero_respects_limit() {
        assert_eq!(find_first_zero(0, 64), Some(0));
        assert_eq!(find_first_zero(0b0111, 64), Some(3));
        assert_eq!(find_first_zero(0b0111, 3), None);
        assert_eq!(find_first_zero(u64::MAX, 64), None);
        assert_eq!(find_first_zero(u64::MAX >> 1, 64), Some(63));
        assert_eq!(find_first_zero(0, 200), Some(0));
    }
}
