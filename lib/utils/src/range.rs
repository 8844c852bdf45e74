//! Extensions for `Range<u64>` arithmetic on address spaces.
//!
//! Address ranges are half-open, `[start, end)`. Constructors refuse to wrap around the top of
//! the address space instead of producing an inverted range.

use core::ops::Range;

/// Build `[start, start + len)`, or `None` if it would wrap.
#[inline(always)]
pub fn span(start: u64, len: u64) -> Option<Range<u64>> {
    Some(start..start.checked_add(len)?)
}

pub trait RangeExt: Sized {
    /// Check if this range overlaps with another range.
    ///
    /// Always return false if either range is empty.
    fn overlap(&self, another: &Self) -> bool;
    /// Check if `another` lies entirely inside this range. An empty range is inside any range
    /// that contains its start.
    fn covers(&self, another: &Self) -> bool;
}

impl RangeExt for Range<u64> {
    #[inline(always)]
    fn overlap(&self, another: &Range<u64>) -> bool {
        if self.is_empty() || another.is_empty() {
            return false;
        }
        self.start < another.end && another.start < self.end
    }

    #[inline(always)]
    fn covers(&self, another: &Range<u64>) -> bool {
        self.start <= another.start && another.end <= self.end
    }
}

/// Round `value` up to a multiple of `align`. `align` must be a power of two; zero and one mean
/// no alignment.
#[inline(always)]
pub fn align_up(value: u64, align: u64) -> Option<u64> {
    if align <= 1 {
        return Some(value);
    }
    Some(value.checked_add(align - 1)? & !(align - 1))
}
