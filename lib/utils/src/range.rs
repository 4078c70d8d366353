//! Overlap test for half-open ranges.

use core::ops::Range;

pub trait RangeExt {
    /// Whether the two ranges share at least one element; empty ranges overlap nothing.
    fn overlap(&self, another: &Self) -> bool;
}

impl<T: Ord> RangeExt for Range<T> {
    #[inline(always)]
    fn overlap(&self, another: &Range<T>) -> bool {
        if self.is_empty() || another.is_empty() {
            return false;
        }
        self.end > another.start && self.start < another.end
    }
}

#[cfg(test)]
mod tests {
    use super::RangeExt;

    #[test]
    fn touching_ranges_do_not_overlap() {
        assert!(!(0u64..0x1000).overlap(&(0x1000..0x2000)));
        assert!((0u64..0x1001).overlap(&(0x1000..0x2000)));
        assert!((0x1800u64..0x1900).overlap(&(0x1000..0x2000)));
        assert!(!(0u64..0).overlap(&(0..0x2000)));
    }
}
