//! A set of disjoint address ranges kept sorted by start address.

use core::{cmp::max, ops::Range};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SortedRangeSet {
    inner: Vec<Range<u64>>,
}

impl SortedRangeSet {
    pub const fn new() -> SortedRangeSet {
        SortedRangeSet { inner: Vec::new() }
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Range<u64>> {
        self.inner.iter()
    }

    /// Sum of the lengths of all ranges in the set.
    pub fn total_len(&self) -> u64 {
        self.inner.iter().map(|r| r.end - r.start).sum()
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.inner.iter().any(|r| r.contains(&addr))
    }

    /// Merge touching or overlapping neighbours and drop empty entries.
    fn combine(&mut self) {
        let mut merged: Vec<Range<u64>> = Vec::with_capacity(self.inner.len());
        for current in self.inner.drain(..) {
            if current.is_empty() {
                continue;
            }
            match merged.last_mut() {
                Some(last) if last.end >= current.start => {
                    last.end = max(last.end, current.end);
                }
                _ => merged.push(current),
            }
        }
        self.inner = merged;
    }

    pub fn add(&mut self, range: Range<u64>) {
        let idx = self.inner.partition_point(|r| r.start <= range.start);
        self.inner.insert(idx, range);
        self.combine();
    }
}
