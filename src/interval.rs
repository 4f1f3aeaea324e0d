//! Tracking of byte ranges that have not been fetched yet.
//!
//! The tracker starts with a single range covering the whole resource and only
//! ever shrinks. Ranges are half-open, sorted by start, disjoint and never
//! touch each other, which lets every lookup be a pair of binary searches.

use std::ops::Range;

/// Sorted set of disjoint "still missing" byte ranges over `[0, size)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalTracker {
    missing: Vec<Range<u64>>,
}

impl IntervalTracker {
    /// Create a tracker in which nothing of `[0, size)` has been fetched.
    pub fn new(size: u64) -> Self {
        let missing = if size == 0 { Vec::new() } else { vec![0..size] };
        Self { missing }
    }

    /// Index span `[first, last)` of the tracked ranges intersecting `range`.
    ///
    /// An empty span (`first == last`) means every byte of `range` is fetched.
    pub fn overlapping(&self, range: Range<u64>) -> (usize, usize) {
        if range.start >= range.end {
            return (0, 0);
        }
        let first = self.missing.partition_point(|r| r.end <= range.start);
        let last = self.missing.partition_point(|r| r.start < range.end);
        (first, last.max(first))
    }

    /// First missing range that intersects `needed`, clipped to `window`.
    ///
    /// `window` is expected to contain `needed`. Gaps inside the window that
    /// lie entirely before `needed` are skipped.
    pub fn first_gap(&self, needed: Range<u64>, window: Range<u64>) -> Option<Range<u64>> {
        let (first, last) = self.overlapping(needed);
        if first == last {
            return None;
        }
        let gap = &self.missing[first];
        Some(gap.start.max(window.start)..gap.end.min(window.end))
    }

    /// Record that `range` is now valid in the buffer.
    ///
    /// Tracked ranges fully covered by `range` are erased. The first overlapping
    /// range keeps its part before `range.start` and the last one keeps its part
    /// after `range.end`; when both are the same range it is split in two.
    /// Marking bytes that are already fetched is a no-op.
    pub fn mark_fetched(&mut self, range: Range<u64>) {
        let (first, last) = self.overlapping(range.clone());
        if first == last {
            return;
        }

        let head = self.missing[first].start..range.start;
        let tail = range.end..self.missing[last - 1].end;

        let mut remainder = Vec::with_capacity(2);
        if head.start < head.end {
            remainder.push(head);
        }
        if tail.start < tail.end {
            remainder.push(tail);
        }
        self.missing.splice(first..last, remainder);
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
    }

    /// Ranges still missing, in ascending order.
    pub fn ranges(&self) -> &[Range<u64>] {
        &self.missing
    }

    /// Total number of bytes still missing.
    pub fn missing_len(&self) -> u64 {
        self.missing.iter().map(|r| r.end - r.start).sum()
    }
}
