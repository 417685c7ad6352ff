//! Ordered set of closed, non-overlapping, non-adjacent `Position` ranges.
//!
//! Grounded on the donor's `datastore::meta::key_ranges::KeyRanges<T>`: both
//! are a `BTreeMap` keyed by the range's low endpoint, both coalesce
//! overlapping/touching ranges on insert by collecting the ranges to delete
//! and the ranges to add into scratch vectors and applying them after the
//! scan. The donor's version carries a `T` payload per range and merges data
//! with `T::clone()`; this version has no payload (a `RangeSet` is just a
//! set of positions), but the coalescing structure is the same. The one new
//! wrinkle is that "adjacent" depends on the segment map: `Position(3, 9)`
//! and `Position(5, 0)` are adjacent if segment 3 ends at entry 9 and
//! segment 5 is its successor, which is why every mutating method here takes
//! a `&dyn SegmentLookup`.

use std::collections::BTreeMap;

use mlog_position::{Position, SegmentLookup};

/// A closed, non-overlapping, non-adjacent set of `Position` ranges.
#[derive(Default, Debug, Clone)]
pub struct RangeSet {
    /// low -> high, both inclusive.
    ranges: BTreeMap<Position, Position>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn num_ranges(&self) -> usize {
        self.ranges.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Position, Position)> + '_ {
        self.ranges.iter().map(|(&lo, &hi)| (lo, hi))
    }

    pub fn contains(&self, p: Position) -> bool {
        self.ranges
            .range(..=p)
            .next_back()
            .map(|(_, &hi)| p <= hi)
            .unwrap_or(false)
    }

    pub fn insert_point(&mut self, p: Position, lookup: &dyn SegmentLookup) {
        self.insert_range(p, p, lookup);
    }

    /// Inserts the closed range `[lo, hi]`, merging with any existing range
    /// that overlaps or directly touches it (`existing.high` adjacent to
    /// `lo`, or `existing.low` adjacent to `hi`, per `lookup`).
    ///
    /// Repeatedly folds in one mergeable range at a time rather than a
    /// single scan, since expanding `new_hi` to absorb a range can bring a
    /// previously out-of-reach range within merging distance.
    pub fn insert_range(&mut self, lo: Position, hi: Position, lookup: &dyn SegmentLookup) {
        assert!(lo <= hi, "insert_range requires lo <= hi");

        let mut new_lo = lo;
        let mut new_hi = hi;

        loop {
            let mergeable = self.ranges.iter().find_map(|(&a, &b)| {
                let overlaps = a <= new_hi && new_lo <= b;
                let adjacent_before = b.next(lookup) == new_lo;
                let adjacent_after = new_hi.next(lookup) == a;
                if overlaps || adjacent_before || adjacent_after {
                    Some((a, b))
                } else {
                    None
                }
            });

            match mergeable {
                Some((a, b)) => {
                    self.ranges.remove(&a);
                    if a < new_lo {
                        new_lo = a;
                    }
                    if b > new_hi {
                        new_hi = b;
                    }
                }
                None => break,
            }
        }

        self.ranges.insert(new_lo, new_hi);
    }

    /// Removes and returns the range whose low endpoint is exactly
    /// `next(p)`, if one exists. Used to absorb an `individuallyDeleted`
    /// prefix into `markDelete`: callers loop, advancing `p` to the
    /// returned range's high endpoint, until this returns `None`.
    pub fn pop_contiguous_prefix_from(
        &mut self,
        p: Position,
        lookup: &dyn SegmentLookup,
    ) -> Option<(Position, Position)> {
        let target = p.next(lookup);
        let hi = self.ranges.remove(&target)?;
        Some((target, hi))
    }

    /// Total number of positions covered by this set.
    pub fn span_count(&self, lookup: &dyn SegmentLookup) -> u64 {
        self.ranges
            .iter()
            .map(|(&lo, &hi)| count_positions(lo, hi, lookup))
            .sum()
    }

    /// Number of positions this set covers that also fall within the closed
    /// range `[lo, hi]`. Used by backlog/count formulas that need "how many
    /// individually-deleted positions lie within the unread window".
    pub fn count_in_range(&self, lo: Position, hi: Position, lookup: &dyn SegmentLookup) -> u64 {
        if lo > hi {
            return 0;
        }
        self.ranges
            .iter()
            .map(|(&a, &b)| {
                let clipped_lo = a.max(lo);
                let clipped_hi = b.min(hi);
                if clipped_lo <= clipped_hi {
                    count_positions(clipped_lo, clipped_hi, lookup)
                } else {
                    0
                }
            })
            .sum()
    }
}

/// Number of positions in the closed range `[lo, hi]`, accounting for
/// entries being discontiguous across segment boundaries: walks the segment
/// chain from `lo.segment_id` to `hi.segment_id` via `SegmentLookup::
/// successor`, summing the entries each touched segment contributes.
pub fn count_positions(lo: Position, hi: Position, lookup: &dyn SegmentLookup) -> u64 {
    if lo > hi {
        return 0;
    }

    let mut total: u64 = 0;
    let mut segment = lo.segment_id;

    loop {
        let low_entry = if segment == lo.segment_id { lo.entry_id } else { 0 };
        let high_entry = if segment == hi.segment_id {
            hi.entry_id
        } else {
            match lookup.last_confirmed_entry(segment) {
                Some(last) => last,
                None => break,
            }
        };

        if high_entry >= low_entry {
            total += (high_entry - low_entry + 1) as u64;
        }

        if segment == hi.segment_id {
            break;
        }

        match lookup.successor(segment) {
            Some(next) => segment = next,
            None => break,
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeLookup {
        segments: Vec<(u64, i64)>,
    }

    impl SegmentLookup for FakeLookup {
        fn last_confirmed_entry(&self, segment_id: u64) -> Option<i64> {
            self.segments
                .iter()
                .find(|(id, _)| *id == segment_id)
                .map(|(_, last)| *last)
        }

        fn successor(&self, segment_id: u64) -> Option<u64> {
            self.segments
                .iter()
                .map(|(id, _)| *id)
                .filter(|id| *id > segment_id)
                .min()
        }
    }

    #[test]
    fn insert_point_then_contains() {
        let lookup = FakeLookup {
            segments: vec![(1, 100)],
        };
        let mut set = RangeSet::new();
        set.insert_point(Position::new(1, 5), &lookup);
        assert!(set.contains(Position::new(1, 5)));
        assert!(!set.contains(Position::new(1, 4)));
        assert!(!set.contains(Position::new(1, 6)));
    }

    #[test]
    fn adjacent_points_coalesce_within_segment() {
        let lookup = FakeLookup {
            segments: vec![(1, 100)],
        };
        let mut set = RangeSet::new();
        set.insert_point(Position::new(1, 5), &lookup);
        set.insert_point(Position::new(1, 6), &lookup);
        set.insert_point(Position::new(1, 4), &lookup);
        assert_eq!(set.num_ranges(), 1);
        assert_eq!(set.span_count(&lookup), 3);
    }

    #[test]
    fn adjacent_points_coalesce_across_segment_boundary() {
        let lookup = FakeLookup {
            segments: vec![(1, 9), (2, 9)],
        };
        let mut set = RangeSet::new();
        set.insert_point(Position::new(1, 9), &lookup);
        set.insert_point(Position::new(2, 0), &lookup);
        assert_eq!(set.num_ranges(), 1);
        let (lo, hi) = set.iter().next().unwrap();
        assert_eq!(lo, Position::new(1, 9));
        assert_eq!(hi, Position::new(2, 0));
    }

    #[test]
    fn non_adjacent_points_stay_separate() {
        let lookup = FakeLookup {
            segments: vec![(1, 100)],
        };
        let mut set = RangeSet::new();
        set.insert_point(Position::new(1, 5), &lookup);
        set.insert_point(Position::new(1, 9), &lookup);
        assert_eq!(set.num_ranges(), 2);
    }

    #[test]
    fn pop_contiguous_prefix_from_advances_through_one_range() {
        let lookup = FakeLookup {
            segments: vec![(1, 100)],
        };
        let mut set = RangeSet::new();
        set.insert_range(Position::new(1, 3), Position::new(1, 7), &lookup);

        let popped = set.pop_contiguous_prefix_from(Position::new(1, 2), &lookup);
        assert_eq!(popped, Some((Position::new(1, 3), Position::new(1, 7))));
        assert!(set.is_empty());

        assert_eq!(
            set.pop_contiguous_prefix_from(Position::new(1, 2), &lookup),
            None
        );
    }

    #[test]
    fn count_in_range_clips_to_window() {
        let lookup = FakeLookup {
            segments: vec![(1, 100)],
        };
        let mut set = RangeSet::new();
        set.insert_range(Position::new(1, 2), Position::new(1, 4), &lookup);
        set.insert_range(Position::new(1, 10), Position::new(1, 12), &lookup);

        assert_eq!(
            set.count_in_range(Position::new(1, 3), Position::new(1, 11), &lookup),
            4
        );
    }

    #[test]
    fn span_count_sums_across_segments() {
        let lookup = FakeLookup {
            segments: vec![(1, 9), (2, 9), (3, 9)],
        };
        let mut set = RangeSet::new();
        set.insert_range(Position::new(1, 5), Position::new(3, 2), &lookup);
        // segment 1: entries 5..=9 -> 5
        // segment 2: entries 0..=9 -> 10
        // segment 3: entries 0..=2 -> 3
        assert_eq!(set.span_count(&lookup), 18);
    }
}
