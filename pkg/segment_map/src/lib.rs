//! Ordered mapping from segment id to segment metadata.
//!
//! Grounded on the donor's `datastore::meta::key_ranges::KeyRanges` in
//! spirit (an ordered `BTreeMap` is the right structure whenever you need
//! "closed range associated with metadata, iterate in order") but far
//! simpler: segment ids don't overlap or split, so a plain
//! `BTreeMap<u64, SegmentMeta>` suffices.

use std::collections::BTreeMap;

use mlog_common::chrono::{DateTime, Utc};
use mlog_common::errors::*;
use mlog_position::{Position, SegmentLookup};

/// Metadata the log keeps about one segment.
#[derive(Clone, Debug)]
pub struct SegmentMeta {
    /// Number of entries appended to this segment so far.
    pub entry_count: u64,

    /// Index of the last entry confirmed (committed) in this segment, or
    /// `-1` if the segment has no entries yet. For a closed segment this
    /// never changes again; for the current writable segment it grows as
    /// entries are appended.
    pub last_confirmed_entry: i64,

    pub byte_size: u64,

    pub created_at: DateTime<Utc>,

    /// `true` once the segment has been rolled past (no further appends)
    /// and is eligible for trimming subject to retention/pin rules.
    pub closed: bool,
}

impl SegmentMeta {
    pub fn new_open(created_at: DateTime<Utc>) -> Self {
        Self {
            entry_count: 0,
            last_confirmed_entry: -1,
            byte_size: 0,
            created_at,
            closed: false,
        }
    }
}

/// Ordered `segmentId -> SegmentMeta` map. Exactly reflects the set of
/// segment ids the underlying segment store still has open; entries are
/// inserted as segments are created and removed only by `trim`.
#[derive(Default)]
pub struct SegmentMap {
    segments: BTreeMap<u64, SegmentMeta>,
}

impl SegmentMap {
    pub fn new() -> Self {
        Self {
            segments: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, segment_id: u64) -> Option<&SegmentMeta> {
        self.segments.get(&segment_id)
    }

    pub fn get_mut(&mut self, segment_id: u64) -> Option<&mut SegmentMeta> {
        self.segments.get_mut(&segment_id)
    }

    pub fn insert(&mut self, segment_id: u64, meta: SegmentMeta) {
        self.segments.insert(segment_id, meta);
    }

    /// Removes a segment from the map. Callers are responsible for
    /// enforcing retention/pin invariants before calling this (see
    /// `ManagedLog::trim`); the map itself just reflects whatever the
    /// caller asserts exists.
    pub fn remove(&mut self, segment_id: u64) -> Option<SegmentMeta> {
        self.segments.remove(&segment_id)
    }

    pub fn oldest_segment_id(&self) -> Option<u64> {
        self.segments.keys().next().copied()
    }

    pub fn newest_segment_id(&self) -> Option<u64> {
        self.segments.keys().next_back().copied()
    }

    /// The position one past the last committed entry in the log: the
    /// current tail. `None` if the log has no segments at all.
    pub fn tail(&self) -> Option<Position> {
        let (&id, meta) = self.segments.iter().next_back()?;
        Some(Position::new(id, meta.last_confirmed_entry))
    }

    /// Ids of every segment that is closed (no longer being appended to)
    /// and therefore eligible for trim consideration, in ascending order.
    pub fn closed_segment_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.segments
            .iter()
            .filter(|(_, meta)| meta.closed)
            .map(|(id, _)| *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &SegmentMeta)> {
        self.segments.iter().map(|(id, meta)| (*id, meta))
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Total bytes retained across every segment still in the map.
    pub fn total_bytes(&self) -> u64 {
        self.segments.values().map(|meta| meta.byte_size).sum()
    }

    /// Resolves `earliest`/`latest` sentinels and concrete positions the
    /// way `ManagedLog::open_cursor`/`new_non_durable_cursor` need to.
    pub fn resolve_start_at(&self, start_at: Position) -> Result<Position> {
        if start_at.is_earliest() {
            let oldest = self
                .oldest_segment_id()
                .ok_or_else(|| format_err!("log has no segments"))?;
            return Ok(Position::new(oldest, -1));
        }

        if start_at.is_latest() {
            let tail = self
                .tail()
                .ok_or_else(|| format_err!("log has no segments"))?;
            return Ok(tail);
        }

        Ok(start_at)
    }
}

impl SegmentLookup for SegmentMap {
    fn last_confirmed_entry(&self, segment_id: u64) -> Option<i64> {
        self.segments.get(&segment_id).map(|m| m.last_confirmed_entry)
    }

    fn successor(&self, segment_id: u64) -> Option<u64> {
        self.segments
            .range((
                std::ops::Bound::Excluded(segment_id),
                std::ops::Bound::Unbounded,
            ))
            .next()
            .map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(last_confirmed: i64) -> SegmentMeta {
        SegmentMeta {
            entry_count: (last_confirmed + 1).max(0) as u64,
            last_confirmed_entry: last_confirmed,
            byte_size: 0,
            created_at: Utc::now(),
            closed: false,
        }
    }

    #[test]
    fn tail_is_last_segments_last_entry() {
        let mut map = SegmentMap::new();
        map.insert(3, meta(4));
        map.insert(5, meta(1));
        assert_eq!(map.tail(), Some(Position::new(5, 1)));
        assert_eq!(map.oldest_segment_id(), Some(3));
        assert_eq!(map.newest_segment_id(), Some(5));
    }

    #[test]
    fn successor_skips_missing_ids() {
        let mut map = SegmentMap::new();
        map.insert(3, meta(0));
        map.insert(7, meta(0));
        assert_eq!(map.successor(3), Some(7));
        assert_eq!(map.successor(7), None);
    }

    #[test]
    fn resolve_start_at_earliest_uses_oldest_segment() {
        let mut map = SegmentMap::new();
        map.insert(3, meta(9));
        assert_eq!(
            map.resolve_start_at(Position::earliest()).unwrap(),
            Position::new(3, -1)
        );
    }

    #[test]
    fn resolve_start_at_latest_uses_tail() {
        let mut map = SegmentMap::new();
        map.insert(3, meta(9));
        assert_eq!(
            map.resolve_start_at(Position::latest()).unwrap(),
            Position::new(3, 9)
        );
    }
}
