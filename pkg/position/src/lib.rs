//! A total order over `(segmentId, entryId)` pairs locating a single entry
//! (or a sentinel) in a segmented, append-only log.
//!
//! Generalizes the donor workspace's `(Bytes, Bytes)` key-range endpoints
//! (`datastore::meta::key_ranges::KeyRanges`) to the two-level address a
//! segmented log needs: entries are ordered within a segment by `entryId`,
//! and segments are ordered among themselves by `segmentId`, with gaps in
//! segment numbering possible because the segment store assigns ids and may
//! skip some.

use std::fmt;
use std::str::FromStr;

use mlog_common::errors::*;

/// Resolves the segment-boundary facts `Position::next` needs: how far a
/// segment's commits extend, and which segment (if any) immediately
/// follows it in the log. Implemented by `mlog_segment_map::SegmentMap`;
/// kept as a trait here so this crate never depends on that one.
pub trait SegmentLookup {
    /// Index of the last confirmed (committed) entry in `segment_id`, or
    /// `None` if the segment isn't known (trimmed away, or never
    /// existed).
    fn last_confirmed_entry(&self, segment_id: u64) -> Option<i64>;

    /// The next segment id strictly greater than `segment_id` that is
    /// present in the map, or `None` if `segment_id` is the newest known
    /// segment.
    fn successor(&self, segment_id: u64) -> Option<u64>;
}

/// A pair `(segmentId, entryId)` locating a single entry, or one of the two
/// sentinels `earliest`/`latest`.
///
/// Ordering is lexicographic: first by `segment_id`, then by `entry_id`.
/// Positions are immutable values. Every transformation (`next`) returns a
/// new `Position`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Position {
    pub segment_id: u64,
    pub entry_id: i64,
}

impl Position {
    pub const fn new(segment_id: u64, entry_id: i64) -> Self {
        Self {
            segment_id,
            entry_id,
        }
    }

    /// Strictly before any real entry.
    pub const fn earliest() -> Self {
        Self::new(0, -1)
    }

    /// Strictly after any entry committed at the time this sentinel is
    /// resolved. Never stored as a cursor's persistent position; only used
    /// as an upper bound for range queries and validity checks.
    pub const fn latest() -> Self {
        Self::new(u64::MAX, i64::MAX)
    }

    pub fn is_earliest(&self) -> bool {
        *self == Self::earliest()
    }

    pub fn is_latest(&self) -> bool {
        *self == Self::latest()
    }

    /// The position immediately following this one, consulting `lookup` to
    /// cross a segment boundary (possibly skipping segment-id gaps) when
    /// this position's segment has no further committed entries.
    pub fn next(&self, lookup: &dyn SegmentLookup) -> Position {
        match lookup.last_confirmed_entry(self.segment_id) {
            Some(last_confirmed) => {
                let next_entry = self.entry_id + 1;
                if next_entry <= last_confirmed || lookup.successor(self.segment_id).is_none() {
                    Position::new(self.segment_id, next_entry)
                } else {
                    // `self` is the last entry of a now-closed segment; roll
                    // into whatever segment follows it, skipping any ids the
                    // segment store never assigned.
                    let succ = lookup.successor(self.segment_id).unwrap();
                    Position::new(succ, 0)
                }
            }
            // Segment unknown to the map (e.g. trimmed). There is nothing
            // more authoritative to consult, so advance in place.
            None => Position::new(self.segment_id, self.entry_id + 1),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment_id, self.entry_id)
    }
}

impl FromStr for Position {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (seg, entry) = s
            .split_once(':')
            .ok_or_else(|| format_err!("malformed position: {}", s))?;

        let segment_id: u64 = seg
            .parse()
            .map_err(|_| format_err!("malformed position segment id: {}", s))?;
        let entry_id: i64 = entry
            .parse()
            .map_err(|_| format_err!("malformed position entry id: {}", s))?;

        Ok(Position::new(segment_id, entry_id))
    }
}
