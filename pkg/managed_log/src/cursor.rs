//! Per-subscriber reader state over a managed log: mark-delete, individual
//! deletes, read position, and (for durable cursors) persistence.
//!
//! The durable/non-durable split is modeled as a single `Cursor` type
//! carrying a `Persistence` capability: the non-durable variant is a no-op
//! for load/save and is simply never registered by `ManagedLog`.

use std::fmt;
use std::sync::{Arc, Weak};

use mlog_common::async_std::sync::Mutex;
use mlog_common::cancellation::{with_cancellation, CancellationToken};
use mlog_common::chrono::Utc;
use mlog_common::errors::*;

use mlog_entry_cache::Entry;
use mlog_position::{Position, SegmentLookup};
use mlog_rangeset::{count_positions, RangeSet};

use crate::log::ManagedLogInner;
use crate::metadata_store::{CursorRecord, MetadataStore};

/// How a cursor's mark-delete watermark is (or isn't) persisted.
pub enum Persistence {
    Durable {
        name: String,
        metadata_store: Arc<dyn MetadataStore>,
    },
    NonDurable,
}

/// Cursor lifecycle. `Closing` exists as a named state, but every operation
/// here is already serialized through one `async_std::sync::Mutex` per
/// cursor. By the time `close()` can acquire that lock, any read that was
/// "in flight" has already released it and completed, so the transition
/// through `Closing` collapses to an instant rather than needing a separate
/// drain step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Lifecycle {
    Open,
    Closing,
    Closed,
}

struct CursorState {
    mark_delete: Position,
    individually_deleted: RangeSet,
    read_position: Position,
    lifecycle: Lifecycle,
}

pub struct Cursor {
    log: Weak<ManagedLogInner>,
    log_name: String,
    persistence: Persistence,
    state: Mutex<CursorState>,
}

impl Cursor {
    pub(crate) fn new(
        log: Arc<ManagedLogInner>,
        log_name: String,
        persistence: Persistence,
        mark_delete: Position,
        individually_deleted: RangeSet,
        read_position: Position,
    ) -> Self {
        Self {
            log: Arc::downgrade(&log),
            log_name,
            persistence,
            state: Mutex::new(CursorState {
                mark_delete,
                individually_deleted,
                read_position,
                lifecycle: Lifecycle::Open,
            }),
        }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self.persistence, Persistence::Durable { .. })
    }

    fn cursor_name(&self) -> Option<&str> {
        match &self.persistence {
            Persistence::Durable { name, .. } => Some(name.as_str()),
            Persistence::NonDurable => None,
        }
    }

    fn closed_error(&self) -> Error {
        ErrorKind::CursorClosed(self.describe_sync()).into()
    }

    fn describe_sync(&self) -> String {
        match self.cursor_name() {
            Some(name) => format!("{}/{}", self.log_name, name),
            None => self.log_name.clone(),
        }
    }

    fn upgrade_log(&self) -> Result<Arc<ManagedLogInner>> {
        self.log
            .upgrade()
            .ok_or_else(|| ErrorKind::LogClosed(self.log_name.clone()).into())
    }

    /// Reads up to `max` entries starting at the current read position,
    /// skipping any individually-deleted position, advancing the read
    /// position past whatever was examined (returned or skipped).
    pub async fn read_entries(&self, max: usize) -> Result<Vec<Entry>> {
        self.read_entries_cancellable(max, None).await
    }

    /// As `read_entries`, but races `cancellation_token` against the read.
    /// Cancellation can only preempt the storage-read phase: the read
    /// position is already committed under the state lock by the time any
    /// entry fetch starts, so a cancel here still leaves `readPosition`
    /// advanced past whatever was examined.
    pub async fn read_entries_cancellable(
        &self,
        max: usize,
        cancellation_token: Option<&dyn CancellationToken>,
    ) -> Result<Vec<Entry>> {
        with_cancellation(self.read_entries_inner(max), cancellation_token).await
    }

    async fn read_entries_inner(&self, max: usize) -> Result<Vec<Entry>> {
        let log = self.upgrade_log()?;
        let mut state = self.state.lock().await;
        if state.lifecycle != Lifecycle::Open {
            return Err(self.closed_error());
        }

        let positions = {
            let log_state = log.state.lock().await;
            if log_state.closed {
                return Err(ErrorKind::LogClosed(self.log_name.clone()).into());
            }
            let lookup: &dyn SegmentLookup = &log_state.segment_map;
            let tail = log_state.segment_map.tail();

            let mut cursor_pos = state.read_position;
            let mut positions = Vec::new();
            while positions.len() < max {
                match tail {
                    Some(t) if cursor_pos <= t => {
                        if !state.individually_deleted.contains(cursor_pos) {
                            positions.push(cursor_pos);
                        }
                        cursor_pos = cursor_pos.next(lookup);
                    }
                    _ => break,
                }
            }
            state.read_position = cursor_pos;
            positions
        };

        let mut entries = Vec::with_capacity(positions.len());
        for position in positions {
            let entry = match log.cache.get(position).await {
                Some(entry) => entry,
                None => {
                    let payload = log
                        .segment_store
                        .read(position.segment_id, position.entry_id)
                        .await
                        .map_err(|e| ErrorKind::StorageError(e.to_string()))?;
                    let size = payload.len() as u64;
                    let entry = Entry::new(position, payload);
                    log.cache.put(entry.clone(), size).await;
                    entry
                }
            };
            entries.push(entry);
        }

        Ok(entries)
    }

    pub async fn has_more_entries(&self) -> Result<bool> {
        Ok(self.get_number_of_entries().await? > 0)
    }

    pub async fn get_number_of_entries(&self) -> Result<u64> {
        let log = self.upgrade_log()?;
        let state = self.state.lock().await;
        let log_state = log.state.lock().await;
        let lookup: &dyn SegmentLookup = &log_state.segment_map;

        let tail = match log_state.segment_map.tail() {
            Some(t) => t,
            None => return Ok(0),
        };
        if state.read_position > tail {
            return Ok(0);
        }

        let total = count_positions(state.read_position, tail, lookup);
        let deleted = state
            .individually_deleted
            .count_in_range(state.read_position, tail, lookup);
        Ok(total.saturating_sub(deleted))
    }

    pub async fn get_number_of_entries_in_backlog(&self) -> Result<u64> {
        let log = self.upgrade_log()?;
        let state = self.state.lock().await;
        let log_state = log.state.lock().await;
        let lookup: &dyn SegmentLookup = &log_state.segment_map;

        let tail = match log_state.segment_map.tail() {
            Some(t) => t,
            None => return Ok(0),
        };
        let start = state.mark_delete.next(lookup);
        if start > tail {
            return Ok(0);
        }

        let total = count_positions(start, tail, lookup);
        let deleted = state.individually_deleted.span_count(lookup);
        Ok(total.saturating_sub(deleted))
    }

    /// Requires `p >= mark_delete` (monotonic). Absorbs any now-adjacent
    /// prefix of `individually_deleted`, then advances `read_position` if it
    /// had fallen behind. Durable cursors persist before committing;
    /// on persistence failure in-memory state is left unchanged.
    pub async fn mark_delete(&self, p: Position) -> Result<()> {
        self.mark_delete_cancellable(p, None).await
    }

    /// As `mark_delete`, but completes with `Cancelled` (no state change)
    /// if `cancellation_token` resolves before the durable persistence call
    /// (if any) finishes.
    pub async fn mark_delete_cancellable(
        &self,
        p: Position,
        cancellation_token: Option<&dyn CancellationToken>,
    ) -> Result<()> {
        with_cancellation(self.mark_delete_inner(p), cancellation_token).await
    }

    async fn mark_delete_inner(&self, p: Position) -> Result<()> {
        let log = self.upgrade_log()?;
        let mut state = self.state.lock().await;
        if state.lifecycle != Lifecycle::Open {
            return Err(self.closed_error());
        }
        if p < state.mark_delete {
            return Err(ErrorKind::InvalidPosition(format!(
                "mark-delete regression: {} < {}",
                p, state.mark_delete
            ))
            .into());
        }

        let mut new_mark_delete = p;
        let mut new_individually_deleted = state.individually_deleted.clone();
        let mut new_read_position = state.read_position;

        {
            let log_state = log.state.lock().await;
            let lookup: &dyn SegmentLookup = &log_state.segment_map;
            while let Some((_, hi)) =
                new_individually_deleted.pop_contiguous_prefix_from(new_mark_delete, lookup)
            {
                new_mark_delete = hi;
            }
            if new_read_position <= new_mark_delete {
                new_read_position = new_mark_delete.next(lookup);
            }
        }

        self.persist_if_durable(new_mark_delete, &new_individually_deleted)
            .await?;

        state.mark_delete = new_mark_delete;
        state.individually_deleted = new_individually_deleted;
        state.read_position = new_read_position;
        Ok(())
    }

    /// Acknowledges a single position past the watermark. A position at or
    /// before the watermark is a silent no-op (idempotent).
    pub async fn delete(&self, p: Position) -> Result<()> {
        let log = self.upgrade_log()?;
        let mut state = self.state.lock().await;
        if state.lifecycle != Lifecycle::Open {
            return Err(self.closed_error());
        }
        if p <= state.mark_delete {
            return Ok(());
        }

        let mut new_individually_deleted = state.individually_deleted.clone();
        let mut new_mark_delete = state.mark_delete;
        let mut new_read_position = state.read_position;

        {
            let log_state = log.state.lock().await;
            let lookup: &dyn SegmentLookup = &log_state.segment_map;
            new_individually_deleted.insert_point(p, lookup);
            while let Some((_, hi)) =
                new_individually_deleted.pop_contiguous_prefix_from(new_mark_delete, lookup)
            {
                new_mark_delete = hi;
            }
            if new_read_position <= new_mark_delete {
                new_read_position = new_mark_delete.next(lookup);
            }
        }

        self.persist_if_durable(new_mark_delete, &new_individually_deleted)
            .await?;

        state.mark_delete = new_mark_delete;
        state.individually_deleted = new_individually_deleted;
        state.read_position = new_read_position;
        Ok(())
    }

    async fn persist_if_durable(&self, mark_delete: Position, ranges: &RangeSet) -> Result<()> {
        if let Persistence::Durable {
            name,
            metadata_store,
        } = &self.persistence
        {
            let record = CursorRecord {
                name: name.clone(),
                mark_delete,
                individually_deleted_ranges: ranges.iter().collect(),
                last_updated: Utc::now(),
            };
            metadata_store
                .save_cursor(&self.log_name, name, &record)
                .await
                .map_err(|e| ErrorKind::MetadataError(e.to_string()))?;
        }
        Ok(())
    }

    /// Sets `read_position = next(mark_delete)`. Does not touch
    /// `mark_delete` or `individually_deleted`.
    pub async fn rewind(&self) -> Result<()> {
        let log = self.upgrade_log()?;
        let mut state = self.state.lock().await;
        if state.lifecycle != Lifecycle::Open {
            return Err(self.closed_error());
        }
        let log_state = log.state.lock().await;
        let lookup: &dyn SegmentLookup = &log_state.segment_map;
        state.read_position = state.mark_delete.next(lookup);
        Ok(())
    }

    /// Sets `read_position = p` unconditionally, independent of
    /// `mark_delete`. Fails if `p` lies outside `[earliest, next(tail)]`.
    pub async fn reset_cursor(&self, p: Position) -> Result<()> {
        let log = self.upgrade_log()?;
        let mut state = self.state.lock().await;
        if state.lifecycle != Lifecycle::Open {
            return Err(self.closed_error());
        }

        let log_state = log.state.lock().await;
        let lookup: &dyn SegmentLookup = &log_state.segment_map;
        let upper_bound = match log_state.segment_map.tail() {
            Some(tail) => tail.next(lookup),
            None => Position::earliest(),
        };
        if p < Position::earliest() || p > upper_bound {
            return Err(ErrorKind::InvalidPosition(format!(
                "reset position {} outside [{}, {}]",
                p,
                Position::earliest(),
                upper_bound
            ))
            .into());
        }

        state.read_position = p;
        Ok(())
    }

    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.lifecycle = Lifecycle::Closed;
    }

    pub async fn get_mark_deleted_position(&self) -> Position {
        self.state.lock().await.mark_delete
    }

    pub async fn get_read_position(&self) -> Position {
        self.state.lock().await.read_position
    }

    pub async fn describe(&self) -> String {
        let state = self.state.lock().await;
        match self.cursor_name() {
            Some(name) => format!(
                "DurableCursorImpl{{ledger={}, cursor={}, ackPos={}, readPos={}}}",
                self.log_name, name, state.mark_delete, state.read_position
            ),
            None => format!(
                "NonDurableCursorImpl{{ledger={}, ackPos={}, readPos={}}}",
                self.log_name, state.mark_delete, state.read_position
            ),
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("log_name", &self.log_name)
            .field("cursor_name", &self.cursor_name())
            .field("durable", &self.is_durable())
            .finish()
    }
}
