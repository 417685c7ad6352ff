//! The managed log: append path, segment rollover, retention/trim, and the
//! durable-cursor registry.
//!
//! Grounded on `datastore::meta::watchers::Watchers` for its overall shape
//! (an `Arc`-wrapped handle around a single `async_std::sync::Mutex`-guarded
//! state struct) and on `state_machine.rs::EmbeddedDBStateMachine` for the
//! `Options`-struct-plus-injected-collaborators construction pattern.

use std::collections::HashMap;
use std::sync::Arc;

use mlog_common::async_std::sync::Mutex;
use mlog_common::chrono::Utc;
use mlog_common::errors::*;

use mlog_entry_cache::EntryCache;
use mlog_position::{Position, SegmentLookup};
use mlog_segment_map::{SegmentMap, SegmentMeta};

use crate::config::ManagedLogConfig;
use crate::cursor::{Cursor, Persistence};
use crate::metadata_store::MetadataStore;
use crate::segment_store::{SegmentId, SegmentStore};

pub(crate) struct LogState {
    pub segment_map: SegmentMap,
    pub current_segment: SegmentId,
    pub closed: bool,
    pub durable_cursors: HashMap<String, Arc<Cursor>>,
}

pub(crate) struct ManagedLogInner {
    pub name: String,
    pub config: ManagedLogConfig,
    pub segment_store: Arc<dyn SegmentStore>,
    pub metadata_store: Arc<dyn MetadataStore>,
    pub cache: EntryCache,
    pub state: Mutex<LogState>,
}

/// A logical append-only sequence of entries composed of multiple segments.
#[derive(Clone)]
pub struct ManagedLog {
    pub(crate) inner: Arc<ManagedLogInner>,
}

impl ManagedLog {
    /// Opens (creating if necessary) the managed log `name`, backed by
    /// `segment_store` and `metadata_store`. A fresh writable segment is
    /// always created on open; durable cursors are loaded lazily by
    /// `open_cursor`, not eagerly enumerated here - the metadata interface
    /// this crate depends on (see `MetadataStore`) addresses individual
    /// cursors by name rather than exposing a "list cursors for this log"
    /// call, so `open_cursor` is where cursor metadata actually gets loaded.
    pub async fn open(
        name: impl Into<String>,
        config: ManagedLogConfig,
        segment_store: Arc<dyn SegmentStore>,
        metadata_store: Arc<dyn MetadataStore>,
    ) -> Result<Self> {
        let name = name.into();
        let cache = EntryCache::new(config.max_cache_size_bytes);

        let segment_id = segment_store
            .create_segment()
            .await
            .map_err(|e| ErrorKind::StorageError(e.to_string()))?;

        let mut segment_map = SegmentMap::new();
        segment_map.insert(segment_id, SegmentMeta::new_open(Utc::now()));

        log::info!("opened managed log '{}', initial segment {}", name, segment_id);

        let inner = Arc::new(ManagedLogInner {
            name,
            config,
            segment_store,
            metadata_store,
            cache,
            state: Mutex::new(LogState {
                segment_map,
                current_segment: segment_id,
                closed: false,
                durable_cursors: HashMap::new(),
            }),
        });

        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Appends `payload` to the current segment, rolling over to a new
    /// segment first if the current one is full. Returns the assigned
    /// position.
    pub async fn add_entry(&self, payload: mlog_common::bytes::Bytes) -> Result<Position> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(ErrorKind::LogClosed(self.inner.name.clone()).into());
        }

        let config = &self.inner.config;
        let needs_rollover = {
            let meta = state
                .segment_map
                .get(state.current_segment)
                .expect("current segment always present in map");
            meta.entry_count >= config.max_entries_per_ledger
                || (config.max_segment_size_bytes > 0
                    && meta.byte_size >= config.max_segment_size_bytes)
        };

        if needs_rollover {
            self.roll_segment(&mut state).await?;
        }

        let current_segment = state.current_segment;
        let payload_len = payload.len() as u64;

        let entry_id = self
            .inner
            .segment_store
            .append(current_segment, payload)
            .await
            .map_err(|e| ErrorKind::StorageError(e.to_string()))?;

        {
            let meta = state
                .segment_map
                .get_mut(current_segment)
                .expect("current segment always present in map");
            meta.entry_count += 1;
            meta.last_confirmed_entry = entry_id;
            meta.byte_size += payload_len;
        }

        let position = Position::new(current_segment, entry_id);

        drop(state);
        // Trimming is evaluated synchronously after each append rather than
        // on a separate timer task. This crate introduces no scheduler, and
        // doing it here makes retention cleanup observable without a real
        // clock to wait on.
        self.trim().await?;

        Ok(position)
    }

    async fn roll_segment(&self, state: &mut LogState) -> Result<()> {
        let old_segment = state.current_segment;
        self.inner
            .segment_store
            .close_segment(old_segment)
            .await
            .map_err(|e| ErrorKind::StorageError(e.to_string()))?;
        if let Some(meta) = state.segment_map.get_mut(old_segment) {
            meta.closed = true;
        }

        let new_segment = self
            .inner
            .segment_store
            .create_segment()
            .await
            .map_err(|e| ErrorKind::StorageError(e.to_string()))?;
        state
            .segment_map
            .insert(new_segment, SegmentMeta::new_open(Utc::now()));
        state.current_segment = new_segment;

        log::debug!(
            "managed log '{}' rolled segment {} -> {}",
            self.inner.name,
            old_segment,
            new_segment
        );

        Ok(())
    }

    /// Creates or loads the durable cursor `name`. Idempotent: a second call
    /// with the same name returns the already-registered cursor.
    pub async fn open_cursor(&self, name: impl Into<String>) -> Result<Arc<Cursor>> {
        let name = name.into();
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(ErrorKind::LogClosed(self.inner.name.clone()).into());
        }
        if let Some(existing) = state.durable_cursors.get(&name) {
            return Ok(existing.clone());
        }

        let record = self
            .inner
            .metadata_store
            .load_cursor(&self.inner.name, &name)
            .await
            .map_err(|e| ErrorKind::MetadataError(e.to_string()))?;

        let (mark_delete, individually_deleted) = match record {
            Some(record) => {
                let mut ranges = mlog_rangeset::RangeSet::new();
                let lookup: &dyn SegmentLookup = &state.segment_map;
                for (lo, hi) in record.individually_deleted_ranges {
                    ranges.insert_range(lo, hi, lookup);
                }
                (record.mark_delete, ranges)
            }
            None => {
                let oldest = state
                    .segment_map
                    .oldest_segment_id()
                    .ok_or_else(|| format_err!("log has no segments"))?;
                (Position::new(oldest, -1), mlog_rangeset::RangeSet::new())
            }
        };

        let read_position = {
            let lookup: &dyn SegmentLookup = &state.segment_map;
            mark_delete.next(lookup)
        };

        let cursor = Arc::new(Cursor::new(
            self.inner.clone(),
            self.inner.name.clone(),
            Persistence::Durable {
                name: name.clone(),
                metadata_store: self.inner.metadata_store.clone(),
            },
            mark_delete,
            individually_deleted,
            read_position,
        ));

        state.durable_cursors.insert(name, cursor.clone());
        Ok(cursor)
    }

    /// Creates a non-durable cursor. Never registered, never persisted.
    pub async fn new_non_durable_cursor(&self, start_at: Position) -> Result<Arc<Cursor>> {
        let state = self.inner.state.lock().await;
        if state.closed {
            return Err(ErrorKind::LogClosed(self.inner.name.clone()).into());
        }

        let lookup: &dyn SegmentLookup = &state.segment_map;
        let mark_delete = state.segment_map.resolve_start_at(start_at)?;
        let read_position = mark_delete.next(lookup);

        Ok(Arc::new(Cursor::new(
            self.inner.clone(),
            self.inner.name.clone(),
            Persistence::NonDurable,
            mark_delete,
            mlog_rangeset::RangeSet::new(),
            read_position,
        )))
    }

    /// Transitions the log to `Closed`. Active cursor reads fail with
    /// `LogClosed`; pending writes are rejected.
    pub async fn close(&self) {
        let mut state = self.inner.state.lock().await;
        state.closed = true;
        log::info!("closed managed log '{}'", self.inner.name);
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.state.lock().await.closed
    }

    /// Removes closed segments that lie strictly before the slowest durable
    /// cursor's mark-delete (or before the tail, if there are no durable
    /// cursors), subject to the retention budgets.
    ///
    /// Reads every durable cursor's mark-delete before taking the log's own
    /// state lock (never the other way around), so this never nests the two
    /// locks in the opposite order from cursor operations (which lock their
    /// own state first, then briefly borrow the log's segment map) and can't
    /// deadlock against them.
    pub async fn trim(&self) -> Result<()> {
        let durable_cursors: Vec<Arc<Cursor>> = {
            let state = self.inner.state.lock().await;
            state.durable_cursors.values().cloned().collect()
        };

        let mut slowest_durable_mark_delete = Position::latest();
        for cursor in &durable_cursors {
            let md = cursor.get_mark_deleted_position().await;
            if md < slowest_durable_mark_delete {
                slowest_durable_mark_delete = md;
            }
        }

        let mut state = self.inner.state.lock().await;
        let config = self.inner.config.clone();
        let mut total_bytes = state.segment_map.total_bytes();
        let now = Utc::now();

        let closed_ids: Vec<SegmentId> = state.segment_map.closed_segment_ids().collect();
        let mut to_delete = Vec::new();

        for segment_id in closed_ids {
            let meta = state
                .segment_map
                .get(segment_id)
                .expect("closed id came from this map")
                .clone();

            let segment_tail = Position::new(segment_id, meta.last_confirmed_entry);
            if !(segment_tail < slowest_durable_mark_delete) {
                break;
            }

            if config.retention_size_bytes > 0
                && total_bytes.saturating_sub(meta.byte_size) < config.retention_size_bytes
            {
                break;
            }

            if config.retention_time > mlog_common::chrono::Duration::seconds(0) {
                let age = now.signed_duration_since(meta.created_at);
                if age < config.retention_time {
                    break;
                }
            }

            total_bytes = total_bytes.saturating_sub(meta.byte_size);
            to_delete.push(segment_id);
        }

        let mut to_invalidate = Vec::new();
        for segment_id in &to_delete {
            if let Some(meta) = state.segment_map.get(*segment_id) {
                for entry_id in 0..=meta.last_confirmed_entry {
                    to_invalidate.push(Position::new(*segment_id, entry_id));
                }
            }
            state.segment_map.remove(*segment_id);
        }
        drop(state);

        for position in to_invalidate {
            self.inner.cache.invalidate(position).await;
        }

        for segment_id in to_delete {
            self.inner
                .segment_store
                .delete_segment(segment_id)
                .await
                .map_err(|e| ErrorKind::StorageError(e.to_string()))?;
            log::debug!("managed log '{}' trimmed segment {}", self.inner.name, segment_id);
        }

        Ok(())
    }
}
