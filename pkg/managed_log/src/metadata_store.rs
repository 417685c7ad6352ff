//! The metadata collaborator a durable `Cursor` persists its watermark
//! through. Grounded the same way as `segment_store`: a narrow async trait
//! plus an in-memory fake, rather than owning a real metadata service.

use std::collections::HashMap;

use mlog_common::async_std::sync::Mutex;
use mlog_common::async_trait;
use mlog_common::chrono::{DateTime, Utc};
use mlog_common::errors::*;

use mlog_position::Position;

/// Per-cursor persistence record. Field shapes follow the "cursor
/// persistence record" external interface: the individually-deleted range
/// list is optional and its absence must be tolerated as "empty", and
/// `entry_id = -1` is the normal sentinel for "before any entry in this
/// segment", not a corruption signal.
#[derive(Clone, Debug, PartialEq)]
pub struct CursorRecord {
    pub name: String,
    pub mark_delete: Position,
    pub individually_deleted_ranges: Vec<(Position, Position)>,
    pub last_updated: DateTime<Utc>,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn load_cursor(&self, log: &str, cursor: &str) -> Result<Option<CursorRecord>>;

    async fn save_cursor(&self, log: &str, cursor: &str, record: &CursorRecord) -> Result<()>;

    async fn delete_cursor(&self, log: &str, cursor: &str) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: Mutex<HashMap<(String, String), CursorRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn load_cursor(&self, log: &str, cursor: &str) -> Result<Option<CursorRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(&(log.to_string(), cursor.to_string())).cloned())
    }

    async fn save_cursor(&self, log: &str, cursor: &str, record: &CursorRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert((log.to_string(), cursor.to_string()), record.clone());
        Ok(())
    }

    async fn delete_cursor(&self, log: &str, cursor: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        records.remove(&(log.to_string(), cursor.to_string()));
        Ok(())
    }
}
