//! The storage collaborator a `ManagedLog` is built on top of. Segment
//! storage itself is out of scope here and specified only by the interface
//! it needs; this module defines exactly that interface plus a fake
//! implementation usable in tests, mirroring how the donor depends on
//! `sstable::EmbeddedDB` through a narrow trait surface rather than owning
//! storage itself.

use std::collections::HashMap;

use mlog_common::async_std::sync::Mutex;
use mlog_common::async_trait;
use mlog_common::bytes::Bytes;
use mlog_common::errors::*;

/// Opaque segment identifier assigned by the store. Strictly monotonically
/// increasing across `create_segment` calls but not necessarily contiguous.
pub type SegmentId = u64;

/// Index of an entry within a segment.
pub type EntryId = i64;

#[async_trait]
pub trait SegmentStore: Send + Sync {
    async fn create_segment(&self) -> Result<SegmentId>;

    async fn append(&self, segment: SegmentId, payload: Bytes) -> Result<EntryId>;

    async fn read(&self, segment: SegmentId, entry: EntryId) -> Result<Bytes>;

    async fn close_segment(&self, segment: SegmentId) -> Result<()>;

    async fn delete_segment(&self, segment: SegmentId) -> Result<()>;
}

struct SegmentState {
    entries: Vec<Bytes>,
    closed: bool,
    deleted: bool,
}

/// In-memory `SegmentStore` used by the crate's own tests and by any caller
/// exercising `ManagedLog` without a real storage backend. Segment ids are
/// assigned starting at a configurable base and skip by a configurable
/// stride, so tests can reproduce "segment ids are not contiguous" without
/// a real storage layer to manufacture the gaps.
pub struct InMemorySegmentStore {
    state: Mutex<InMemoryState>,
}

struct InMemoryState {
    segments: HashMap<SegmentId, SegmentState>,
    next_id: SegmentId,
    id_stride: SegmentId,
}

impl InMemorySegmentStore {
    pub fn new() -> Self {
        Self::with_first_id_and_stride(1, 1)
    }

    /// `first_id` is the id assigned to the first created segment;
    /// subsequent ids increase by `id_stride`, so `id_stride > 1`
    /// reproduces the "segment ids may have gaps" case `Position::next`
    /// must handle.
    pub fn with_first_id_and_stride(first_id: SegmentId, id_stride: SegmentId) -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                segments: HashMap::new(),
                next_id: first_id,
                id_stride,
            }),
        }
    }
}

impl Default for InMemorySegmentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SegmentStore for InMemorySegmentStore {
    async fn create_segment(&self) -> Result<SegmentId> {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id += state.id_stride;
        state.segments.insert(
            id,
            SegmentState {
                entries: Vec::new(),
                closed: false,
                deleted: false,
            },
        );
        Ok(id)
    }

    async fn append(&self, segment: SegmentId, payload: Bytes) -> Result<EntryId> {
        let mut state = self.state.lock().await;
        let seg = state
            .segments
            .get_mut(&segment)
            .ok_or_else(|| ErrorKind::StorageError(format!("unknown segment {}", segment)))?;
        if seg.closed {
            return Err(ErrorKind::StorageError(format!("segment {} is closed", segment)).into());
        }
        seg.entries.push(payload);
        Ok((seg.entries.len() - 1) as EntryId)
    }

    async fn read(&self, segment: SegmentId, entry: EntryId) -> Result<Bytes> {
        let state = self.state.lock().await;
        let seg = state
            .segments
            .get(&segment)
            .ok_or_else(|| ErrorKind::StorageError(format!("unknown segment {}", segment)))?;
        seg.entries
            .get(entry as usize)
            .cloned()
            .ok_or_else(|| ErrorKind::StorageError(format!("no entry {}:{}", segment, entry)).into())
    }

    async fn close_segment(&self, segment: SegmentId) -> Result<()> {
        let mut state = self.state.lock().await;
        let seg = state
            .segments
            .get_mut(&segment)
            .ok_or_else(|| ErrorKind::StorageError(format!("unknown segment {}", segment)))?;
        seg.closed = true;
        Ok(())
    }

    async fn delete_segment(&self, segment: SegmentId) -> Result<()> {
        let mut state = self.state.lock().await;
        let seg = state
            .segments
            .get_mut(&segment)
            .ok_or_else(|| ErrorKind::StorageError(format!("unknown segment {}", segment)))?;
        seg.deleted = true;
        seg.entries.clear();
        Ok(())
    }
}
