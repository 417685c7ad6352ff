//! The cursor engine of a segmented, append-only log store: `ManagedLog`
//! owns segment rollover, retention and the durable-cursor registry;
//! `Cursor` tracks one subscriber's mark-delete watermark, individually
//! deleted positions, and read position.

pub mod config;
pub mod cursor;
pub mod log;
pub mod metadata_store;
pub mod segment_store;

pub use config::ManagedLogConfig;
pub use cursor::Cursor;
pub use log::ManagedLog;
pub use metadata_store::{CursorRecord, MetadataStore};
pub use segment_store::{EntryId, SegmentId, SegmentStore};

pub use mlog_common::bytes::Bytes;
pub use mlog_common::cancellation::CancellationToken;
pub use mlog_entry_cache::Entry;
pub use mlog_position::Position;

#[cfg(any(test, feature = "test-util"))]
pub use metadata_store::InMemoryMetadataStore;
#[cfg(any(test, feature = "test-util"))]
pub use segment_store::InMemorySegmentStore;
