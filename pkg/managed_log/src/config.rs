use mlog_common::chrono::Duration;

/// Recognized options for a managed log, following the donor's convention
/// of a plain `Options` struct with a `Default` impl (see
/// `EmbeddedDBOptions`) rather than a derive-macro builder.
#[derive(Clone, Debug)]
pub struct ManagedLogConfig {
    /// Segment rollover threshold by entry count.
    pub max_entries_per_ledger: u64,

    /// Segment rollover threshold by accumulated byte size. `0` disables
    /// the byte-size threshold (only `max_entries_per_ledger` applies).
    pub max_segment_size_bytes: u64,

    /// `0` means "trim as soon as no durable cursor backlog pins the
    /// segment", i.e. no time-based retention floor.
    pub retention_time: Duration,

    /// Retained bytes below which trimming will not go, even once a
    /// segment is otherwise eligible. `0` disables the size floor.
    pub retention_size_bytes: u64,

    /// `0` disables the entry cache (pass-through).
    pub max_cache_size_bytes: u64,

    /// Segment rollover threshold for a durable cursor's own persisted
    /// metadata record.
    pub metadata_max_entries_per_ledger: u64,
}

impl Default for ManagedLogConfig {
    fn default() -> Self {
        Self {
            max_entries_per_ledger: 50_000,
            max_segment_size_bytes: 0,
            retention_time: Duration::seconds(0),
            retention_size_bytes: 0,
            max_cache_size_bytes: 0,
            metadata_max_entries_per_ledger: 50_000,
        }
    }
}
