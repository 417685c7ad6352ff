use failure::Fail;

/// Classification of the failure modes exposed across the log and cursor
/// surface.
///
/// Every operation that can fail returns a `common::errors::Error` (a boxed
/// `failure::Fail`) wrapping one of these. Callers that need to branch on the
/// failure mode should `downcast_ref::<ErrorKind>()` the returned error.
#[derive(Fail, Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The managed log has been closed; the caller must re-open it.
    #[fail(display = "log closed: {}", _0)]
    LogClosed(String),

    /// The cursor has been closed; terminal for that cursor.
    #[fail(display = "cursor closed: {}", _0)]
    CursorClosed(String),

    /// A position was rejected: either out of the log's bounds, or a
    /// mark-delete regression.
    #[fail(display = "invalid position: {}", _0)]
    InvalidPosition(String),

    /// The segment store failed to service a read or write.
    #[fail(display = "storage error: {}", _0)]
    StorageError(String),

    /// The metadata store failed to load or persist cursor state.
    #[fail(display = "metadata error: {}", _0)]
    MetadataError(String),

    /// The caller cancelled the operation before it committed.
    #[fail(display = "cancelled")]
    Cancelled,
}

impl ErrorKind {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ErrorKind::Cancelled)
    }
}
