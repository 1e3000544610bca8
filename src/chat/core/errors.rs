//! Error types for the conversation pipeline.

use thiserror::Error;

/// Validation failures for user-supplied message content.
///
/// These are recovered locally and never reach storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Content is empty or whitespace-only.
    #[error("message content must not be empty")]
    Empty,
    /// Content exceeds the maximum length in Unicode code points.
    ///
    /// Carries the actual and maximum lengths so a caller can render an
    /// exact character counter.
    #[error("message content too long: got {actual} characters, max {max}")]
    ContentTooLong {
        /// Actual length received.
        actual: usize,
        /// Maximum allowed length.
        max: usize,
    },
}

/// Conversation/message store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A stored row could not be decoded into a record.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// The requested record does not exist (or was deleted by retention).
    #[error("record not found")]
    NotFound,
}

impl StoreError {
    /// Whether the error is transient and worth retrying.
    ///
    /// Connection-level and busy/locked failures qualify. Data-integrity
    /// errors, decode failures, and missing records are never retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Sqlite(err) => sqlite_is_transient(err),
            Self::TokioSqlite(err) => match err {
                tokio_rusqlite::Error::Rusqlite(inner) => sqlite_is_transient(inner),
                tokio_rusqlite::Error::ConnectionClosed => true,
                _ => false,
            },
            Self::Serialization(_) | Self::InvalidRecord(_) | Self::NotFound => false,
        }
    }
}

/// Busy/locked sqlite failures are contention, not corruption.
fn sqlite_is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(ffi, _)
            if matches!(
                ffi.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

/// Top-level error for conversation pipeline operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Content rejected before entering the pipeline.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The conversation exists but belongs to a different user.
    ///
    /// Rendered as not-found so cross-user existence never leaks.
    #[error("conversation not found")]
    NotOwned,
    /// Storage failed (after the retry budget, when wrapped in `with_retry`).
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience result alias for conversation pipeline operations.
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_is_transient() {
        let ffi = rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY);
        let err = StoreError::Sqlite(rusqlite::Error::SqliteFailure(ffi, None));
        assert!(err.is_transient());
    }

    #[test]
    fn test_not_found_is_not_transient() {
        assert!(!StoreError::NotFound.is_transient());
    }

    #[test]
    fn test_not_owned_renders_as_not_found() {
        assert_eq!(ChatError::NotOwned.to_string(), "conversation not found");
    }
}
