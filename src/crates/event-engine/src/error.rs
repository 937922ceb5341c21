//! Error types for engine operations.

use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error from the indexing layer
    #[error("index error: {0}")]
    Index(#[from] event_index::IndexError),

    /// I/O error outside the indexing layer
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The request was malformed, e.g. an anonymous query
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A task inbox closed while a request was in flight
    #[error("channel closed")]
    ChannelClosed,

    /// A request did not complete within the configured timeout
    #[error("request timed out")]
    Timeout,

    /// The operation was cancelled, e.g. the coordinator shut down
    #[error("cancelled")]
    Cancelled,
}

static_assertions::const_assert!(std::mem::size_of::<EngineError>() <= 72);

/// A specialized Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
