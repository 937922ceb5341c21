use crate::ops::RelOp;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during indexing operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Underlying I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted blob carries an unknown tag or version
    #[error("invalid format in {path}: {detail}")]
    InvalidFormat { path: PathBuf, detail: String },

    /// A required file does not exist
    #[error("no such file: {0}")]
    NoSuchFile(PathBuf),

    /// The operator is not supported by the index of this type
    #[error("operator {op} unsupported by {index} index")]
    UnsupportedOperator { op: RelOp, index: &'static str },

    /// A slice was routed to a partition that does not know its layout
    #[error("unknown layout: {0}")]
    UnknownLayout(String),

    /// A component failed to initialize from persistent state
    #[error("initialization failed: {0}")]
    InitFailure(String),

    /// Serialization failure while reading or writing a blob
    #[error("serialization error: {0}")]
    Serialize(#[from] bincode::Error),

    /// Catch-all for conditions without a dedicated kind
    #[error("{0}")]
    Unspecified(String),
}

static_assertions::const_assert!(std::mem::size_of::<IndexError>() <= 64);

pub type Result<T> = std::result::Result<T, IndexError>;
