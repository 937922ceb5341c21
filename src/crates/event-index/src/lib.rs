//! Indexing functionality for telemetry-event partitions.
//!
//! This crate provides:
//! - Compressed bitmaps over 64-bit event ids
//! - Per-column value indexes with typed predicate lookup
//! - Table indexers and bounded-size partitions
//! - The meta index that prunes candidate partitions per expression
//! - Versioned on-disk blobs for all persistent state

pub mod error;
pub use error::{IndexError, Result};

pub mod bitmap;
pub use bitmap::Bitmap;

pub mod ops;
pub use ops::{evaluate_value, CurriedPredicate, RelOp};

pub mod expr;
pub use expr::{Expression, Extractor, Predicate};

pub mod blob;

pub mod value_index;
pub use value_index::ValueIndex;

pub mod measurement;
pub use measurement::{Measurement, MeasurementSnapshot, MeasurementTimer};

pub mod column_index;
pub use column_index::ColumnIndex;

pub mod table_indexer;
pub use table_indexer::TableIndexer;

pub mod partition;
pub use partition::{Evaluation, EvaluationMap, IndexerHandle, Partition};

pub mod meta_index;
pub use meta_index::MetaIndex;

/// The maximum length of a string before the string index chops it off.
pub const MAX_STRING_SIZE: usize = 1024;

/// The maximum number of elements indexed per container value.
pub const MAX_CONTAINER_ELEMENTS: usize = 256;
