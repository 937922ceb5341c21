//! Query and indexing engine for the telemetry-event database.
//!
//! This crate provides the engine layer on top of `event-index`:
//!
//! - **IndexCoordinator**: the top-level state machine receiving ingest
//!   streams, rotating partitions, and dispatching queries
//! - **Query supervisors**: a fixed worker pool driving evaluators
//! - **Evaluator**: per-partition expression evaluation with short-circuit
//!   folding and partial-failure tolerance
//! - **Query result cursor**: credit-based streaming of matching events
//!   through a source → stages → sink pipeline
//! - **Telemetry**: per-column rate reports pushed to an accounting sink
//!
//! The coordinator, each worker, and each evaluator run as independent tokio
//! tasks with typed inboxes; no state is shared across tasks without a
//! message or lock boundary.

pub mod error;
pub use error::{EngineError, Result};

pub mod config;
pub use config::EngineConfig;

pub mod statistics;
pub use statistics::{LayoutStatistics, Statistics};

pub mod cache;
pub use cache::{PartitionCache, PartitionHandle};

pub mod evaluator;
pub use evaluator::evaluate;

pub(crate) mod supervisor;

pub mod coordinator;
pub use coordinator::{
    ClientSender, IndexCoordinator, IndexHandle, PartitionStatus, QueryEvent, QueryHandle,
    QueryResponse, StatusSnapshot,
};

pub mod cursor;
pub use cursor::{
    AccountingStage, BufferedSource, CursorState, EventSink, EventSource, EventStage,
    QueryResultCursor, MAX_CURSOR_CACHE_SIZE,
};

pub mod telemetry;
pub use telemetry::{AccountantRef, Report, ReportEntry};
