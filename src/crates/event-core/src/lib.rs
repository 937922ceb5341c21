//! Shared data model for the telemetry-event database.
//!
//! This crate provides:
//! - Event ids and id ranges
//! - Time units (timestamps and spans in microseconds)
//! - Runtime values and the structural type system
//! - Immutable, reference-shared table slices

pub mod collections;

pub mod time;
pub use time::{Span, Timestamp};

pub mod value;
pub use value::{PortProtocol, Subnet, Value};

pub mod types;
pub use types::{Attribute, RecordField, RecordType, Type, TypeKind};

pub mod slice;
pub use slice::{Event, TableSlice, TableSliceHandle};

/// A globally unique, monotonically increasing event identifier.
///
/// The ids of a single table slice form the contiguous range
/// `[offset, offset + rows)`.
pub type EventId = u64;

/// Sentinel for an unassigned event id.
pub const INVALID_EVENT_ID: EventId = u64::MAX;
