//! Immutable, reference-shared batches of event rows.

use crate::types::RecordType;
use crate::value::Value;
use crate::EventId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An immutable batch of rows with a fixed layout and a contiguous id range.
///
/// Row `r` of the slice carries the global event id `offset + r`. Cells may be
/// absent (null). Slices are shared by reference via [`TableSliceHandle`] and
/// never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSlice {
    layout: RecordType,
    offset: EventId,
    rows: Vec<Vec<Option<Value>>>,
}

/// Reference-shared handle to a table slice.
pub type TableSliceHandle = Arc<TableSlice>;

impl TableSlice {
    /// Create a slice from raw rows.
    ///
    /// Every row must have exactly one cell per layout field.
    pub fn new(layout: RecordType, offset: EventId, rows: Vec<Vec<Option<Value>>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == layout.fields.len()));
        Self {
            layout,
            offset,
            rows,
        }
    }

    /// Wrap into a shared handle.
    pub fn into_handle(self) -> TableSliceHandle {
        Arc::new(self)
    }

    pub fn layout(&self) -> &RecordType {
        &self.layout
    }

    /// The id of the first row.
    pub fn offset(&self) -> EventId {
        self.offset
    }

    /// Number of rows in the slice.
    pub fn rows(&self) -> u64 {
        self.rows.len() as u64
    }

    /// Number of columns per row.
    pub fn columns(&self) -> usize {
        self.layout.fields.len()
    }

    /// Positional cell access. Returns `None` for null cells.
    pub fn at(&self, row: u64, column: usize) -> Option<&Value> {
        self.rows
            .get(row as usize)
            .and_then(|r| r.get(column))
            .and_then(|cell| cell.as_ref())
    }

    /// The global id of a row.
    pub fn id_at(&self, row: u64) -> EventId {
        self.offset + row
    }

    /// Materialize one row as an [`Event`].
    pub fn event_at(&self, row: u64) -> Option<Event> {
        self.rows.get(row as usize).map(|r| Event {
            id: self.offset + row,
            layout: self.layout.name.clone(),
            values: r.clone(),
        })
    }
}

/// A fully materialized event, as returned by the storage collaborator and
/// shipped to query sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub layout: String,
    pub values: Vec<Option<Value>>,
}

impl Event {
    pub fn new(id: EventId, layout: impl Into<String>, values: Vec<Option<Value>>) -> Self {
        Self {
            id,
            layout: layout.into(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RecordField, Type};

    fn layout() -> RecordType {
        RecordType::new(
            "test",
            vec![
                RecordField::new("x", Type::count()),
                RecordField::new("s", Type::string()),
            ],
        )
    }

    #[test]
    fn cell_access_and_ids() {
        let slice = TableSlice::new(
            layout(),
            100,
            vec![
                vec![Some(Value::Count(1)), Some(Value::from("a"))],
                vec![Some(Value::Count(2)), None],
            ],
        );
        assert_eq!(slice.rows(), 2);
        assert_eq!(slice.id_at(1), 101);
        assert_eq!(slice.at(0, 1), Some(&Value::from("a")));
        assert_eq!(slice.at(1, 1), None);
        assert_eq!(slice.at(7, 0), None);

        let event = slice.event_at(1).unwrap();
        assert_eq!(event.id, 101);
        assert_eq!(event.layout, "test");
    }
}
