//! A value index bound to one column file on disk.

use crate::blob;
use crate::error::{IndexError, Result};
use crate::ops::CurriedPredicate;
use crate::value_index::ValueIndex;
use crate::Bitmap;
use event_core::{TableSlice, Type, Value};
use std::path::PathBuf;
use tracing::debug;

/// What a column index feeds on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    /// A concrete cell position of the layout.
    Data { position: usize },
    /// The synthetic type column: appends the layout name for every row,
    /// enabling persistent `#type == x` predicates.
    TypeColumn,
}

/// One column's typed value index plus its persistent file handle and flush
/// bookkeeping.
#[derive(Debug)]
pub struct ColumnIndex {
    column_type: Type,
    path: PathBuf,
    kind: ColumnKind,
    index: ValueIndex,
    last_flush: u64,
}

impl ColumnIndex {
    /// Create a column index for a data column, loading persistent state when
    /// the backing file exists.
    pub fn make_data(path: PathBuf, column_type: Type, position: usize) -> Result<ColumnIndex> {
        Self::init(path, column_type, ColumnKind::Data { position })
    }

    /// Create the type column index for a layout.
    pub fn make_type_column(path: PathBuf) -> Result<ColumnIndex> {
        Self::init(path, Type::string(), ColumnKind::TypeColumn)
    }

    fn init(path: PathBuf, column_type: Type, kind: ColumnKind) -> Result<ColumnIndex> {
        let empty = ValueIndex::make(&column_type)?;
        let expected_tag = empty.kind();
        let (index, last_flush) = if path.exists() {
            let (header, index): (blob::BlobHeader, ValueIndex) = blob::load(&path)?;
            if header.tag != expected_tag {
                return Err(IndexError::InitFailure(format!(
                    "column file {} holds a {} index, declared type {} needs {}",
                    path.display(),
                    header.tag,
                    column_type,
                    expected_tag
                )));
            }
            debug!(
                "loaded value index from {} with offset {}",
                path.display(),
                index.offset()
            );
            (index, header.last_flush)
        } else {
            (empty, 0)
        };
        Ok(ColumnIndex {
            column_type,
            path,
            kind,
            index,
            last_flush,
        })
    }

    /// The declared type of the indexed column.
    pub fn column_type(&self) -> &Type {
        &self.column_type
    }

    /// One past the largest id appended so far.
    pub fn offset(&self) -> u64 {
        self.index.offset()
    }

    /// Whether appends happened since the last successful flush.
    pub fn dirty(&self) -> bool {
        self.index.offset() != self.last_flush
    }

    /// Index all rows of a slice.
    ///
    /// Data columns append each non-null cell under its global id; the type
    /// column appends the layout name for every row.
    pub fn add(&mut self, slice: &TableSlice) -> Result<()> {
        let offset = slice.offset();
        match self.kind {
            ColumnKind::Data { position } => {
                for row in 0..slice.rows() {
                    if let Some(value) = slice.at(row, position) {
                        self.index.append(value, offset + row)?;
                    }
                }
            }
            ColumnKind::TypeColumn => {
                let name = Value::Str(slice.layout().name.clone());
                for row in 0..slice.rows() {
                    self.index.append(&name, offset + row)?;
                }
            }
        }
        Ok(())
    }

    /// Evaluate a curried predicate against the index.
    pub fn lookup(&self, predicate: &CurriedPredicate) -> Result<Bitmap> {
        self.index.lookup(predicate.op, &predicate.rhs)
    }

    /// Persist the index if it changed since the last flush.
    ///
    /// Returns `true` when a write happened. A flush at an unchanged offset
    /// touches no files.
    pub fn flush_to_disk(&mut self) -> Result<bool> {
        let offset = self.index.offset();
        if offset == self.last_flush {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!(
            "flushing index {} ({}/{} new/total ids)",
            self.path.display(),
            offset - self.last_flush,
            offset
        );
        self.last_flush = offset;
        blob::save(&self.path, self.index.kind(), self.last_flush, &self.index)?;
        Ok(true)
    }
}
