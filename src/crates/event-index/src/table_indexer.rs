//! Per-layout indexing state inside a partition.

use crate::blob;
use crate::column_index::ColumnIndex;
use crate::error::{IndexError, Result};
use crate::measurement::{Measurement, MeasurementTimer};
use crate::Bitmap;
use event_core::{RecordType, TableSlice};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const ROW_IDS_TAG: &str = "row-ids";

/// Indexes all table slices of one layout within one partition.
///
/// Owns one lazily-allocated column index per non-skip field, the synthetic
/// type column, and the bitmap of row ids belonging to this layout.
#[derive(Debug)]
pub struct TableIndexer {
    layout: RecordType,
    base_dir: PathBuf,
    row_ids: Bitmap,
    dirty: bool,
    skip_mask: Vec<bool>,
    columns: Vec<Option<ColumnIndex>>,
    type_column: ColumnIndex,
    measurements: Vec<Arc<Measurement>>,
}

impl TableIndexer {
    /// Create the indexer for `layout`, restoring row ids from disk when the
    /// partition has been flushed before.
    pub fn make(partition_dir: &Path, layout: RecordType) -> Result<TableIndexer> {
        let base_dir = partition_dir.join(layout.digest());
        let skip_mask: Vec<bool> = layout.fields.iter().map(|f| f.ty.is_skip()).collect();
        let columns = layout.fields.iter().map(|_| None).collect();
        let measurements = layout
            .fields
            .iter()
            .map(|_| Arc::new(Measurement::new()))
            .collect();
        let type_column = ColumnIndex::make_type_column(base_dir.join("data").join("#type"))?;

        let row_ids_file = base_dir.join("row_ids");
        let row_ids = if row_ids_file.exists() {
            let (_, row_ids): (u64, Bitmap) = blob::load_tagged(&row_ids_file, ROW_IDS_TAG)?;
            row_ids
        } else {
            Bitmap::new()
        };

        Ok(TableIndexer {
            layout,
            base_dir,
            row_ids,
            dirty: false,
            skip_mask,
            columns,
            type_column,
            measurements,
        })
    }

    pub fn layout(&self) -> &RecordType {
        &self.layout
    }

    /// The row ids belonging to this layout.
    pub fn row_ids(&self) -> &Bitmap {
        &self.row_ids
    }

    /// Size of the id domain covered so far (one past the largest row id).
    pub fn row_domain(&self) -> u64 {
        self.row_ids.max().map_or(0, |max| max + 1)
    }

    /// Whether `add` ran since the last flush.
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn columns(&self) -> usize {
        self.layout.fields.len()
    }

    pub fn skips_column(&self, column: usize) -> bool {
        self.skip_mask[column]
    }

    /// Per-field measurement probes, drained by the telemetry tick.
    pub fn measurements(&self) -> &[Arc<Measurement>] {
        &self.measurements
    }

    fn column_path(&self, column: usize) -> PathBuf {
        // Dots in field names become path separators.
        let relative = self.layout.fields[column].name.replace('.', "/");
        self.base_dir.join("data").join(relative)
    }

    /// Access the column index at `column`, creating it on first use.
    pub fn indexer_at(&mut self, column: usize) -> Result<&mut ColumnIndex> {
        if self.skip_mask[column] {
            return Err(IndexError::Unspecified(format!(
                "column {} of layout {} is marked skip",
                column, self.layout
            )));
        }
        if self.columns[column].is_none() {
            let field = &self.layout.fields[column];
            let index =
                ColumnIndex::make_data(self.column_path(column), field.ty.clone(), column)?;
            self.columns[column] = Some(index);
        }
        Ok(self.columns[column].as_mut().expect("just initialized"))
    }

    /// Read-only access to an already-allocated column index.
    pub fn lookup_column(&self, column: usize) -> Option<&ColumnIndex> {
        self.columns.get(column).and_then(|c| c.as_ref())
    }

    /// Number of column indexers allocated so far (type column included).
    pub fn active_indexers(&self) -> usize {
        self.columns.iter().filter(|c| c.is_some()).count() + 1
    }

    /// Index one slice of this layout.
    pub fn add(&mut self, slice: &TableSlice) -> Result<()> {
        if *slice.layout() != self.layout {
            return Err(IndexError::UnknownLayout(slice.layout().name.clone()));
        }
        let first = slice.offset();
        let last = first + slice.rows();
        if first < self.row_domain() {
            return Err(IndexError::Unspecified(format!(
                "slice offset {} overlaps indexed rows below {}",
                first,
                self.row_domain()
            )));
        }
        self.row_ids.insert_range(first..last);
        self.dirty = true;

        for column in 0..self.columns() {
            if self.skip_mask[column] {
                continue;
            }
            let measurement = Arc::clone(&self.measurements[column]);
            let timer = MeasurementTimer::start(&measurement);
            self.indexer_at(column)?.add(slice)?;
            timer.stop(slice.rows());
        }
        self.type_column.add(slice)?;
        Ok(())
    }

    /// Persist row ids (when dirty) and flush every allocated column index.
    ///
    /// Column flushes are best-effort: a failing column does not prevent the
    /// others from being attempted; the first error is returned.
    pub fn flush_to_disk(&mut self) -> Result<()> {
        if self.dirty {
            std::fs::create_dir_all(&self.base_dir)?;
            blob::save(
                &self.base_dir.join("row_ids"),
                ROW_IDS_TAG,
                self.row_domain(),
                &self.row_ids,
            )?;
            self.dirty = false;
        }
        let mut first_error = None;
        for column in self.columns.iter_mut().flatten() {
            if let Err(e) = column.flush_to_disk() {
                debug!("column flush failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.type_column.flush_to_disk() {
            first_error.get_or_insert(e);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{CurriedPredicate, RelOp};
    use event_core::{Attribute, RecordField, Type, Value};
    use tempfile::TempDir;

    fn layout() -> RecordType {
        RecordType::new(
            "flow",
            vec![
                RecordField::new("bytes", Type::count()),
                RecordField::new("note", Type::string().attr(Attribute::new("skip"))),
            ],
        )
    }

    fn slice(offset: u64, values: &[u64]) -> TableSlice {
        TableSlice::new(
            layout(),
            offset,
            values
                .iter()
                .map(|b| vec![Some(Value::Count(*b)), Some(Value::from("ignored"))])
                .collect(),
        )
    }

    #[test]
    fn add_extends_row_ids_and_skips_skip_columns() {
        let dir = TempDir::new().unwrap();
        let mut indexer = TableIndexer::make(dir.path(), layout()).unwrap();

        indexer.add(&slice(0, &[1, 2])).unwrap();
        indexer.add(&slice(5, &[3])).unwrap();

        assert_eq!(indexer.row_ids().rank(), 3);
        assert_eq!(indexer.row_domain(), 6);
        assert!(indexer.dirty());
        // The skip column never allocates an index.
        assert!(indexer.lookup_column(1).is_none());
        assert!(indexer.lookup_column(0).is_some());
        assert!(indexer.indexer_at(1).is_err());
    }

    #[test]
    fn rejects_overlapping_and_foreign_slices() {
        let dir = TempDir::new().unwrap();
        let mut indexer = TableIndexer::make(dir.path(), layout()).unwrap();
        indexer.add(&slice(0, &[1, 2])).unwrap();
        assert!(indexer.add(&slice(1, &[3])).is_err());

        let foreign = TableSlice::new(
            RecordType::new("other", vec![RecordField::new("x", Type::count())]),
            10,
            vec![vec![Some(Value::Count(1))]],
        );
        assert!(matches!(
            indexer.add(&foreign).unwrap_err(),
            IndexError::UnknownLayout(_)
        ));
    }

    #[test]
    fn flush_and_reload_row_ids() {
        let dir = TempDir::new().unwrap();
        let mut indexer = TableIndexer::make(dir.path(), layout()).unwrap();
        indexer.add(&slice(0, &[1, 2, 3])).unwrap();
        indexer.flush_to_disk().unwrap();
        assert!(!indexer.dirty());

        let restored = TableIndexer::make(dir.path(), layout()).unwrap();
        assert_eq!(restored.row_ids(), indexer.row_ids());

        // The flushed column index answers lookups after reload.
        let mut restored = restored;
        let column = restored.indexer_at(0).unwrap();
        let hits = column
            .lookup(&CurriedPredicate::new(RelOp::Equal, Value::Count(2)))
            .unwrap();
        assert_eq!(hits.iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn measurements_accumulate_per_column() {
        let dir = TempDir::new().unwrap();
        let mut indexer = TableIndexer::make(dir.path(), layout()).unwrap();
        indexer.add(&slice(0, &[1, 2, 3])).unwrap();
        let snapshot = indexer.measurements()[0].exchange_reset();
        assert_eq!(snapshot.events, 3);
        // The skip column saw no work.
        assert_eq!(indexer.measurements()[1].exchange_reset().events, 0);
    }
}
