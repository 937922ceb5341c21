//! Bounded-size units of indexing.
//!
//! A partition owns a directory on disk, a capacity in events, and one
//! [`TableIndexer`] per record layout it has seen. Expression evaluation
//! resolves ("tailors") an expression against every known layout, yielding
//! the evaluation map consumed by the evaluator.

use crate::blob;
use crate::error::{IndexError, Result};
use crate::expr::{Expression, Extractor};
use crate::ops::{evaluate_value, CurriedPredicate};
use crate::table_indexer::TableIndexer;
use crate::Bitmap;
use event_core::collections::{BTreeMap, HashMap};
use event_core::{RecordType, TableSlice, TypeKind, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use uuid::Uuid;

const META_TAG: &str = "partition-meta";

/// Persistent partition metadata: the layouts it knows, by digest.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct PartitionMeta {
    pub layouts: BTreeMap<String, RecordType>,
}

/// A handle to the index state answering one predicate.
///
/// Either a concrete column index inside this partition, or a constant
/// bitmap captured at resolution time (the `#type` extractor case, which
/// needs no lookup round-trip).
#[derive(Debug, Clone)]
pub enum IndexerHandle {
    Constant(Bitmap),
    Column { layout: String, column: usize },
}

/// One resolved predicate of an expression: its position in the flattened
/// predicate list, the curried predicate, and the indexer answering it.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub position: usize,
    pub predicate: CurriedPredicate,
    pub indexer: IndexerHandle,
}

/// The result of resolving an expression against a partition:
/// `layout → list of resolved predicates`. Layouts resolving nothing are
/// omitted.
pub type EvaluationMap = Vec<(RecordType, Vec<Evaluation>)>;

/// A bounded-size unit of indexing with a unique id and its own directory.
#[derive(Debug)]
pub struct Partition {
    id: Uuid,
    dir: PathBuf,
    capacity: u64,
    events: u64,
    dirty: bool,
    meta: PartitionMeta,
    tables: HashMap<String, TableIndexer>,
}

impl Partition {
    /// Create an in-memory partition rooted at `<db_dir>/<id>`.
    pub fn new(db_dir: &Path, id: Uuid, capacity: u64) -> Partition {
        Partition {
            id,
            dir: db_dir.join(id.to_string()),
            capacity,
            events: 0,
            dirty: false,
            meta: PartitionMeta::default(),
            tables: HashMap::new(),
        }
    }

    /// Load a previously persisted partition from disk.
    pub fn load(db_dir: &Path, id: Uuid, capacity: u64) -> Result<Partition> {
        let mut partition = Partition::new(db_dir, id, capacity);
        partition.init()?;
        Ok(partition)
    }

    /// Read the partition's meta file.
    ///
    /// A missing file yields [`IndexError::NoSuchFile`]; callers may treat
    /// that as "new partition".
    pub fn init(&mut self) -> Result<()> {
        let path = self.meta_file();
        if !path.exists() {
            return Err(IndexError::NoSuchFile(path));
        }
        let (_, meta): (u64, PartitionMeta) = blob::load_tagged(&path, META_TAG)?;
        debug!("loaded partition {} with {} layouts", self.id, meta.layouts.len());
        self.meta = meta;
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn base_dir(&self) -> &Path {
        &self.dir
    }

    fn meta_file(&self) -> PathBuf {
        self.dir.join("meta")
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of events indexed into this partition so far.
    pub fn events(&self) -> u64 {
        self.events
    }

    /// The layouts this partition knows about.
    pub fn layouts(&self) -> Vec<RecordType> {
        self.meta.layouts.values().cloned().collect()
    }

    /// Number of table indexers currently materialized.
    pub fn active_indexers(&self) -> usize {
        self.tables.len()
    }

    /// Union of all row ids indexed by the materialized table indexers.
    ///
    /// This is the id domain negations complement over.
    pub fn row_ids(&self) -> Bitmap {
        let mut result = Bitmap::new();
        for table in self.tables.values() {
            result |= table.row_ids();
        }
        result
    }

    /// Drain all per-column measurements, keyed by `<layout>.<field>`.
    ///
    /// Only columns that saw work since the last drain are reported.
    pub fn drain_measurements(&self) -> Vec<(String, crate::measurement::MeasurementSnapshot)> {
        let mut entries = Vec::new();
        for table in self.tables.values() {
            let layout = table.layout();
            for (column, measurement) in table.measurements().iter().enumerate() {
                let snapshot = measurement.exchange_reset();
                if snapshot.events > 0 {
                    let key = format!("{}.{}", layout.name, layout.fields[column].name);
                    entries.push((key, snapshot));
                }
            }
        }
        entries
    }

    fn get_or_add(&mut self, layout: &RecordType) -> Result<&mut TableIndexer> {
        let digest = layout.digest();
        if !self.tables.contains_key(&digest) {
            let table = TableIndexer::make(&self.dir, layout.clone())?;
            if !self.meta.layouts.contains_key(&digest) {
                self.meta.layouts.insert(digest.clone(), layout.clone());
                self.dirty = true;
            }
            self.tables.insert(digest.clone(), table);
        }
        Ok(self.tables.get_mut(&digest).expect("just inserted"))
    }

    /// Route a slice to the table indexer of its layout, creating it lazily.
    pub fn add(&mut self, slice: &TableSlice) -> Result<()> {
        let rows = slice.rows();
        self.get_or_add(slice.layout())?.add(slice)?;
        self.events += rows;
        Ok(())
    }

    /// Persist the meta file (when dirty), then flush every table indexer.
    pub fn flush_to_disk(&mut self) -> Result<()> {
        if self.dirty {
            std::fs::create_dir_all(&self.dir)?;
            blob::save(&self.meta_file(), META_TAG, 0, &self.meta)?;
            self.dirty = false;
        }
        for table in self.tables.values_mut() {
            table.flush_to_disk()?;
        }
        Ok(())
    }

    /// Flush one table indexer by digest, for background per-indexer flushes.
    pub fn flush_table(&mut self, digest: &str) -> Result<()> {
        if self.dirty {
            std::fs::create_dir_all(&self.dir)?;
            blob::save(&self.meta_file(), META_TAG, 0, &self.meta)?;
            self.dirty = false;
        }
        match self.tables.get_mut(digest) {
            Some(table) => table.flush_to_disk(),
            None => Err(IndexError::UnknownLayout(digest.to_string())),
        }
    }

    /// Answer one resolved predicate.
    pub fn lookup(&self, handle: &IndexerHandle, predicate: &CurriedPredicate) -> Result<Bitmap> {
        match handle {
            IndexerHandle::Constant(bitmap) => Ok(bitmap.clone()),
            IndexerHandle::Column { layout, column } => {
                let table = self.tables.get(layout).ok_or_else(|| {
                    IndexError::UnknownLayout(layout.clone())
                })?;
                let index = table.lookup_column(*column).ok_or_else(|| {
                    IndexError::Unspecified(format!(
                        "column {} of layout {} has no index",
                        column, layout
                    ))
                })?;
                index.lookup(predicate)
            }
        }
    }

    /// Resolve an expression against every known layout.
    ///
    /// For each layout this binds the expression's predicates to concrete
    /// column indexes. The `#type` extractor short-circuits: a layout whose
    /// name fails the predicate is skipped, otherwise the resolved handle is
    /// a constant over the layout's row ids. The `#timestamp` extractor is
    /// redirected to the column of timestamp type bearing the `timestamp`
    /// attribute; without one the predicate contributes nothing.
    pub fn eval(&mut self, expr: &Expression) -> EvaluationMap {
        let mut result = EvaluationMap::new();
        for layout in self.layouts() {
            let digest = layout.digest();
            if let Err(e) = self.get_or_add(&layout) {
                error!(
                    "failed to initialize table indexer for layout {}: {} \
                     -> query will not execute on the full data set",
                    layout, e
                );
                continue;
            }
            let mut evaluations = Vec::new();
            let mut skip_layout = false;
            for (position, pred) in expr.predicates().into_iter().enumerate() {
                let indexer = match &pred.lhs {
                    Extractor::Type => {
                        let name = Value::Str(layout.name.clone());
                        if !evaluate_value(&name, pred.op, &pred.rhs) {
                            skip_layout = true;
                            break;
                        }
                        // The answer is known immediately: all ids of this
                        // layout.
                        let row_ids = self.tables[&digest].row_ids().clone();
                        Some(IndexerHandle::Constant(row_ids))
                    }
                    Extractor::Timestamp => self
                        .resolve_timestamp_column(&layout)
                        .and_then(|column| self.materialize_column(&digest, column)),
                    Extractor::Field(name) => layout
                        .resolve_field(name)
                        .and_then(|column| self.materialize_column(&digest, column)),
                };
                if let Some(indexer) = indexer {
                    evaluations.push(Evaluation {
                        position,
                        predicate: pred.curried(),
                        indexer,
                    });
                }
            }
            if skip_layout || evaluations.is_empty() {
                continue;
            }
            result.push((layout, evaluations));
        }
        result
    }

    fn resolve_timestamp_column(&self, layout: &RecordType) -> Option<usize> {
        let position = layout.fields.iter().position(|f| {
            matches!(f.ty.kind, TypeKind::Timestamp) && f.ty.has_attribute("timestamp")
        });
        if position.is_none() {
            warn!("layout {} has no column with a timestamp attribute", layout);
        }
        position
    }

    fn materialize_column(&mut self, digest: &str, column: usize) -> Option<IndexerHandle> {
        let table = self.tables.get_mut(digest)?;
        if table.skips_column(column) {
            return None;
        }
        match table.indexer_at(column) {
            Ok(_) => Some(IndexerHandle::Column {
                layout: digest.to_string(),
                column,
            }),
            Err(e) => {
                error!(
                    "failed to initialize column index {} of layout {}: {}",
                    column, digest, e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expression;
    use crate::ops::RelOp;
    use event_core::{Attribute, RecordField, TableSlice, Timestamp, Type};
    use tempfile::TempDir;

    fn layout() -> RecordType {
        RecordType::new(
            "flow",
            vec![
                RecordField::new("bytes", Type::count()),
                RecordField::new(
                    "ts",
                    Type::timestamp().attr(Attribute::new("timestamp")),
                ),
                RecordField::new("seen", Type::timestamp()),
            ],
        )
    }

    fn slice(offset: u64, bytes: &[u64]) -> TableSlice {
        TableSlice::new(
            layout(),
            offset,
            bytes
                .iter()
                .enumerate()
                .map(|(i, b)| {
                    vec![
                        Some(Value::Count(*b)),
                        Some(Value::Timestamp(Timestamp::new(1000 + i as u64))),
                        Some(Value::Timestamp(Timestamp::new(9))),
                    ]
                })
                .collect(),
        )
    }

    #[test]
    fn add_records_layout_and_events() {
        let dir = TempDir::new().unwrap();
        let mut partition = Partition::new(dir.path(), Uuid::new_v4(), 100);
        partition.add(&slice(0, &[10, 20])).unwrap();
        assert_eq!(partition.events(), 2);
        assert_eq!(partition.layouts().len(), 1);
        assert_eq!(partition.row_ids().rank(), 2);
    }

    #[test]
    fn init_without_meta_is_no_such_file() {
        let dir = TempDir::new().unwrap();
        let mut partition = Partition::new(dir.path(), Uuid::new_v4(), 100);
        assert!(matches!(
            partition.init().unwrap_err(),
            IndexError::NoSuchFile(_)
        ));
    }

    #[test]
    fn flush_then_load_round_trips_layouts() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let mut partition = Partition::new(dir.path(), id, 100);
        partition.add(&slice(0, &[10, 20, 30])).unwrap();
        partition.flush_to_disk().unwrap();

        let loaded = Partition::load(dir.path(), id, 100).unwrap();
        assert_eq!(loaded.layouts(), partition.layouts());
    }

    #[test]
    fn eval_resolves_fields_and_skips_mismatched_type() {
        let dir = TempDir::new().unwrap();
        let mut partition = Partition::new(dir.path(), Uuid::new_v4(), 100);
        partition.add(&slice(0, &[10, 20])).unwrap();

        let expr = Expression::field("bytes", RelOp::Equal, 10u64);
        let map = partition.eval(&expr);
        assert_eq!(map.len(), 1);
        assert_eq!(map[0].1.len(), 1);
        assert!(matches!(
            map[0].1[0].indexer,
            IndexerHandle::Column { column: 0, .. }
        ));

        // A #type predicate that cannot match skips the layout.
        let expr = Expression::type_(RelOp::Equal, "dns");
        assert!(partition.eval(&expr).is_empty());

        // A matching #type predicate yields a constant over the row ids.
        let expr = Expression::type_(RelOp::Equal, "flow");
        let map = partition.eval(&expr);
        assert_eq!(map.len(), 1);
        match &map[0].1[0].indexer {
            IndexerHandle::Constant(bitmap) => assert_eq!(bitmap.rank(), 2),
            other => panic!("expected constant handle, got {:?}", other),
        }
    }

    #[test]
    fn timestamp_extractor_targets_the_tagged_column() {
        let dir = TempDir::new().unwrap();
        let mut partition = Partition::new(dir.path(), Uuid::new_v4(), 100);
        partition.add(&slice(0, &[10])).unwrap();

        let expr = Expression::timestamp(
            RelOp::Greater,
            Value::Timestamp(Timestamp::new(0)),
        );
        let map = partition.eval(&expr);
        assert_eq!(map.len(), 1);
        // Column 1 bears the attribute; column 2 is a plain timestamp.
        assert!(matches!(
            map[0].1[0].indexer,
            IndexerHandle::Column { column: 1, .. }
        ));
    }

    #[test]
    fn lookup_through_handles() {
        let dir = TempDir::new().unwrap();
        let mut partition = Partition::new(dir.path(), Uuid::new_v4(), 100);
        partition.add(&slice(0, &[10, 20, 10])).unwrap();

        let expr = Expression::field("bytes", RelOp::Equal, 10u64);
        let map = partition.eval(&expr);
        let evaluation = &map[0].1[0];
        let hits = partition
            .lookup(&evaluation.indexer, &evaluation.predicate)
            .unwrap();
        assert_eq!(hits.iter().collect::<Vec<_>>(), vec![0, 2]);
    }
}
