//! The process-wide meta index that narrows queries to candidate partitions.
//!
//! Per partition it keeps a compact [`PartitionSynopsis`]: the set of layout
//! names, a per-field pruning structure, and the covered time range. Lookups
//! walk arbitrary AND/OR/NOT expressions and return every partition that
//! cannot be excluded. False positives are allowed; false negatives are not.

use crate::expr::{Expression, Extractor, Predicate};
use crate::ops::{evaluate_value, RelOp};
use crate::MAX_STRING_SIZE;
use event_core::collections::{HashMap, HashSet};
use event_core::{TableSlice, TypeKind, Value};
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use twox_hash::XxHash64;
use uuid::Uuid;

/// Distinct values tracked per field before the synopsis degrades to "cannot
/// exclude".
const SYNOPSIS_CAP: usize = 1024;

fn value_digest(value: &Value) -> Option<u64> {
    let rendered = match value {
        Value::Str(s) => {
            // Digests cover the same truncated form the string index stores.
            let mut end = s.len().min(MAX_STRING_SIZE);
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            format!("s:{}", &s[..end])
        }
        Value::Address(a) => format!("a:{}", a),
        _ => return None,
    };
    let mut hasher = XxHash64::default();
    hasher.write(rendered.as_bytes());
    Some(hasher.finish())
}

/// Pruning structure for one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum FieldSynopsis {
    /// Minimum and maximum observed value of an ordered kind.
    Range { min: Value, max: Value },
    /// Bounded set of value digests (strings, addresses).
    Digests(HashSet<u64>),
    /// The field carries values this synopsis cannot reason about.
    Any,
}

impl FieldSynopsis {
    fn for_value(value: &Value) -> FieldSynopsis {
        match value {
            Value::Int(_)
            | Value::Count(_)
            | Value::Real(_)
            | Value::Span(_)
            | Value::Timestamp(_)
            | Value::Port { .. } => FieldSynopsis::Range {
                min: value.clone(),
                max: value.clone(),
            },
            Value::Str(_) | Value::Address(_) => {
                let mut hashes = HashSet::new();
                if let Some(digest) = value_digest(value) {
                    hashes.insert(digest);
                }
                FieldSynopsis::Digests(hashes)
            }
            _ => FieldSynopsis::Any,
        }
    }

    fn update(&mut self, value: &Value) {
        match self {
            FieldSynopsis::Range { min, max } => {
                if value.partial_cmp_same(min).is_none() {
                    // Kind changed under us; give up on this field.
                    *self = FieldSynopsis::Any;
                    return;
                }
                if evaluate_value(value, RelOp::Less, min) {
                    *min = value.clone();
                }
                if evaluate_value(value, RelOp::Greater, max) {
                    *max = value.clone();
                }
            }
            FieldSynopsis::Digests(hashes) => match value_digest(value) {
                Some(digest) => {
                    hashes.insert(digest);
                    if hashes.len() > SYNOPSIS_CAP {
                        *self = FieldSynopsis::Any;
                    }
                }
                None => *self = FieldSynopsis::Any,
            },
            FieldSynopsis::Any => {}
        }
    }

    /// Whether a row satisfying `op rhs` could exist given this synopsis.
    fn might_match(&self, op: RelOp, rhs: &Value) -> bool {
        if let (RelOp::In, Value::Vector(xs) | Value::Set(xs)) = (op, rhs) {
            return xs.iter().any(|x| self.might_match(RelOp::Equal, x));
        }
        match self {
            FieldSynopsis::Range { min, max } => match op {
                RelOp::Equal => {
                    evaluate_value(rhs, RelOp::GreaterEqual, min)
                        && evaluate_value(rhs, RelOp::LessEqual, max)
                }
                RelOp::Less => evaluate_value(min, RelOp::Less, rhs),
                RelOp::LessEqual => evaluate_value(min, RelOp::LessEqual, rhs),
                RelOp::Greater => evaluate_value(max, RelOp::Greater, rhs),
                RelOp::GreaterEqual => evaluate_value(max, RelOp::GreaterEqual, rhs),
                _ => true,
            },
            FieldSynopsis::Digests(hashes) => match op {
                RelOp::Equal => match value_digest(rhs) {
                    Some(digest) => hashes.contains(&digest),
                    None => true,
                },
                _ => true,
            },
            FieldSynopsis::Any => true,
        }
    }
}

/// Compact per-partition summary used for pruning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionSynopsis {
    layouts: HashSet<String>,
    fields: HashMap<String, FieldSynopsis>,
    time_range: Option<(u64, u64)>,
}

impl PartitionSynopsis {
    fn add(&mut self, slice: &TableSlice) {
        let layout = slice.layout().clone();
        self.layouts.insert(layout.name.clone());
        let timestamp_column = layout
            .fields
            .iter()
            .position(|f| matches!(f.ty.kind, TypeKind::Timestamp) && f.ty.has_attribute("timestamp"));
        for (column, field) in layout.fields.iter().enumerate() {
            let qualified = format!("{}.{}", layout.name, field.name);
            for row in 0..slice.rows() {
                let Some(value) = slice.at(row, column) else {
                    continue;
                };
                for key in [field.name.as_str(), qualified.as_str()] {
                    self.fields
                        .entry(key.to_string())
                        .and_modify(|s| s.update(value))
                        .or_insert_with(|| FieldSynopsis::for_value(value));
                }
                if timestamp_column == Some(column) {
                    if let Value::Timestamp(ts) = value {
                        let us = ts.get();
                        self.time_range = Some(match self.time_range {
                            Some((lo, hi)) => (lo.min(us), hi.max(us)),
                            None => (us, us),
                        });
                    }
                }
            }
        }
    }

    fn might_match_predicate(&self, pred: &Predicate) -> bool {
        match &pred.lhs {
            Extractor::Type => match (pred.op, &pred.rhs) {
                (RelOp::Equal, Value::Str(name)) => self.layouts.contains(name),
                (RelOp::In, Value::Vector(xs)) | (RelOp::In, Value::Set(xs)) => {
                    xs.iter().any(|x| match x {
                        Value::Str(name) => self.layouts.contains(name),
                        _ => true,
                    })
                }
                (RelOp::Match, Value::Pattern(_)) => {
                    let rhs = pred.rhs.clone();
                    self.layouts
                        .iter()
                        .any(|name| evaluate_value(&Value::Str(name.clone()), RelOp::Match, &rhs))
                }
                _ => true,
            },
            Extractor::Timestamp => match (&self.time_range, &pred.rhs) {
                (Some((lo, hi)), Value::Timestamp(ts)) => {
                    let us = ts.get();
                    match pred.op {
                        RelOp::Equal => *lo <= us && us <= *hi,
                        RelOp::Less => *lo < us,
                        RelOp::LessEqual => *lo <= us,
                        RelOp::Greater => *hi > us,
                        RelOp::GreaterEqual => *hi >= us,
                        _ => true,
                    }
                }
                _ => true,
            },
            Extractor::Field(name) => match self.fields.get(name) {
                Some(synopsis) => synopsis.might_match(pred.op, &pred.rhs),
                // No row of this partition ever carried the field.
                None => false,
            },
        }
    }

    fn might_match(&self, expr: &Expression) -> bool {
        match expr {
            Expression::Conjunction(xs) => xs.iter().all(|x| self.might_match(x)),
            Expression::Disjunction(xs) => xs.iter().any(|x| self.might_match(x)),
            // Without a finer structure, negations cannot exclude anything.
            Expression::Negation(_) => true,
            Expression::Predicate(pred) => self.might_match_predicate(pred),
        }
    }
}

/// Maps each partition id to its pruning synopsis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaIndex {
    partitions: HashMap<Uuid, PartitionSynopsis>,
}

impl MetaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incrementally fold a slice into the partition's synopsis.
    pub fn add(&mut self, partition: Uuid, slice: &TableSlice) {
        self.partitions.entry(partition).or_default().add(slice);
    }

    /// All partitions that cannot be excluded for `expr`, in unspecified
    /// order.
    pub fn lookup(&self, expr: &Expression) -> Vec<Uuid> {
        self.partitions
            .iter()
            .filter(|(_, synopsis)| synopsis.might_match(expr))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of partitions tracked.
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}
