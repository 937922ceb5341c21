//! Typed per-column value indexes.
//!
//! A [`ValueIndex`] is an ordered sequence of `(value, id)` appends with
//! strictly increasing ids, offering predicate lookup as a [`Bitmap`] of
//! matching ids. Every distinct value maps to the bitmap of ids that carry
//! it; ordered kinds keep their values in a `BTreeMap` so that range
//! operators reduce to range scans over the key space.

use crate::bitmap::Bitmap;
use crate::error::{IndexError, Result};
use crate::ops::RelOp;
use crate::{MAX_CONTAINER_ELEMENTS, MAX_STRING_SIZE};
use event_core::collections::BTreeMap;
use event_core::{PortProtocol, Type, TypeKind, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::net::IpAddr;
use std::ops::Bound;
use tracing::warn;

/// `f64` wrapped with a total order, so reals can key a `BTreeMap`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
struct OrderedReal(f64);

impl PartialEq for OrderedReal {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for OrderedReal {}

impl PartialOrd for OrderedReal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedReal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Value-to-bitmap mapping over an ordered key space.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OrdMap<K: Ord> {
    bitmaps: BTreeMap<K, Bitmap>,
}

impl<K: Ord + Clone> OrdMap<K> {
    fn new() -> Self {
        Self {
            bitmaps: BTreeMap::new(),
        }
    }

    fn append(&mut self, key: K, id: u64) {
        self.bitmaps.entry(key).or_default().insert(id);
    }

    fn equal(&self, key: &K) -> Bitmap {
        self.bitmaps.get(key).cloned().unwrap_or_default()
    }

    fn range(&self, lower: Bound<&K>, upper: Bound<&K>) -> Bitmap {
        let mut result = Bitmap::new();
        for (_, bitmap) in self.bitmaps.range((lower, upper)) {
            result |= bitmap;
        }
        result
    }

    fn compare(&self, op: RelOp, key: &K, valid: &Bitmap) -> Option<Bitmap> {
        match op {
            RelOp::Equal => Some(self.equal(key)),
            RelOp::NotEqual => Some(valid - &self.equal(key)),
            RelOp::Less => Some(self.range(Bound::Unbounded, Bound::Excluded(key))),
            RelOp::LessEqual => Some(self.range(Bound::Unbounded, Bound::Included(key))),
            RelOp::Greater => Some(self.range(Bound::Excluded(key), Bound::Unbounded)),
            RelOp::GreaterEqual => Some(self.range(Bound::Included(key), Bound::Unbounded)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BoolIndex {
    truthy: Bitmap,
    falsy: Bitmap,
}

fn protocol_code(protocol: PortProtocol) -> u8 {
    match protocol {
        PortProtocol::Unknown => 0,
        PortProtocol::Tcp => 1,
        PortProtocol::Udp => 2,
        PortProtocol::Icmp => 3,
    }
}

/// The per-kind index implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum IndexImpl {
    Bool(BoolIndex),
    Int(OrdMap<i64>),
    Count(OrdMap<u64>),
    Real(OrdMap<OrderedReal>),
    Span(OrdMap<u64>),
    Timestamp(OrdMap<u64>),
    Str(OrdMap<String>),
    Address(OrdMap<IpAddr>),
    Subnet(OrdMap<(IpAddr, u8)>),
    Port {
        numbers: OrdMap<u16>,
        protocols: OrdMap<u8>,
    },
    Container(Box<IndexImpl>),
}

impl IndexImpl {
    fn make(ty: &Type) -> Result<IndexImpl> {
        let imp = match &ty.kind {
            TypeKind::Bool => IndexImpl::Bool(BoolIndex::default()),
            TypeKind::Int => IndexImpl::Int(OrdMap::new()),
            TypeKind::Count => IndexImpl::Count(OrdMap::new()),
            TypeKind::Real => IndexImpl::Real(OrdMap::new()),
            TypeKind::Span => IndexImpl::Span(OrdMap::new()),
            TypeKind::Timestamp => IndexImpl::Timestamp(OrdMap::new()),
            TypeKind::Str | TypeKind::Pattern => IndexImpl::Str(OrdMap::new()),
            TypeKind::Address => IndexImpl::Address(OrdMap::new()),
            TypeKind::Subnet => IndexImpl::Subnet(OrdMap::new()),
            TypeKind::Port => IndexImpl::Port {
                numbers: OrdMap::new(),
                protocols: OrdMap::new(),
            },
            TypeKind::Vector(elem) | TypeKind::Set(elem) => {
                IndexImpl::Container(Box::new(IndexImpl::make(elem)?))
            }
            // Maps are indexed by key; `k in m` is the natural predicate.
            TypeKind::Map(key, _) => IndexImpl::Container(Box::new(IndexImpl::make(key)?)),
            TypeKind::Record(_) => {
                return Err(IndexError::InitFailure(format!(
                    "cannot build a value index for non-leaf type {}",
                    ty
                )))
            }
        };
        Ok(imp)
    }

    fn name(&self) -> &'static str {
        match self {
            IndexImpl::Bool(_) => "bool",
            IndexImpl::Int(_) => "int",
            IndexImpl::Count(_) => "count",
            IndexImpl::Real(_) => "real",
            IndexImpl::Span(_) => "span",
            IndexImpl::Timestamp(_) => "timestamp",
            IndexImpl::Str(_) => "string",
            IndexImpl::Address(_) => "address",
            IndexImpl::Subnet(_) => "subnet",
            IndexImpl::Port { .. } => "port",
            IndexImpl::Container(_) => "container",
        }
    }

    fn append(&mut self, value: &Value, id: u64) -> bool {
        match (self, value) {
            (IndexImpl::Bool(index), Value::Bool(x)) => {
                if *x {
                    index.truthy.insert(id);
                } else {
                    index.falsy.insert(id);
                }
            }
            (IndexImpl::Int(index), Value::Int(x)) => index.append(*x, id),
            (IndexImpl::Count(index), Value::Count(x)) => index.append(*x, id),
            (IndexImpl::Real(index), Value::Real(x)) => index.append(OrderedReal(*x), id),
            (IndexImpl::Span(index), Value::Span(x)) => index.append(x.get(), id),
            (IndexImpl::Timestamp(index), Value::Timestamp(x)) => index.append(x.get(), id),
            (IndexImpl::Str(index), Value::Str(x)) | (IndexImpl::Str(index), Value::Pattern(x)) => {
                index.append(truncate(x), id)
            }
            (IndexImpl::Address(index), Value::Address(x)) => index.append(*x, id),
            (IndexImpl::Subnet(index), Value::Subnet(x)) => {
                index.append((x.network, x.prefix), id)
            }
            (IndexImpl::Port { numbers, protocols }, Value::Port { number, protocol }) => {
                numbers.append(*number, id);
                protocols.append(protocol_code(*protocol), id);
            }
            (IndexImpl::Container(element), Value::Vector(xs))
            | (IndexImpl::Container(element), Value::Set(xs)) => {
                for x in xs.iter().take(MAX_CONTAINER_ELEMENTS) {
                    element.append(x, id);
                }
            }
            (IndexImpl::Container(element), Value::Map(xs)) => {
                for (k, _) in xs.iter().take(MAX_CONTAINER_ELEMENTS) {
                    element.append(k, id);
                }
            }
            _ => return false,
        }
        true
    }

    fn unsupported(&self, op: RelOp) -> IndexError {
        IndexError::UnsupportedOperator {
            op,
            index: self.name(),
        }
    }

    fn lookup(&self, op: RelOp, rhs: &Value, valid: &Bitmap) -> Result<Bitmap> {
        // Membership against an explicit value list unions per-element
        // equality, uniformly for every index kind.
        if let (RelOp::In | RelOp::NotIn, Value::Vector(xs) | Value::Set(xs)) = (op, rhs) {
            let mut result = Bitmap::new();
            for x in xs {
                result |= self.lookup(RelOp::Equal, x, valid)?;
            }
            return Ok(match op {
                RelOp::In => result,
                _ => valid - &result,
            });
        }
        match self {
            IndexImpl::Bool(index) => match (op, rhs) {
                (RelOp::Equal, Value::Bool(true)) | (RelOp::NotEqual, Value::Bool(false)) => {
                    Ok(index.truthy.clone())
                }
                (RelOp::Equal, Value::Bool(false)) | (RelOp::NotEqual, Value::Bool(true)) => {
                    Ok(index.falsy.clone())
                }
                _ => Err(self.unsupported(op)),
            },
            IndexImpl::Int(index) => match rhs {
                Value::Int(x) => index
                    .compare(op, x, valid)
                    .ok_or_else(|| self.unsupported(op)),
                _ => Err(self.unsupported(op)),
            },
            IndexImpl::Count(index) => match rhs {
                Value::Count(x) => index
                    .compare(op, x, valid)
                    .ok_or_else(|| self.unsupported(op)),
                _ => Err(self.unsupported(op)),
            },
            IndexImpl::Real(index) => match rhs {
                Value::Real(x) => index
                    .compare(op, &OrderedReal(*x), valid)
                    .ok_or_else(|| self.unsupported(op)),
                _ => Err(self.unsupported(op)),
            },
            IndexImpl::Span(index) => match rhs {
                Value::Span(x) => index
                    .compare(op, &x.get(), valid)
                    .ok_or_else(|| self.unsupported(op)),
                _ => Err(self.unsupported(op)),
            },
            IndexImpl::Timestamp(index) => match rhs {
                Value::Timestamp(x) => index
                    .compare(op, &x.get(), valid)
                    .ok_or_else(|| self.unsupported(op)),
                _ => Err(self.unsupported(op)),
            },
            IndexImpl::Str(index) => match (op, rhs) {
                (RelOp::Match, Value::Pattern(pattern))
                | (RelOp::NotMatch, Value::Pattern(pattern)) => {
                    let re = regex::Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                        IndexError::Unspecified(format!("invalid pattern {:?}: {}", pattern, e))
                    })?;
                    let mut result = Bitmap::new();
                    for (key, bitmap) in &index.bitmaps {
                        if re.is_match(key) {
                            result |= bitmap;
                        }
                    }
                    Ok(match op {
                        RelOp::Match => result,
                        _ => valid - &result,
                    })
                }
                (RelOp::In, Value::Str(haystack)) | (RelOp::NotIn, Value::Str(haystack)) => {
                    // `x in "haystack"`: the stored value is a substring.
                    let mut result = Bitmap::new();
                    for (key, bitmap) in &index.bitmaps {
                        if haystack.contains(key.as_str()) {
                            result |= bitmap;
                        }
                    }
                    Ok(match op {
                        RelOp::In => result,
                        _ => valid - &result,
                    })
                }
                (_, Value::Str(x)) => index
                    .compare(op, &truncate(x), valid)
                    .ok_or_else(|| self.unsupported(op)),
                _ => Err(self.unsupported(op)),
            },
            IndexImpl::Address(index) => match (op, rhs) {
                (RelOp::Equal, Value::Address(x)) | (RelOp::NotEqual, Value::Address(x)) => index
                    .compare(op, x, valid)
                    .ok_or_else(|| self.unsupported(op)),
                (RelOp::In, Value::Subnet(net)) | (RelOp::NotIn, Value::Subnet(net)) => {
                    let mut result = Bitmap::new();
                    for (addr, bitmap) in &index.bitmaps {
                        if net.contains(addr) {
                            result |= bitmap;
                        }
                    }
                    Ok(match op {
                        RelOp::In => result,
                        _ => valid - &result,
                    })
                }
                _ => Err(self.unsupported(op)),
            },
            IndexImpl::Subnet(index) => match (op, rhs) {
                (RelOp::Equal, Value::Subnet(x)) | (RelOp::NotEqual, Value::Subnet(x)) => index
                    .compare(op, &(x.network, x.prefix), valid)
                    .ok_or_else(|| self.unsupported(op)),
                (RelOp::In, Value::Subnet(outer)) | (RelOp::NotIn, Value::Subnet(outer)) => {
                    let mut result = Bitmap::new();
                    for ((network, prefix), bitmap) in &index.bitmaps {
                        let stored = event_core::Subnet::new(*network, *prefix);
                        if outer.contains_subnet(&stored) {
                            result |= bitmap;
                        }
                    }
                    Ok(match op {
                        RelOp::In => result,
                        _ => valid - &result,
                    })
                }
                _ => Err(self.unsupported(op)),
            },
            IndexImpl::Port { numbers, protocols } => match rhs {
                Value::Port { number, protocol } => {
                    let by_number = numbers
                        .compare(op, number, valid)
                        .ok_or_else(|| self.unsupported(op))?;
                    // The protocol qualifies equality only; an unknown
                    // protocol on the query side matches any.
                    match (op, protocol) {
                        (RelOp::Equal, p) if *p != PortProtocol::Unknown => {
                            Ok(by_number & protocols.equal(&protocol_code(*p)))
                        }
                        _ => Ok(by_number),
                    }
                }
                _ => Err(self.unsupported(op)),
            },
            IndexImpl::Container(element) => match op {
                RelOp::In => element.lookup(RelOp::Equal, rhs, valid),
                RelOp::NotIn => Ok(valid - &element.lookup(RelOp::Equal, rhs, valid)?),
                _ => Err(self.unsupported(op)),
            },
        }
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_STRING_SIZE {
        return s.to_string();
    }
    let mut end = MAX_STRING_SIZE;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// A persistent, typed value index for one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueIndex {
    offset: u64,
    valid: Bitmap,
    imp: IndexImpl,
}

impl ValueIndex {
    /// Construct an empty index for leaf values of the given type.
    pub fn make(ty: &Type) -> Result<ValueIndex> {
        Ok(ValueIndex {
            offset: 0,
            valid: Bitmap::new(),
            imp: IndexImpl::make(ty)?,
        })
    }

    /// Short name of the index kind, used as the persistent type tag.
    pub fn kind(&self) -> &'static str {
        self.imp.name()
    }

    /// One past the largest id ever appended.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Append a value under the given id.
    ///
    /// Requires `id >= offset()`; gaps fill implicitly by extending the id
    /// domain. A value whose kind does not fit the index is dropped with a
    /// warning; the id domain still advances.
    pub fn append(&mut self, value: &Value, id: u64) -> Result<()> {
        if id < self.offset {
            return Err(IndexError::Unspecified(format!(
                "non-monotonic append: id {} below offset {}",
                id, self.offset
            )));
        }
        if self.imp.append(value, id) {
            self.valid.insert(id);
        } else {
            warn!(
                "dropping {} value at id {} from {} index",
                value.kind(),
                id,
                self.imp.name()
            );
        }
        self.offset = id + 1;
        Ok(())
    }

    /// Evaluate `column op rhs` over all appended ids.
    ///
    /// Deterministic and side-effect free; the result only contains ids in
    /// `[0, offset())`.
    pub fn lookup(&self, op: RelOp, rhs: &Value) -> Result<Bitmap> {
        self.imp.lookup(op, rhs, &self.valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_core::{Span, Subnet, Timestamp};

    fn count_index(values: &[u64]) -> ValueIndex {
        let mut index = ValueIndex::make(&Type::count()).unwrap();
        for (id, value) in values.iter().enumerate() {
            index.append(&Value::Count(*value), id as u64).unwrap();
        }
        index
    }

    #[test]
    fn equality_and_ranges() {
        let index = count_index(&[5, 10, 5, 7]);
        assert_eq!(
            index.lookup(RelOp::Equal, &Value::Count(5)).unwrap(),
            Bitmap::from_sorted_iter([0, 2]).unwrap()
        );
        assert_eq!(
            index.lookup(RelOp::Less, &Value::Count(7)).unwrap(),
            Bitmap::from_sorted_iter([0, 2]).unwrap()
        );
        assert_eq!(
            index.lookup(RelOp::GreaterEqual, &Value::Count(7)).unwrap(),
            Bitmap::from_sorted_iter([1, 3]).unwrap()
        );
        assert_eq!(
            index.lookup(RelOp::NotEqual, &Value::Count(5)).unwrap(),
            Bitmap::from_sorted_iter([1, 3]).unwrap()
        );
    }

    #[test]
    fn monotone_offset_and_gaps() {
        let mut index = ValueIndex::make(&Type::count()).unwrap();
        index.append(&Value::Count(1), 3).unwrap();
        assert_eq!(index.offset(), 4);
        assert!(index.append(&Value::Count(2), 2).is_err());
        index.append(&Value::Count(2), 10).unwrap();
        assert_eq!(index.offset(), 11);
        // The gap ids match nothing.
        let hits = index.lookup(RelOp::Greater, &Value::Count(0)).unwrap();
        assert_eq!(hits, Bitmap::from_sorted_iter([3, 10]).unwrap());
    }

    #[test]
    fn membership_over_value_lists() {
        let index = count_index(&[1, 2, 3, 4]);
        let list = Value::Set(vec![Value::Count(2), Value::Count(4)]);
        assert_eq!(
            index.lookup(RelOp::In, &list).unwrap(),
            Bitmap::from_sorted_iter([1, 3]).unwrap()
        );
        assert_eq!(
            index.lookup(RelOp::NotIn, &list).unwrap(),
            Bitmap::from_sorted_iter([0, 2]).unwrap()
        );
    }

    #[test]
    fn string_truncation_applies_to_both_sides() {
        let mut index = ValueIndex::make(&Type::string()).unwrap();
        let long = "x".repeat(MAX_STRING_SIZE + 100);
        index.append(&Value::Str(long.clone()), 0).unwrap();
        index.append(&Value::from("short"), 1).unwrap();
        let hits = index.lookup(RelOp::Equal, &Value::Str(long)).unwrap();
        assert_eq!(hits, Bitmap::from_sorted_iter([0]).unwrap());
    }

    #[test]
    fn string_pattern_match() {
        let mut index = ValueIndex::make(&Type::string()).unwrap();
        for (id, s) in ["http", "https", "dns"].iter().enumerate() {
            index.append(&Value::from(*s), id as u64).unwrap();
        }
        let hits = index
            .lookup(RelOp::Match, &Value::Pattern("http.*".into()))
            .unwrap();
        assert_eq!(hits, Bitmap::from_sorted_iter([0, 1]).unwrap());
        let misses = index
            .lookup(RelOp::NotMatch, &Value::Pattern("http.*".into()))
            .unwrap();
        assert_eq!(misses, Bitmap::from_sorted_iter([2]).unwrap());
    }

    #[test]
    fn address_cidr_containment() {
        let mut index = ValueIndex::make(&Type::address()).unwrap();
        for (id, addr) in ["10.0.0.1", "10.0.1.1", "192.168.0.1"].iter().enumerate() {
            index
                .append(&Value::Address(addr.parse().unwrap()), id as u64)
                .unwrap();
        }
        let net = Value::Subnet(Subnet::new("10.0.0.0".parse().unwrap(), 16));
        assert_eq!(
            index.lookup(RelOp::In, &net).unwrap(),
            Bitmap::from_sorted_iter([0, 1]).unwrap()
        );
    }

    #[test]
    fn container_membership() {
        let mut index = ValueIndex::make(&Type::vector(Type::count())).unwrap();
        index
            .append(&Value::Vector(vec![Value::Count(1), Value::Count(2)]), 0)
            .unwrap();
        index
            .append(&Value::Vector(vec![Value::Count(3)]), 1)
            .unwrap();
        assert_eq!(
            index.lookup(RelOp::In, &Value::Count(2)).unwrap(),
            Bitmap::from_sorted_iter([0]).unwrap()
        );
        assert_eq!(
            index.lookup(RelOp::NotIn, &Value::Count(2)).unwrap(),
            Bitmap::from_sorted_iter([1]).unwrap()
        );
        assert!(index.lookup(RelOp::Less, &Value::Count(2)).is_err());
    }

    #[test]
    fn unsupported_operator_errors() {
        let mut index = ValueIndex::make(&Type::bool_()).unwrap();
        index.append(&Value::Bool(true), 0).unwrap();
        let err = index.lookup(RelOp::Less, &Value::Bool(false)).unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedOperator { .. }));
    }

    #[test]
    fn timestamp_and_span_ranges() {
        let mut index = ValueIndex::make(&Type::timestamp()).unwrap();
        for id in 0..4u64 {
            index
                .append(&Value::Timestamp(Timestamp::new(1000 * id)), id)
                .unwrap();
        }
        let hits = index
            .lookup(RelOp::Greater, &Value::Timestamp(Timestamp::new(1500)))
            .unwrap();
        assert_eq!(hits, Bitmap::from_sorted_iter([2, 3]).unwrap());

        let mut spans = ValueIndex::make(&Type::span()).unwrap();
        spans.append(&Value::Span(Span::from_secs(1)), 0).unwrap();
        spans.append(&Value::Span(Span::from_secs(3)), 1).unwrap();
        let hits = spans
            .lookup(RelOp::LessEqual, &Value::Span(Span::from_secs(2)))
            .unwrap();
        assert_eq!(hits, Bitmap::from_sorted_iter([0]).unwrap());
    }

    #[test]
    fn lookup_results_survive_serialization() {
        let index = count_index(&[5, 10, 5, 7]);
        let bytes = bincode::serialize(&index).unwrap();
        let restored: ValueIndex = bincode::deserialize(&bytes).unwrap();
        for op in [RelOp::Equal, RelOp::Less, RelOp::GreaterEqual] {
            assert_eq!(
                index.lookup(op, &Value::Count(7)).unwrap(),
                restored.lookup(op, &Value::Count(7)).unwrap()
            );
        }
        assert_eq!(index.offset(), restored.offset());
    }
}
