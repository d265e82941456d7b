use crate::common::Value;
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};

/// One component of an index key: the extracted value plus the direction of
/// its key-pattern field.
///
/// Ordering honors the direction, so a `BTreeMap` keyed by [IndexKey] stores
/// entries in index order for mixed-direction compound patterns too.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPart {
    pub value: Value,
    pub descending: bool,
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.descending {
            other.value.cmp(&self.value)
        } else {
            self.value.cmp(&other.value)
        }
    }
}

impl Debug for KeyPart {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.descending {
            write!(f, "{:?} (desc)", self.value)
        } else {
            write!(f, "{:?}", self.value)
        }
    }
}

/// A computed index key: one [KeyPart] per key-pattern field.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct IndexKey {
    pub parts: Vec<KeyPart>,
}

impl IndexKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        IndexKey { parts }
    }

    pub fn values(&self) -> Vec<&Value> {
        self.parts.iter().map(|p| &p.value).collect()
    }

    /// Approximate encoded size, used to enforce the key length cap.
    pub fn byte_size(&self) -> usize {
        self.parts.iter().map(|p| value_byte_size(&p.value)).sum()
    }
}

fn value_byte_size(value: &Value) -> usize {
    match value {
        Value::Null => 1,
        Value::Bool(_) => 1,
        Value::I32(_) => 4,
        Value::I64(_) | Value::F64(_) | Value::DateTime(_) | Value::Id(_) => 8,
        Value::String(s) => s.len() + 1,
        Value::Bytes(b) => b.len() + 1,
        Value::Array(items) => items.iter().map(value_byte_size).sum::<usize>() + 2,
        Value::Document(doc) => doc
            .iter()
            .map(|(k, v)| k.len() + 1 + value_byte_size(v))
            .sum::<usize>()
            + 2,
        Value::Reference { collection, id: _ } => collection.len() + 9,
    }
}

/// Bound on one key-pattern field, expressed over raw (direction-free)
/// values in storage order.
#[derive(Debug, Clone)]
pub enum FieldBound {
    /// No restriction.
    Any,
    /// One of a fixed set of point values (`$eq`, `$in`).
    Points(Vec<Value>),
    /// A half-open or closed interval; the `bool` is bound inclusivity.
    Range {
        min: Option<(Value, bool)>,
        max: Option<(Value, bool)>,
    },
}

impl FieldBound {
    /// Whether an indexed value satisfies the bound.
    ///
    /// NaN is pinned below all numbers in storage order but must not leak
    /// into numeric ranges: a NaN key satisfies a range only when one of
    /// the range endpoints is itself an inclusive NaN.
    pub fn contains(&self, value: &Value) -> bool {
        match self {
            FieldBound::Any => true,
            FieldBound::Points(points) => points.iter().any(|p| p == value),
            FieldBound::Range { min, max } => {
                if value.is_nan() {
                    let nan_endpoint = |endpoint: &Option<(Value, bool)>| {
                        matches!(endpoint, Some((v, true)) if v.is_nan())
                    };
                    return nan_endpoint(min) || nan_endpoint(max);
                }
                if let Some((bound, inclusive)) = min {
                    if bound.is_nan() {
                        // v > NaN / v >= NaN match nothing but NaN itself
                        return false;
                    }
                    match value.cmp(bound) {
                        Ordering::Less => return false,
                        Ordering::Equal if !inclusive => return false,
                        _ => {}
                    }
                }
                if let Some((bound, inclusive)) = max {
                    if bound.is_nan() {
                        return false;
                    }
                    match value.cmp(bound) {
                        Ordering::Greater => return false,
                        Ordering::Equal if !inclusive => return false,
                        _ => {}
                    }
                }
                true
            }
        }
    }

    /// Rough count of point values, used by the selectivity heuristic.
    pub fn point_count(&self) -> Option<usize> {
        match self {
            FieldBound::Points(points) => Some(points.len()),
            _ => None,
        }
    }
}

/// Bounds over a leading prefix of an index's key pattern.
#[derive(Debug, Clone, Default)]
pub struct IndexBounds {
    pub fields: Vec<FieldBound>,
}

impl IndexBounds {
    pub fn new(fields: Vec<FieldBound>) -> Self {
        IndexBounds { fields }
    }

    /// Whether a full index key satisfies every bounded field.
    pub fn matches_key(&self, key: &IndexKey) -> bool {
        self.fields
            .iter()
            .zip(key.parts.iter())
            .all(|(bound, part)| bound.contains(&part.value))
    }

    /// Number of leading fields constrained by a non-`Any` bound.
    pub fn constrained_prefix_len(&self) -> usize {
        self.fields
            .iter()
            .take_while(|b| !matches!(b, FieldBound::Any))
            .count()
    }
}
