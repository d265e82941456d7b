use crate::collection::{DocId, Document};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use chrono::{DateTime, TimeZone, Utc};
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;

/// Compare two floats with NaN pinned below every other number.
///
/// This is the *storage* order used by indexes and sorts. Query-level
/// comparison semantics (where NaN is unordered) live in
/// [`Value::compare_in_query`].
#[inline]
fn num_cmp_float(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Compare two floats for equality with NaN equal only to NaN.
#[inline]
fn num_eq_float(a: f64, b: f64) -> bool {
    if a.is_nan() && b.is_nan() {
        true
    } else {
        a == b
    }
}

/// Represents a [Document] value. It can be a simple value like [Value::I64]
/// or [Value::String], or a complex value like [Value::Document] or
/// [Value::Array].
///
/// # Characteristics
/// - **Comparable**: implements a total `Ord` used for index keys and sorts.
///   Values of different types order by a fixed type rank; numeric variants
///   compare across widths, with NaN pinned below all other numbers.
/// - **Hashable**: numeric variants hash canonically so `I32(1)`, `I64(1)`
///   and `F64(1.0)` collide the way they compare equal.
/// - **References**: a document referencing another document is a tagged
///   [Value::Reference]; resolution is an explicit database call, never an
///   implicit dereference.
#[derive(Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Represents a null value.
    #[default]
    Null,
    /// Represents a boolean value.
    Bool(bool),
    /// Represents a signed 32-bit integer value.
    I32(i32),
    /// Represents a signed 64-bit integer value.
    I64(i64),
    /// Represents a 64-bit floating point value.
    F64(f64),
    /// Represents a string value.
    String(String),
    /// Represents a point in time with millisecond precision.
    DateTime(DateTime<Utc>),
    /// Represents a nested document value.
    Document(Document),
    /// Represents an array value.
    Array(Vec<Value>),
    /// Represents an internal record id.
    Id(DocId),
    /// Represents a reference to a document in another (or the same)
    /// collection. Never dereferenced implicitly.
    Reference {
        collection: String,
        id: DocId,
    },
    /// Represents a byte array value. It cannot be indexed or queried.
    Bytes(Vec<u8>),
}

impl Value {
    /// Rank used for cross-type ordering. Numeric variants share one rank.
    pub(crate) fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::I32(_) | Value::I64(_) | Value::F64(_) => 1,
            Value::String(_) => 2,
            Value::Document(_) => 3,
            Value::Array(_) => 4,
            Value::Bytes(_) => 5,
            Value::Id(_) => 6,
            Value::Reference { .. } => 7,
            Value::Bool(_) => 8,
            Value::DateTime(_) => 9,
        }
    }

    /// Human-readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I32(_) => "int",
            Value::I64(_) => "long",
            Value::F64(_) => "double",
            Value::String(_) => "string",
            Value::DateTime(_) => "date",
            Value::Document(_) => "document",
            Value::Array(_) => "array",
            Value::Id(_) => "id",
            Value::Reference { .. } => "reference",
            Value::Bytes(_) => "bytes",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::I32(_) | Value::I64(_) | Value::F64(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Value::I32(_) | Value::I64(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_document(&self) -> bool {
        matches!(self, Value::Document(_))
    }

    pub fn is_date(&self) -> bool {
        matches!(self, Value::DateTime(_))
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Value::F64(f) if f.is_nan())
    }

    /// Whether this value may participate in index keys and range
    /// comparisons.
    pub fn is_comparable(&self) -> bool {
        !matches!(self, Value::Bytes(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I32(v) => Some(*v as f64),
            Value::I64(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<DocId> {
        match self {
            Value::Id(id) => Some(*id),
            _ => None,
        }
    }

    /// Constructs a date value from epoch milliseconds. Out-of-range
    /// inputs clamp to the epoch.
    pub fn date_from_millis(millis: i64) -> Value {
        match Utc.timestamp_millis_opt(millis).single() {
            Some(datetime) => Value::DateTime(datetime),
            None => Value::DateTime(DateTime::<Utc>::UNIX_EPOCH),
        }
    }

    /// Query-level comparison.
    ///
    /// Returns `None` when the two values are not comparable in a query:
    /// different type ranks (numerics share a rank), or exactly one side is
    /// NaN. Two NaNs compare equal, so `$lte`/`$gte` against NaN match only
    /// NaN while `$lt`/`$gt` never match it.
    pub fn compare_in_query(&self, other: &Value) -> Option<Ordering> {
        if self.type_rank() != other.type_rank() {
            return None;
        }
        match (self.is_nan(), other.is_nan()) {
            (true, true) => return Some(Ordering::Equal),
            (true, false) | (false, true) => return None,
            (false, false) => {}
        }
        Some(self.cmp(other))
    }

    /// Numeric addition with int64-overflow promotion to double.
    ///
    /// Both operands must be numeric; the result is the widest operand type.
    pub fn add_numeric(&self, other: &Value) -> DocketResult<Value> {
        match (self, other) {
            (Value::I32(a), Value::I32(b)) => match a.checked_add(*b) {
                Some(v) => Ok(Value::I32(v)),
                None => Ok(Value::I64(*a as i64 + *b as i64)),
            },
            (a, b) if a.is_integer() && b.is_integer() => {
                let (a, b) = (a.as_i64().unwrap_or(0), b.as_i64().unwrap_or(0));
                match a.checked_add(b) {
                    Some(v) => Ok(Value::I64(v)),
                    None => Ok(Value::F64(a as f64 + b as f64)),
                }
            }
            (a, b) if a.is_numeric() && b.is_numeric() => {
                Ok(Value::F64(a.as_f64().unwrap_or(f64::NAN) + b.as_f64().unwrap_or(f64::NAN)))
            }
            (a, b) => {
                log::error!("Cannot add {} and {}", a.type_name(), b.type_name());
                Err(DocketError::new(
                    &format!("Cannot add {} and {}", a.type_name(), b.type_name()),
                    ErrorKind::TypeMismatch,
                ))
            }
        }
    }

    /// Numeric multiplication with int64-overflow promotion to double.
    pub fn mul_numeric(&self, other: &Value) -> DocketResult<Value> {
        match (self, other) {
            (a, b) if a.is_integer() && b.is_integer() => {
                let (a, b) = (a.as_i64().unwrap_or(0), b.as_i64().unwrap_or(0));
                match a.checked_mul(b) {
                    Some(v) => Ok(Value::I64(v)),
                    None => Ok(Value::F64(a as f64 * b as f64)),
                }
            }
            (a, b) if a.is_numeric() && b.is_numeric() => {
                Ok(Value::F64(a.as_f64().unwrap_or(f64::NAN) * b.as_f64().unwrap_or(f64::NAN)))
            }
            (a, b) => {
                log::error!("Cannot multiply {} and {}", a.type_name(), b.type_name());
                Err(DocketError::new(
                    &format!("Cannot multiply {} and {}", a.type_name(), b.type_name()),
                    ErrorKind::TypeMismatch,
                ))
            }
        }
    }

    fn to_json_like(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::I32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::F64(v) => {
                if v.is_nan() {
                    "NaN".to_string()
                } else {
                    v.to_string()
                }
            }
            Value::String(s) => format!("{:?}", s),
            Value::DateTime(d) => format!("Date({})", d.timestamp_millis()),
            Value::Document(d) => d.to_string(),
            Value::Array(a) => {
                let items: Vec<String> = a.iter().map(|v| v.to_json_like()).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Id(id) => format!("Id({})", id),
            Value::Reference { collection, id } => {
                format!("Ref({}/{})", collection, id)
            }
            Value::Bytes(b) => format!("Bytes({})", b.len()),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json_like())
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json_like())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.is_numeric() && other.is_numeric() {
            return match (self, other) {
                (a, b) if a.is_integer() && b.is_integer() => a.as_i64() == b.as_i64(),
                (a, b) => num_eq_float(
                    a.as_f64().unwrap_or(f64::NAN),
                    b.as_f64().unwrap_or(f64::NAN),
                ),
            };
        }

        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Document(a), Value::Document(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Id(a), Value::Id(b)) => a == b,
            (
                Value::Reference { collection: c1, id: i1 },
                Value::Reference { collection: c2, id: i2 },
            ) => c1 == c2 && i1 == i2,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        if self.is_numeric() && other.is_numeric() {
            if self.is_integer() && other.is_integer() {
                return self.as_i64().cmp(&other.as_i64());
            }
            return num_cmp_float(
                self.as_f64().unwrap_or(f64::NAN),
                other.as_f64().unwrap_or(f64::NAN),
            );
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Document(a), Value::Document(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (Value::Id(a), Value::Id(b)) => a.cmp(b),
            (
                Value::Reference { collection: c1, id: i1 },
                Value::Reference { collection: c2, id: i2 },
            ) => c1.cmp(c2).then_with(|| i1.cmp(i2)),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => "null_value".hash(state),
            Value::Bool(v) => v.hash(state),
            // canonical numeric hashing: integers that fit exactly in f64
            // hash identically to their float representation
            Value::I32(v) => hash_numeric(*v as f64, state),
            Value::I64(v) => hash_numeric(*v as f64, state),
            Value::F64(v) => hash_numeric(*v, state),
            Value::String(v) => v.hash(state),
            Value::DateTime(v) => v.timestamp_millis().hash(state),
            Value::Document(v) => v.hash(state),
            Value::Array(v) => v.hash(state),
            Value::Id(v) => v.hash(state),
            Value::Reference { collection, id } => {
                collection.hash(state);
                id.hash(state);
            }
            Value::Bytes(v) => v.hash(state),
        }
    }
}

#[inline]
fn hash_numeric<H: std::hash::Hasher>(v: f64, state: &mut H) {
    if v.is_nan() {
        f64::NAN.to_bits().hash(state);
    } else {
        v.to_bits().hash(state);
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Document(v)
    }
}

impl From<DocId> for Value {
    fn from(v: DocId) -> Self {
        Value::Id(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<Option<Value>> for Value {
    fn from(v: Option<Value>) -> Self {
        v.unwrap_or(Value::Null)
    }
}
