use crate::collection::DocId;
use crate::common::{Value, DOC_ID};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};

/// A document: an insertion-ordered mapping of field name to [Value].
///
/// Field order is preserved and significant: two documents with the same
/// fields in a different order are not equal. Nested values are addressed
/// with dotted paths (`"address.city"`, `"items.0"`); see [`Document::get`].
///
/// `Document` itself accepts any non-empty field name, including operator
/// keys such as `"$gt"` — query and pipeline specifications are plain
/// documents too. Restrictions on *stored* field names (no leading `$`, no
/// embedded `.`) are enforced by the collection write path, not here.
#[derive(Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Document {
    data: IndexMap<String, Value>,
}

impl Document {
    /// Creates a new empty document.
    pub fn new() -> Self {
        Document {
            data: IndexMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Associates `value` with the top-level field `key`.
    ///
    /// The key is stored literally; a dotted key names a single field whose
    /// name contains a dot (useful for path references inside query
    /// documents), not a nested write.
    pub fn put<T: Into<Value>>(&mut self, key: &str, value: T) -> DocketResult<()> {
        if key.is_empty() {
            log::error!("Document does not support empty field names");
            return Err(DocketError::new(
                "Document does not support empty field names",
                ErrorKind::InvalidFieldName,
            ));
        }
        self.data.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Returns the value at `path`, or [Value::Null] if absent.
    ///
    /// The path is split on `.` and navigated segment by segment:
    /// - a nested document is entered by field name;
    /// - an array with a numeric segment is indexed positionally, falling
    ///   back to sub-document fields literally named e.g. `"0"` when the
    ///   array has no such element;
    /// - an array with a non-numeric segment fans out, collecting the
    ///   segment's value from each sub-document element.
    pub fn get(&self, path: &str) -> Value {
        if let Some(value) = self.data.get(path) {
            return value.clone();
        }
        if path.contains('.') {
            let segments: Vec<&str> = path.split('.').collect();
            return resolve_segments(&Value::Document(self.clone()), &segments);
        }
        Value::Null
    }

    /// Returns the top-level field `key` without path navigation.
    pub fn get_field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Whether the top-level field exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Removes the top-level field `key`, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.shift_remove(key)
    }

    /// Iterates `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    /// Top-level field names in insertion order.
    pub fn field_names(&self) -> Vec<&str> {
        self.data.keys().map(|k| k.as_str()).collect()
    }

    /// The record id stored in `_id`, when it is an internal id value.
    pub fn doc_id(&self) -> Option<DocId> {
        match self.data.get(DOC_ID) {
            Some(Value::Id(id)) => Some(*id),
            _ => None,
        }
    }

    /// The user-visible `_id` value, if present.
    pub fn id_value(&self) -> Option<&Value> {
        self.data.get(DOC_ID)
    }

    /// Writes `value` at a dotted path, creating intermediate documents as
    /// needed. A numeric segment indexes into an existing array, extending
    /// it with nulls when the position is past the end.
    pub fn put_path(&mut self, path: &str, value: Value) -> DocketResult<()> {
        if path.is_empty() {
            log::error!("Document does not support empty field names");
            return Err(DocketError::new(
                "Document does not support empty field names",
                ErrorKind::InvalidFieldName,
            ));
        }
        if !path.contains('.') {
            self.data.insert(path.to_string(), value);
            return Ok(());
        }
        let segments: Vec<&str> = path.split('.').collect();
        let Some((head, rest)) = segments.split_first() else {
            return Ok(());
        };
        let slot = self
            .data
            .entry(head.to_string())
            .or_insert_with(|| Value::Document(Document::new()));
        put_path_segments(slot, rest, value)
    }

    /// Removes the value at a dotted path. Returns the removed value.
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        if !path.contains('.') {
            return self.data.shift_remove(path);
        }
        let segments: Vec<&str> = path.split('.').collect();
        let (head, rest) = segments.split_first()?;
        let slot = self.data.get_mut(*head)?;
        remove_path_segments(slot, rest)
    }

    /// Ensures the document carries an `_id`, assigning `record_id` when the
    /// field is absent. Returns the effective `_id` value.
    pub(crate) fn ensure_id(&mut self, record_id: DocId) -> Value {
        if let Some(existing) = self.data.get(DOC_ID) {
            return existing.clone();
        }
        let id = Value::Id(record_id);
        // _id leads the field order, as the storage layer always renders it
        self.data.shift_insert(0, DOC_ID.to_string(), id.clone());
        id
    }
}

fn put_path_segments(current: &mut Value, segments: &[&str], value: Value) -> DocketResult<()> {
    let Some((head, rest)) = segments.split_first() else {
        *current = value;
        return Ok(());
    };

    match current {
        Value::Document(doc) => {
            if rest.is_empty() {
                doc.put(head, value)
            } else {
                let slot = doc
                    .data
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Document(Document::new()));
                put_path_segments(slot, rest, value)
            }
        }
        Value::Array(items) => {
            let Ok(index) = head.parse::<usize>() else {
                log::error!("Cannot use field name {} on an array value", head);
                return Err(DocketError::new(
                    &format!("Cannot use field name {} on an array value", head),
                    ErrorKind::InvalidFieldName,
                ));
            };
            while items.len() <= index {
                items.push(Value::Null);
            }
            put_path_segments(&mut items[index], rest, value)
        }
        other => {
            // a scalar along the path is replaced by a fresh document
            *other = Value::Document(Document::new());
            put_path_segments(other, segments, value)
        }
    }
}

fn remove_path_segments(current: &mut Value, segments: &[&str]) -> Option<Value> {
    let (head, rest) = segments.split_first()?;
    match current {
        Value::Document(doc) => {
            if rest.is_empty() {
                doc.data.shift_remove(*head)
            } else {
                let slot = doc.data.get_mut(*head)?;
                remove_path_segments(slot, rest)
            }
        }
        Value::Array(items) => {
            let index = head.parse::<usize>().ok()?;
            let element = items.get_mut(index)?;
            if rest.is_empty() {
                // removing an array slot leaves null, preserving positions
                Some(std::mem::replace(element, Value::Null))
            } else {
                remove_path_segments(element, rest)
            }
        }
        _ => None,
    }
}

fn resolve_segments(current: &Value, segments: &[&str]) -> Value {
    let Some((head, rest)) = segments.split_first() else {
        return current.clone();
    };

    match current {
        Value::Document(doc) => match doc.get_field(head) {
            Some(value) => resolve_segments(value, rest),
            None => Value::Null,
        },
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(element) = items.get(index) {
                    return resolve_segments(element, rest);
                }
                // no element at that position: fall through to the literal
                // field fanout below, matching sub-documents named "0"
            }
            let mut collected = Vec::new();
            for element in items {
                if let Value::Document(doc) = element {
                    if let Some(value) = doc.get_field(head) {
                        collected.push(resolve_segments(value, rest));
                    }
                }
            }
            if collected.is_empty() {
                Value::Null
            } else {
                Value::Array(collected)
            }
        }
        _ => Value::Null,
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        if self.data.len() != other.data.len() {
            return false;
        }
        self.data.iter().zip(other.data.iter()).all(|(a, b)| a == b)
    }
}

impl Eq for Document {}

impl PartialOrd for Document {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Document {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut left = self.data.iter();
        let mut right = other.data.iter();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some((ka, va)), Some((kb, vb))) => {
                    let key_order = ka.cmp(kb);
                    if key_order != Ordering::Equal {
                        return key_order;
                    }
                    let value_order = va.cmp(vb);
                    if value_order != Ordering::Equal {
                        return value_order;
                    }
                }
            }
        }
    }
}

impl Hash for Document {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (key, value) in &self.data {
            key.hash(state);
            value.hash(state);
        }
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .data
            .iter()
            .map(|(k, v)| format!("{:?}: {}", k, v))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// Strips the surrounding quotes `stringify!` leaves on string-literal keys.
#[doc(hidden)]
pub fn normalize(key: &str) -> String {
    key.trim_matches('"').to_string()
}

/// Builds a [Document] from `key: value` pairs.
///
/// ```ignore
/// let doc = doc! {
///     name: "Alice",
///     age: 30i64,
///     address: { city: "Oslo", zip: 10001 },
///     tags: ["a", "b"],
/// };
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::collection::Document::new()
    };

    ($($key:tt : $value:tt),* $(,)?) => {
        {
            #[allow(unused_imports)]
            use $crate::doc_value;

            let mut doc = $crate::collection::Document::new();
            $(
                doc.put(&$crate::collection::normalize(stringify!($key)), $crate::doc_value!($value))
                    .expect("doc! field");
            )*
            doc
        }
    };
}

/// Helper macro to convert values for the `doc!` macro.
/// Handles nested documents, arrays, and expressions.
#[macro_export]
macro_rules! doc_value {
    // match a nested document
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::common::Value::Document($crate::doc!{ $($key : $value),* })
    };

    // match an array of values
    ([ $($value:tt),* $(,)? ]) => {
        $crate::common::Value::Array(vec![$($crate::doc_value!($value)),*])
    };

    // match an expression (variable, literal, arithmetic in parens, etc.)
    ($value:expr) => {
        $crate::common::Value::from($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_put_and_get() {
        let mut doc = Document::new();
        doc.put("name", "Alice").unwrap();
        doc.put("age", 30i64).unwrap();
        assert_eq!(doc.get("name"), Value::from("Alice"));
        assert_eq!(doc.get("age"), Value::I64(30));
        assert_eq!(doc.get("missing"), Value::Null);
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut doc = Document::new();
        let err = doc.put("", 1).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidFieldName);
    }

    #[test]
    fn test_nested_path_get() {
        let doc = doc! {
            address: { city: "Oslo", zip: 10001 },
        };
        assert_eq!(doc.get("address.city"), Value::from("Oslo"));
        assert_eq!(doc.get("address.zip"), Value::I32(10001));
        assert_eq!(doc.get("address.country"), Value::Null);
    }

    #[test]
    fn test_array_positional_path() {
        let doc = doc! { items: [1, 2, 3] };
        assert_eq!(doc.get("items.0"), Value::I32(1));
        assert_eq!(doc.get("items.2"), Value::I32(3));
        assert_eq!(doc.get("items.9"), Value::Null);
    }

    #[test]
    fn test_positional_fallback_to_literal_field() {
        // the array has no element at position 5, so sub-document fields
        // literally named "5" are matched instead
        let doc = doc! {
            items: [{ "5": "literal" }],
        };
        assert_eq!(doc.get("items.5"), Value::Array(vec![Value::from("literal")]));
    }

    #[test]
    fn test_array_fanout_over_subdocuments() {
        let doc = doc! {
            orders: [{ total: 10 }, { total: 20 }],
        };
        assert_eq!(
            doc.get("orders.total"),
            Value::Array(vec![Value::I32(10), Value::I32(20)])
        );
    }

    #[test]
    fn test_field_order_significant_for_eq() {
        let a = doc! { x: 1, y: 2 };
        let b = doc! { y: 2, x: 1 };
        assert_ne!(a, b);
    }

    #[test]
    fn test_dotted_literal_key_wins_over_navigation() {
        let mut doc = Document::new();
        doc.put("a.b", 7).unwrap();
        assert_eq!(doc.get("a.b"), Value::I32(7));
    }

    #[test]
    fn test_ensure_id() {
        let mut doc = doc! { x: 1 };
        let record_id = DocId::new();
        let id = doc.ensure_id(record_id);
        assert_eq!(id, Value::Id(record_id));
        assert_eq!(doc.field_names()[0], DOC_ID);
        // a second call does not replace the id
        assert_eq!(doc.ensure_id(DocId::new()), Value::Id(record_id));
    }

    #[test]
    fn test_remove() {
        let mut doc = doc! { a: 1, b: 2 };
        assert_eq!(doc.remove("a"), Some(Value::I32(1)));
        assert_eq!(doc.remove("a"), None);
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_put_path_creates_intermediates() {
        let mut doc = Document::new();
        doc.put_path("a.b.c", Value::I32(1)).unwrap();
        assert_eq!(doc.get("a.b.c"), Value::I32(1));
    }

    #[test]
    fn test_put_path_into_array_slot() {
        let mut doc = doc! { items: [1, 2] };
        doc.put_path("items.3", Value::I32(9)).unwrap();
        assert_eq!(
            doc.get("items"),
            Value::Array(vec![Value::I32(1), Value::I32(2), Value::Null, Value::I32(9)])
        );
    }

    #[test]
    fn test_put_path_field_name_on_array_rejected() {
        let mut doc = doc! { items: [1] };
        let err = doc.put_path("items.name", Value::I32(1)).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidFieldName);
    }

    #[test]
    fn test_remove_path() {
        let mut doc = doc! { a: { b: 1, c: 2 } };
        assert_eq!(doc.remove_path("a.b"), Some(Value::I32(1)));
        assert_eq!(doc.get("a.b"), Value::Null);
        assert_eq!(doc.get("a.c"), Value::I32(2));
        assert_eq!(doc.remove_path("a.missing"), None);
    }

    #[test]
    fn test_remove_path_array_slot_leaves_null() {
        let mut doc = doc! { items: [1, 2, 3] };
        assert_eq!(doc.remove_path("items.1"), Some(Value::I32(2)));
        assert_eq!(
            doc.get("items"),
            Value::Array(vec![Value::I32(1), Value::Null, Value::I32(3)])
        );
    }
}
