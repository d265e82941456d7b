use crate::collection::DocId;
use crate::common::{SortOrder, Value};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use smallvec::SmallVec;
use std::fmt::{Display, Formatter};

type FieldVec = SmallVec<[(String, SortOrder); 4]>;

/// An ordered key pattern: one or more field paths, each with a direction.
///
/// `{a: 1, b: -1}` is `Fields` over `a` ascending then `b` descending.
/// Field order matters; two key patterns with the same paths in a different
/// order are different patterns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Fields {
    fields: FieldVec,
}

impl Fields {
    pub fn new() -> Self {
        Fields { fields: FieldVec::new() }
    }

    /// Builds a key pattern from `(path, direction)` pairs.
    ///
    /// An empty pattern or a repeated path is rejected.
    pub fn with_pairs(pairs: &[(&str, SortOrder)]) -> DocketResult<Self> {
        if pairs.is_empty() {
            log::error!("Key pattern cannot be empty");
            return Err(DocketError::new(
                "Key pattern cannot be empty",
                ErrorKind::BadValue,
            ));
        }
        let mut fields = Fields::new();
        for (name, order) in pairs {
            fields = fields.add_field(name, *order)?;
        }
        Ok(fields)
    }

    /// Builds an all-ascending key pattern from field paths.
    pub fn with_names(names: &[&str]) -> DocketResult<Self> {
        let pairs: Vec<(&str, SortOrder)> =
            names.iter().map(|n| (*n, SortOrder::Ascending)).collect();
        Fields::with_pairs(&pairs)
    }

    pub fn add_field(mut self, name: &str, order: SortOrder) -> DocketResult<Self> {
        if name.is_empty() {
            log::error!("Key pattern field name cannot be empty");
            return Err(DocketError::new(
                "Key pattern field name cannot be empty",
                ErrorKind::BadValue,
            ));
        }
        if self.fields.iter().any(|(n, _)| n == name) {
            log::error!("Duplicate field {} in key pattern", name);
            return Err(DocketError::new(
                &format!("Duplicate field {} in key pattern", name),
                ErrorKind::BadValue,
            ));
        }
        self.fields.push((name.to_string(), order));
        Ok(self)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn pairs(&self) -> &[(String, SortOrder)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether `other`'s paths are a leading prefix of this pattern,
    /// directions included.
    pub fn starts_with(&self, other: &Fields) -> bool {
        if other.len() > self.len() {
            return false;
        }
        self.fields
            .iter()
            .zip(other.fields.iter())
            .all(|(a, b)| a == b)
    }

    /// Whether the pattern contains all of the given paths (any position).
    pub fn contains_all(&self, names: &[&str]) -> bool {
        names
            .iter()
            .all(|n| self.fields.iter().any(|(f, _)| f == n))
    }
}

impl Display for Fields {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(n, o)| {
                let dir = match o {
                    SortOrder::Ascending => 1,
                    SortOrder::Descending => -1,
                };
                format!("{}: {}", n, dir)
            })
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// The values one document contributes to one index: the record id plus the
/// extracted value for each key-pattern field, in pattern order.
#[derive(Debug, Clone)]
pub struct FieldValues {
    doc_id: DocId,
    fields: Fields,
    values: Vec<Value>,
}

impl FieldValues {
    pub fn new(doc_id: DocId, fields: Fields, values: Vec<Value>) -> Self {
        FieldValues {
            doc_id,
            fields,
            values,
        }
    }

    pub fn doc_id(&self) -> DocId {
        self.doc_id
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_pairs() {
        let fields =
            Fields::with_pairs(&[("a", SortOrder::Ascending), ("b", SortOrder::Descending)])
                .unwrap();
        assert_eq!(fields.field_names(), vec!["a", "b"]);
        assert_eq!(fields.to_string(), "{a: 1, b: -1}");
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(Fields::with_pairs(&[]).is_err());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let result = Fields::with_pairs(&[("a", SortOrder::Ascending), ("a", SortOrder::Descending)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_starts_with() {
        let long = Fields::with_names(&["a", "b", "c"]).unwrap();
        let prefix = Fields::with_names(&["a", "b"]).unwrap();
        let not_prefix = Fields::with_names(&["b"]).unwrap();
        assert!(long.starts_with(&prefix));
        assert!(!long.starts_with(&not_prefix));
        assert!(!prefix.starts_with(&long));
    }

    #[test]
    fn test_direction_matters_for_prefix() {
        let pattern = Fields::with_pairs(&[("a", SortOrder::Ascending)]).unwrap();
        let descending = Fields::with_pairs(&[("a", SortOrder::Descending)]).unwrap();
        assert!(!pattern.starts_with(&descending));
    }

    #[test]
    fn test_contains_all() {
        let fields = Fields::with_names(&["a", "b"]).unwrap();
        assert!(fields.contains_all(&["b", "a"]));
        assert!(!fields.contains_all(&["a", "c"]));
    }
}
