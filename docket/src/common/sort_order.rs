/// Specifies the direction for sorting documents.
///
/// # Variants
/// - `Ascending`: Sort from smallest to largest value
/// - `Descending`: Sort from largest to smallest value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    /// Sort in ascending order (smallest to largest, A-Z, oldest to newest)
    Ascending,
    /// Sort in descending order (largest to smallest, Z-A, newest to oldest)
    Descending,
}

impl SortOrder {
    /// Returns the opposite direction.
    pub fn reverse(self) -> SortOrder {
        match self {
            SortOrder::Ascending => SortOrder::Descending,
            SortOrder::Descending => SortOrder::Ascending,
        }
    }
}

/// An ordered list of `(field path, direction)` pairs describing a requested
/// sort order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SortSpec {
    fields: Vec<(String, SortOrder)>,
}

impl SortSpec {
    pub fn new() -> Self {
        SortSpec { fields: Vec::new() }
    }

    /// Appends a sort key. Later keys break ties of earlier ones.
    pub fn then_by(mut self, field: &str, order: SortOrder) -> Self {
        self.fields.push((field.to_string(), order));
        self
    }

    pub fn fields(&self) -> &[(String, SortOrder)] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The leading sort key, if any.
    pub fn first(&self) -> Option<&(String, SortOrder)> {
        self.fields.first()
    }
}

/// Creates a single-key sort specification.
pub fn order_by(field: &str, order: SortOrder) -> SortSpec {
    SortSpec::new().then_by(field, order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse() {
        assert_eq!(SortOrder::Ascending.reverse(), SortOrder::Descending);
        assert_eq!(SortOrder::Descending.reverse(), SortOrder::Ascending);
    }

    #[test]
    fn test_sort_spec_builder() {
        let spec = order_by("a", SortOrder::Ascending).then_by("b", SortOrder::Descending);
        assert_eq!(spec.fields().len(), 2);
        assert_eq!(spec.first().unwrap().0, "a");
        assert!(!spec.is_empty());
    }
}
