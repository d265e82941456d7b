use crate::ID_GENERATOR;
use std::fmt::{Debug, Display, Formatter};

/// Internal record id.
///
/// Every stored document is addressed by a `DocId` in the record store.
/// Ids are snowflake-generated (see `snowflake.rs`): unique within the
/// process and approximately insertion-ordered. A document's user-visible
/// `_id` field defaults to its `DocId` when the caller did not supply one.
#[derive(PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DocId {
    id_value: u64,
}

impl DocId {
    /// Generates a new unique `DocId`.
    pub fn new() -> Self {
        DocId {
            id_value: ID_GENERATOR.get_id(),
        }
    }

    /// Wraps a raw id value, e.g. one read back from a resume token.
    pub fn from_value(id_value: u64) -> Self {
        DocId { id_value }
    }

    /// The raw 64-bit value of this id.
    pub fn id_value(&self) -> u64 {
        self.id_value
    }
}

impl Default for DocId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for DocId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id_value)
    }
}

impl Debug for DocId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DocId({})", self.id_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique() {
        let a = DocId::new();
        let b = DocId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_round_trip_raw_value() {
        let id = DocId::new();
        let restored = DocId::from_value(id.id_value());
        assert_eq!(id, restored);
    }

    #[test]
    fn test_ordering_follows_generation() {
        let a = DocId::new();
        let b = DocId::new();
        assert!(a < b);
    }
}
