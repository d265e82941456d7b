use crate::collection::Document;
use crate::collection::operation::compare_sort_keys;
use crate::common::{SortSpec, Value};
use std::cmp::Ordering;

/// Guards sort order across cursor batches under concurrent mutation.
///
/// Once a sorted cursor has handed documents to the client, later batches
/// must never re-emit or reorder them, even if an update moved a document's
/// sort key behind the last-returned position. The guard tracks the highest
/// (or lowest, for descending leads) key emitted so far and discards any
/// result whose key regressed behind it.
pub struct EnsureSorted {
    spec: SortSpec,
    last_key: Option<Vec<Value>>,
}

impl EnsureSorted {
    pub fn new(spec: SortSpec) -> Self {
        EnsureSorted {
            spec,
            last_key: None,
        }
    }

    /// Whether the document may be emitted; updates the watermark when so.
    pub fn admit(&mut self, doc: &Document) -> bool {
        let key: Vec<Value> = self
            .spec
            .fields()
            .iter()
            .map(|(path, _)| doc.get(path))
            .collect();
        if let Some(last) = &self.last_key {
            if compare_sort_keys(&key, last, &self.spec) == Ordering::Less {
                log::debug!("Discarding result whose sort key regressed");
                return false;
            }
        }
        self.last_key = Some(key);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{order_by, SortOrder};
    use crate::doc;

    #[test]
    fn test_monotone_sequence_admitted() {
        let mut guard = EnsureSorted::new(order_by("n", SortOrder::Ascending));
        assert!(guard.admit(&doc! { n: 1 }));
        assert!(guard.admit(&doc! { n: 2 }));
        assert!(guard.admit(&doc! { n: 2 }));
        assert!(guard.admit(&doc! { n: 5 }));
    }

    #[test]
    fn test_regressed_key_discarded() {
        let mut guard = EnsureSorted::new(order_by("n", SortOrder::Ascending));
        assert!(guard.admit(&doc! { n: 3 }));
        // a concurrent update moved this document's key backwards
        assert!(!guard.admit(&doc! { n: 1 }));
        // the watermark is unchanged, later results continue
        assert!(guard.admit(&doc! { n: 4 }));
    }

    #[test]
    fn test_descending_direction() {
        let mut guard = EnsureSorted::new(order_by("n", SortOrder::Descending));
        assert!(guard.admit(&doc! { n: 9 }));
        assert!(guard.admit(&doc! { n: 5 }));
        assert!(!guard.admit(&doc! { n: 7 }));
    }
}
