//! Collection internals: the write path (document + index maintenance as an
//! atomic unit), the read path (plan execution), and index builds.

mod index_operations;
mod query_planner;
mod read_operations;
mod update_operators;
mod write_operations;

pub use update_operators::{PullCriterion, UpdateOp, UpdateSpec};

pub(crate) use query_planner::QueryPlanner;
pub(crate) use read_operations::{compare_documents, compare_sort_keys, sort_records, DocIter};

use crate::collection::Document;
use crate::common::Value;
use crate::errors::{DocketError, DocketResult, ErrorKind};
use crate::index::IndexCatalog;
use crate::store::RecordStore;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared state the operation impls work over. One instance per collection,
/// shared with the collection facade.
#[derive(Clone)]
pub(crate) struct CollectionOps {
    pub(crate) name: String,
    pub(crate) store: RecordStore,
    pub(crate) catalog: IndexCatalog,
    pub(crate) planner: QueryPlanner,
    /// Serializes document writes so index maintenance for one document is
    /// never interleaved with another writer's.
    pub(crate) write_lock: Arc<Mutex<()>>,
}

impl CollectionOps {
    pub(crate) fn new(name: &str, store: RecordStore, catalog: IndexCatalog) -> Self {
        CollectionOps {
            name: name.to_string(),
            store,
            catalog,
            planner: QueryPlanner::new(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Validates stored field names, recursively: no empty names, no leading
/// `$`, no embedded `.`. Query and pipeline documents are exempt; this runs
/// only on documents headed for storage.
pub(crate) fn validate_field_names(doc: &Document) -> DocketResult<()> {
    for (name, value) in doc.iter() {
        if name.is_empty() {
            return Err(field_name_error("Field names cannot be empty"));
        }
        if name.starts_with('$') {
            return Err(field_name_error(&format!(
                "Field name {} cannot start with '$'",
                name
            )));
        }
        if name.contains('.') {
            return Err(field_name_error(&format!(
                "Field name {} cannot contain '.'",
                name
            )));
        }
        validate_value(value)?;
    }
    Ok(())
}

fn validate_value(value: &Value) -> DocketResult<()> {
    match value {
        Value::Document(doc) => validate_field_names(doc),
        Value::Array(items) => {
            for item in items {
                validate_value(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn field_name_error(message: &str) -> DocketError {
    log::error!("{}", message);
    DocketError::new(message, ErrorKind::InvalidFieldName)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_valid_names_pass() {
        let doc = doc! { a: 1, nested: { b: 2 }, list: [{ c: 3 }] };
        assert!(validate_field_names(&doc).is_ok());
    }

    #[test]
    fn test_dollar_prefix_rejected() {
        let doc = doc! { "$bad": 1 };
        let err = validate_field_names(&doc).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidFieldName);
    }

    #[test]
    fn test_embedded_dot_rejected() {
        let mut doc = Document::new();
        doc.put("a.b", 1).unwrap();
        assert!(validate_field_names(&doc).is_err());
    }

    #[test]
    fn test_nested_violations_detected() {
        let doc = doc! { outer: { "$inner": 1 } };
        assert!(validate_field_names(&doc).is_err());
        let in_array = doc! { list: [{ "$x": 1 }] };
        assert!(validate_field_names(&in_array).is_err());
    }
}
