use crate::aggregate::CollectionProvider;
use crate::collection::{
    DeleteOptions, DeleteResult, DocketCollection, Document, FindOptions, UpdateOptions,
    UpdateResult,
};
use crate::common::{Fields, SortOrder, Value};
use crate::cursor::{CursorBatch, CursorManager};
use crate::db_config::{DocketBuilder, DocketConfig};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use crate::filter::parse_filter;
use crate::index::IndexOptions;
use crate::transaction::Session;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// The database: a registry of collections plus the process-wide cursor
/// registry.
///
/// All state is owned by one `Docket` instance and passed explicitly into
/// every component, so tests instantiate isolated databases per case.
/// Clones share the same underlying instance.
#[derive(Clone)]
pub struct Docket {
    inner: Arc<DocketInner>,
}

pub(crate) struct DocketInner {
    config: DocketConfig,
    collections: RwLock<HashMap<String, DocketCollection>>,
    cursors: CursorManager,
    closed: AtomicBool,
    self_ref: RwLock<Weak<DocketInner>>,
}

/// `$lookup` and reference resolution reach foreign collections through
/// this adapter; a missing collection joins as empty rather than failing
/// the pipeline.
struct DatabaseProvider {
    inner: Weak<DocketInner>,
}

impl CollectionProvider for DatabaseProvider {
    fn collection_documents(&self, name: &str) -> DocketResult<Vec<Document>> {
        let Some(inner) = self.inner.upgrade() else {
            return Err(DocketError::new(
                "Database was closed",
                ErrorKind::InvalidOperation,
            ));
        };
        let collections = inner.collections.read();
        match collections.get(name) {
            Some(collection) => collection.all_documents(),
            None => {
                log::debug!("Lookup against missing collection {}", name);
                Ok(Vec::new())
            }
        }
    }
}

impl Docket {
    /// Starts building a database.
    pub fn builder() -> DocketBuilder {
        DocketBuilder::new()
    }

    /// Opens an in-memory database with default configuration.
    pub fn open() -> DocketResult<Docket> {
        DocketBuilder::new().open()
    }

    pub(crate) fn open_with_config(config: DocketConfig) -> DocketResult<Docket> {
        let cursor_timeout = config.cursor_timeout;
        let inner = Arc::new(DocketInner {
            config,
            collections: RwLock::new(HashMap::new()),
            cursors: CursorManager::new(cursor_timeout),
            closed: AtomicBool::new(false),
            self_ref: RwLock::new(Weak::new()),
        });
        *inner.self_ref.write() = Arc::downgrade(&inner);
        Ok(Docket { inner })
    }

    fn ensure_open(&self) -> DocketResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            log::error!("Database was closed");
            return Err(DocketError::new(
                "Database was closed",
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    /// Gets a collection, creating it on first use.
    pub fn collection(&self, name: &str) -> DocketResult<DocketCollection> {
        self.ensure_open()?;
        if name.is_empty() || name.starts_with('$') {
            log::error!("Invalid collection name: {}", name);
            return Err(DocketError::new(
                &format!("Invalid collection name: {}", name),
                ErrorKind::BadValue,
            ));
        }

        {
            let collections = self.inner.collections.read();
            if let Some(existing) = collections.get(name) {
                return Ok(existing.clone());
            }
        }

        let mut collections = self.inner.collections.write();
        if let Some(existing) = collections.get(name) {
            return Ok(existing.clone());
        }
        let provider: Arc<dyn CollectionProvider> = Arc::new(DatabaseProvider {
            inner: self.inner.self_ref.read().clone(),
        });
        let collection = DocketCollection::new(
            name,
            self.inner.config.clone(),
            self.inner.cursors.clone(),
            provider,
        )?;
        collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    /// Names of existing collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let collections = self.inner.collections.read();
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drops a collection: outstanding cursors are invalidated, records and
    /// indexes are cleared, and the name is unregistered. Returns whether
    /// the collection existed.
    pub fn drop_collection(&self, name: &str) -> DocketResult<bool> {
        self.ensure_open()?;
        let removed = {
            let mut collections = self.inner.collections.write();
            collections.remove(name)
        };
        match removed {
            Some(collection) => {
                collection.drop_collection()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Starts a session for transactions.
    pub fn create_session(&self) -> Session {
        Session::new(self.clone())
    }

    /// Resolves a [Value::Reference] to its target document. Resolution is
    /// always this explicit call; references never dereference implicitly.
    pub fn resolve_reference(&self, reference: &Value) -> DocketResult<Option<Document>> {
        self.ensure_open()?;
        let Value::Reference { collection, id } = reference else {
            log::error!("resolve_reference requires a reference value");
            return Err(DocketError::new(
                "resolve_reference requires a reference value",
                ErrorKind::BadValue,
            ));
        };
        let collections = self.inner.collections.read();
        match collections.get(collection) {
            Some(handle) => handle.get_by_record_id(id),
            None => Ok(None),
        }
    }

    // --- the abstract command surface -----------------------------------

    /// `find`: filter and options in document form, a cursor batch back.
    pub fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: FindOptions,
    ) -> DocketResult<CursorBatch> {
        let handle = self.collection(collection)?;
        let filter = parse_filter(filter)?;
        handle.find_batched(filter, options)
    }

    /// `getMore`: continues a server-side cursor.
    pub fn get_more(&self, cursor_id: u64, batch_size: Option<usize>) -> DocketResult<CursorBatch> {
        self.ensure_open()?;
        self.inner.cursors.get_more(cursor_id, batch_size)
    }

    /// `killCursors`: closes one cursor. Returns whether it existed.
    pub fn kill_cursor(&self, cursor_id: u64) -> bool {
        self.inner.cursors.kill(cursor_id)
    }

    /// `aggregate`: a pipeline in document form, a cursor batch back.
    pub fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Document],
        batch_size: Option<usize>,
    ) -> DocketResult<CursorBatch> {
        let handle = self.collection(collection)?;
        handle.aggregate_batched(pipeline, batch_size)
    }

    /// `update`: filter and mutation in document form.
    pub fn update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> DocketResult<UpdateResult> {
        let handle = self.collection(collection)?;
        let filter = parse_filter(filter)?;
        handle.update(filter, update, options)
    }

    /// `delete`: filter in document form.
    pub fn delete(
        &self,
        collection: &str,
        filter: &Document,
        options: DeleteOptions,
    ) -> DocketResult<DeleteResult> {
        let handle = self.collection(collection)?;
        let filter = parse_filter(filter)?;
        handle.delete(filter, options)
    }

    /// `createIndexes`: index specifications in document form, e.g.
    /// `{key: {a: 1, b: -1}, name: "a_1_b_-1", unique: true,
    /// partialFilterExpression: {...}}`. Returns `{ok, createdCount}`.
    pub fn create_indexes(&self, collection: &str, specs: &[Document]) -> DocketResult<Document> {
        let handle = self.collection(collection)?;
        let mut created_count = 0i64;
        for spec in specs {
            let Value::Document(key_doc) = spec.get("key") else {
                return Err(DocketError::new(
                    "createIndexes requires a key document per spec",
                    ErrorKind::BadValue,
                ));
            };
            let fields = parse_key_pattern(&key_doc)?;

            let mut options = IndexOptions::default();
            if let Value::Bool(true) = spec.get("unique") {
                options.unique = true;
            }
            if let Value::Document(filter_doc) = spec.get("partialFilterExpression") {
                options.partial_filter = Some(parse_filter(&filter_doc)?);
            }

            let name = match spec.get("name") {
                Value::String(name) => Some(name),
                Value::Null => None,
                _ => {
                    return Err(DocketError::new(
                        "Index name must be a string",
                        ErrorKind::BadValue,
                    ));
                }
            };

            let created = match name {
                Some(name) => handle.create_index_named(&name, fields, &options)?,
                None => handle.create_index(fields, &options)?,
            };
            if created {
                created_count += 1;
            }
        }

        let mut result = Document::new();
        result.put("ok", true)?;
        result.put("createdCount", Value::I64(created_count))?;
        Ok(result)
    }

    /// `explain`: plan description and execution statistics for a find.
    pub fn explain(
        &self,
        collection: &str,
        filter: &Document,
        options: FindOptions,
    ) -> DocketResult<Document> {
        let handle = self.collection(collection)?;
        let filter = parse_filter(filter)?;
        handle.explain(filter, options)
    }

    /// Number of currently open server-side cursors.
    pub fn open_cursors(&self) -> usize {
        self.inner.cursors.open_cursors()
    }

    /// Closes the database. Collections and cursors become unusable.
    pub fn close(&self) -> DocketResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let collections: Vec<DocketCollection> = {
            let mut map = self.inner.collections.write();
            map.drain().map(|(_, c)| c).collect()
        };
        for collection in collections {
            self.inner.cursors.invalidate_collection(collection.name());
            collection.drop_collection()?;
        }
        Ok(())
    }
}

/// Parses `{a: 1, b: -1}` into a key pattern.
fn parse_key_pattern(key_doc: &Document) -> DocketResult<Fields> {
    if key_doc.is_empty() {
        return Err(DocketError::new(
            "Index key pattern cannot be empty",
            ErrorKind::BadValue,
        ));
    }
    let mut fields = Fields::new();
    for (path, direction) in key_doc.iter() {
        let order = match direction.as_i64() {
            Some(1) => SortOrder::Ascending,
            Some(-1) => SortOrder::Descending,
            _ => {
                log::error!("Index direction for {} must be 1 or -1", path);
                return Err(DocketError::new(
                    &format!("Index direction for {} must be 1 or -1", path),
                    ErrorKind::BadValue,
                ));
            }
        };
        fields = fields.add_field(path, order)?;
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::filter::all;

    #[test]
    fn test_collection_create_on_first_use() {
        let db = Docket::open().unwrap();
        assert!(db.collection_names().is_empty());
        db.collection("users").unwrap();
        assert_eq!(db.collection_names(), vec!["users".to_string()]);
    }

    #[test]
    fn test_invalid_collection_names() {
        let db = Docket::open().unwrap();
        assert!(db.collection("").is_err());
        assert!(db.collection("$internal").is_err());
    }

    #[test]
    fn test_find_command_surface() {
        let db = Docket::open().unwrap();
        let coll = db.collection("c").unwrap();
        for n in 0..5 {
            coll.insert(doc! { n: n }).unwrap();
        }

        let batch = db
            .find(
                "c",
                &doc! { n: { "$gte": 1 } },
                FindOptions::new().with_batch_size(2),
            )
            .unwrap();
        assert_eq!(batch.docs.len(), 2);
        assert!(!batch.exhausted);

        let more = db.get_more(batch.cursor_id, None).unwrap();
        assert_eq!(more.docs.len(), 2);
        let last = db.get_more(batch.cursor_id, None).unwrap();
        assert!(last.exhausted);
    }

    #[test]
    fn test_create_indexes_command() {
        let db = Docket::open().unwrap();
        let result = db
            .create_indexes(
                "c",
                &[doc! { key: { a: 1, b: (-1) }, unique: true }],
            )
            .unwrap();
        assert_eq!(result.get("createdCount"), Value::I64(1));

        // exact duplicate is a no-op
        let result = db
            .create_indexes(
                "c",
                &[doc! { key: { a: 1, b: (-1) }, unique: true }],
            )
            .unwrap();
        assert_eq!(result.get("createdCount"), Value::I64(0));
    }

    #[test]
    fn test_drop_collection_invalidates_cursors() {
        let db = Docket::open().unwrap();
        let coll = db.collection("c").unwrap();
        for n in 0..10 {
            coll.insert(doc! { n: n }).unwrap();
        }
        let batch = db
            .find("c", &doc! {}, FindOptions::new().with_batch_size(2))
            .unwrap();
        assert!(db.drop_collection("c").unwrap());

        let err = db.get_more(batch.cursor_id, None).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::CursorNotFound);

        // the dropped handle reports the collection gone
        let err = coll.count(all()).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::CollectionNotFound);

        // re-opening the name creates a fresh, empty collection
        let fresh = db.collection("c").unwrap();
        assert_eq!(fresh.count(all()).unwrap(), 0);
    }

    #[test]
    fn test_resolve_reference() {
        let db = Docket::open().unwrap();
        let coll = db.collection("targets").unwrap();
        let id = coll.insert(doc! { payload: "found" }).unwrap();

        let reference = Value::Reference {
            collection: "targets".to_string(),
            id,
        };
        let resolved = db.resolve_reference(&reference).unwrap().unwrap();
        assert_eq!(resolved.get("payload"), Value::from("found"));

        let dangling = Value::Reference {
            collection: "nowhere".to_string(),
            id,
        };
        assert!(db.resolve_reference(&dangling).unwrap().is_none());
    }

    #[test]
    fn test_close_makes_database_unusable() {
        let db = Docket::open().unwrap();
        db.collection("c").unwrap();
        db.close().unwrap();
        assert!(db.collection("c").is_err());
    }

    #[test]
    fn test_update_command_surface() {
        let db = Docket::open().unwrap();
        db.collection("c").unwrap().insert(doc! { a: 1 }).unwrap();
        let result = db
            .update(
                "c",
                &doc! { a: 1 },
                &doc! { "$set": { touched: true } },
                UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(result.matched_count, 1);
        assert_eq!(result.modified_count, 1);
    }
}
