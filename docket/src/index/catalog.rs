use crate::collection::{DocId, Document};
use crate::common::{Fields, LockRegistry};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use crate::index::{BTreeIndex, IndexDescriptor, IndexOptions, TextIndex};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One live index of either kind.
#[derive(Debug, Clone)]
pub enum CollectionIndex {
    BTree(BTreeIndex),
    Text(TextIndex),
}

impl CollectionIndex {
    pub fn descriptor(&self) -> IndexDescriptor {
        match self {
            CollectionIndex::BTree(index) => index.descriptor(),
            CollectionIndex::Text(index) => index.descriptor(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CollectionIndex::BTree(index) => index.name(),
            CollectionIndex::Text(index) => index.name(),
        }
    }

    pub fn add_document(&self, id: DocId, doc: &Document) -> DocketResult<()> {
        match self {
            CollectionIndex::BTree(index) => index.add_document(id, doc),
            CollectionIndex::Text(index) => index.add_document(id, doc),
        }
    }

    pub fn remove_document(&self, id: DocId, doc: &Document) -> DocketResult<()> {
        match self {
            CollectionIndex::BTree(index) => index.remove_document(id, doc),
            CollectionIndex::Text(index) => index.remove_document(id, doc),
        }
    }

    pub fn clear(&self) {
        match self {
            CollectionIndex::BTree(index) => index.clear(),
            CollectionIndex::Text(index) => index.clear(),
        }
    }

    pub fn as_btree(&self) -> Option<&BTreeIndex> {
        match self {
            CollectionIndex::BTree(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextIndex> {
        match self {
            CollectionIndex::Text(index) => Some(index),
            _ => None,
        }
    }
}

/// Outcome of a create-index request: the index, plus whether it is new.
#[derive(Debug)]
pub struct CreateIndexOutcome {
    pub index: CollectionIndex,
    pub created: bool,
}

/// The index catalog of one collection.
///
/// Structural changes (create, drop) serialize behind the collection's
/// catalog lock; readers take cheap snapshots of the current index set and
/// never block each other.
///
/// Creation semantics:
/// - same name, same key pattern: idempotent no-op;
/// - same name, different key pattern: `IndexKeySpecsConflict`;
/// - different name, same key pattern: `CannotCreateIndex`.
#[derive(Clone)]
pub struct IndexCatalog {
    inner: Arc<IndexCatalogInner>,
}

struct IndexCatalogInner {
    indexes: RwLock<BTreeMap<String, CollectionIndex>>,
    catalog_lock: LockRegistry,
    max_key_bytes: usize,
}

const CATALOG_LOCK: &str = "index-catalog";

impl IndexCatalog {
    pub fn new(max_key_bytes: usize) -> Self {
        IndexCatalog {
            inner: Arc::new(IndexCatalogInner {
                indexes: RwLock::new(BTreeMap::new()),
                catalog_lock: LockRegistry::new(),
                max_key_bytes,
            }),
        }
    }

    /// Registers a new b-tree index, or returns the existing one when the
    /// request is an exact duplicate.
    pub fn create_btree(
        &self,
        name: &str,
        fields: Fields,
        options: &IndexOptions,
    ) -> DocketResult<CreateIndexOutcome> {
        let lock = self.inner.catalog_lock.get_lock(CATALOG_LOCK);
        let _guard = lock.write();

        self.check_conflicts(name, &fields)?;

        let mut indexes = self.inner.indexes.write();
        if let Some(existing) = indexes.get(name) {
            // an exact duplicate: conflict checks passed, so the pattern
            // matches and the request is a no-op
            return Ok(CreateIndexOutcome {
                index: existing.clone(),
                created: false,
            });
        }

        let descriptor = IndexDescriptor::btree(name, fields, options);
        let index = CollectionIndex::BTree(BTreeIndex::new(descriptor, self.inner.max_key_bytes));
        indexes.insert(name.to_string(), index.clone());
        Ok(CreateIndexOutcome {
            index,
            created: true,
        })
    }

    /// Registers a new text index with the same conflict rules.
    pub fn create_text(&self, name: &str, fields: Fields) -> DocketResult<CreateIndexOutcome> {
        let lock = self.inner.catalog_lock.get_lock(CATALOG_LOCK);
        let _guard = lock.write();

        self.check_conflicts(name, &fields)?;

        let mut indexes = self.inner.indexes.write();
        if let Some(existing) = indexes.get(name) {
            return Ok(CreateIndexOutcome {
                index: existing.clone(),
                created: false,
            });
        }

        let descriptor = IndexDescriptor::text(name, fields);
        let index = CollectionIndex::Text(TextIndex::new(descriptor));
        indexes.insert(name.to_string(), index.clone());
        Ok(CreateIndexOutcome {
            index,
            created: true,
        })
    }

    fn check_conflicts(&self, name: &str, fields: &Fields) -> DocketResult<()> {
        let indexes = self.inner.indexes.read();
        for (existing_name, existing) in indexes.iter() {
            let existing_fields = existing.descriptor();
            if existing_name == name {
                if existing_fields.same_pattern(fields) {
                    return Ok(());
                }
                log::error!(
                    "Index {} already exists with a different key pattern {}",
                    name,
                    existing_fields.fields()
                );
                return Err(DocketError::new(
                    &format!("Index {} already exists with a different key pattern", name),
                    ErrorKind::IndexKeySpecsConflict,
                ));
            }
            if existing_fields.same_pattern(fields) {
                log::error!(
                    "Index over {} already exists under the name {}",
                    fields,
                    existing_name
                );
                return Err(DocketError::new(
                    &format!(
                        "Index over {} already exists under the name {}",
                        fields, existing_name
                    ),
                    ErrorKind::CannotCreateIndex,
                ));
            }
        }
        Ok(())
    }

    /// Removes an index from the catalog, returning it for teardown.
    pub fn drop_index(&self, name: &str) -> DocketResult<CollectionIndex> {
        let lock = self.inner.catalog_lock.get_lock(CATALOG_LOCK);
        let _guard = lock.write();

        let mut indexes = self.inner.indexes.write();
        match indexes.remove(name) {
            Some(index) => {
                index.clear();
                Ok(index)
            }
            None => {
                log::error!("Cannot drop unknown index {}", name);
                Err(DocketError::new(
                    &format!("Index {} not found", name),
                    ErrorKind::IndexNotFound,
                ))
            }
        }
    }

    /// Removes every index. Used by collection drop.
    pub fn drop_all(&self) -> Vec<String> {
        let lock = self.inner.catalog_lock.get_lock(CATALOG_LOCK);
        let _guard = lock.write();

        let mut indexes = self.inner.indexes.write();
        let names: Vec<String> = indexes.keys().cloned().collect();
        for index in indexes.values() {
            index.clear();
        }
        indexes.clear();
        names
    }

    pub fn get(&self, name: &str) -> Option<CollectionIndex> {
        self.inner.indexes.read().get(name).cloned()
    }

    /// Snapshot of the current index set, in name order.
    pub fn snapshot(&self) -> Vec<CollectionIndex> {
        self.inner.indexes.read().values().cloned().collect()
    }

    /// Snapshot of the current descriptors, in name order.
    pub fn descriptors(&self) -> Vec<IndexDescriptor> {
        self.inner
            .indexes
            .read()
            .values()
            .map(|index| index.descriptor())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.indexes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
