use crate::collection::{DocId, Document};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use im::OrdMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A stored document plus the revision of the write that produced it.
///
/// Revisions come from a store-wide counter; transactions use them for
/// first-committer-wins conflict detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub document: Document,
    pub revision: u64,
}

/// An immutable point-in-time view of a record store.
///
/// Snapshots are O(1) to take (structural sharing) and are what scans,
/// cursor batch refills, and transactions read from. A snapshot never
/// observes writes made after it was taken.
#[derive(Clone)]
pub struct StoreSnapshot {
    records: OrdMap<DocId, Record>,
}

impl StoreSnapshot {
    pub fn get(&self, id: &DocId) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &DocId) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates records in id order, starting strictly after `resume_after`
    /// when given. This is the scan-resumption primitive: a cursor that
    /// yielded remembers the last id it examined and re-enters here.
    /// Records deleted since the token was taken are skipped naturally;
    /// records inserted behind the token are not revisited.
    pub fn iter_from(
        &self,
        resume_after: Option<DocId>,
    ) -> impl Iterator<Item = (DocId, Record)> + '_ {
        let range = match resume_after {
            Some(id) => self.records.range(id..),
            None => self.records.range(..),
        };
        range
            .filter(move |(id, _)| match resume_after {
                Some(after) => **id > after,
                None => true,
            })
            .map(|(id, record)| (*id, record.clone()))
    }

    /// Iterates all records in id order.
    pub fn iter(&self) -> impl Iterator<Item = (DocId, Record)> + '_ {
        self.iter_from(None)
    }

    /// Consumes the snapshot into an owning ordered iterator. This is what
    /// lazy scans hold on to: the snapshot keeps the records alive without
    /// blocking writers.
    pub fn into_iter_ordered(self) -> impl Iterator<Item = (DocId, Record)> {
        self.records.into_iter()
    }
}

/// The in-memory record store of one collection: an ordered map from
/// [DocId] to [Record] behind a reader-writer lock.
///
/// The map is a persistent (structurally shared) ordered map, so readers
/// take O(1) snapshots and are never blocked by in-progress mutation beyond
/// the brief lock hold for the clone.
#[derive(Clone)]
pub struct RecordStore {
    inner: Arc<RecordStoreInner>,
}

struct RecordStoreInner {
    records: RwLock<OrdMap<DocId, Record>>,
    revision_counter: AtomicU64,
}

impl RecordStore {
    pub fn new() -> Self {
        RecordStore {
            inner: Arc::new(RecordStoreInner {
                records: RwLock::new(OrdMap::new()),
                revision_counter: AtomicU64::new(1),
            }),
        }
    }

    fn next_revision(&self) -> u64 {
        self.inner.revision_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Inserts a new record. The id must not already exist.
    pub fn insert(&self, id: DocId, document: Document) -> DocketResult<u64> {
        let revision = self.next_revision();
        let mut records = self.inner.records.write();
        if records.contains_key(&id) {
            log::error!("Record id {} already exists in store", id);
            return Err(DocketError::new(
                &format!("Record id {} already exists", id),
                ErrorKind::InternalError,
            ));
        }
        records.insert(id, Record { document, revision });
        Ok(revision)
    }

    /// Replaces the document stored under `id`. Returns the new revision,
    /// or `None` when the record does not exist.
    pub fn update(&self, id: DocId, document: Document) -> Option<u64> {
        let revision = self.next_revision();
        let mut records = self.inner.records.write();
        if !records.contains_key(&id) {
            return None;
        }
        records.insert(id, Record { document, revision });
        Some(revision)
    }

    /// Removes the record under `id`, returning its last document.
    pub fn remove(&self, id: &DocId) -> Option<Document> {
        let mut records = self.inner.records.write();
        records.remove(id).map(|record| record.document)
    }

    pub fn get(&self, id: &DocId) -> Option<Document> {
        let records = self.inner.records.read();
        records.get(id).map(|record| record.document.clone())
    }

    pub fn get_record(&self, id: &DocId) -> Option<Record> {
        let records = self.inner.records.read();
        records.get(id).cloned()
    }

    pub fn contains(&self, id: &DocId) -> bool {
        let records = self.inner.records.read();
        records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        let records = self.inner.records.read();
        records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every record. Used by collection drop.
    pub fn clear(&self) {
        let mut records = self.inner.records.write();
        records.clear();
    }

    /// Takes an O(1) point-in-time snapshot.
    pub fn snapshot(&self) -> StoreSnapshot {
        let records = self.inner.records.read();
        StoreSnapshot {
            records: records.clone(),
        }
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}
