use crate::collection::{DocId, Document};
use crate::common::{SortOrder, Value};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use crate::filter::matches;
use crate::index::key::{IndexBounds, IndexKey, KeyPart};
use crate::index::IndexDescriptor;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Value extraction result for one key-pattern field.
enum Extracted {
    /// A scalar (or whole-document) key component.
    Single(Value),
    /// An array contributed one key per element (multikey).
    Spread(Vec<Value>),
}

/// An ordered secondary index over one or more field paths.
///
/// Entries map computed [IndexKey]s to the set of record ids holding that
/// key. Per-document maintenance is atomic: uniqueness is checked for every
/// computed key before any entry is written, so a rejected write leaves the
/// index untouched.
///
/// Array-valued fields are spread into one key per element; the first such
/// write flips the sticky multikey flag. Two array-valued fields in one
/// compound key are rejected with `ParallelArrays`.
#[derive(Debug, Clone)]
pub struct BTreeIndex {
    inner: Arc<BTreeIndexInner>,
}

#[derive(Debug)]
struct BTreeIndexInner {
    descriptor: IndexDescriptor,
    entries: RwLock<BTreeMap<IndexKey, BTreeSet<DocId>>>,
    multikey: AtomicBool,
    max_key_bytes: usize,
}

impl BTreeIndex {
    pub fn new(descriptor: IndexDescriptor, max_key_bytes: usize) -> Self {
        BTreeIndex {
            inner: Arc::new(BTreeIndexInner {
                descriptor,
                entries: RwLock::new(BTreeMap::new()),
                multikey: AtomicBool::new(false),
                max_key_bytes,
            }),
        }
    }

    /// Descriptor snapshot including the current multikey status.
    pub fn descriptor(&self) -> IndexDescriptor {
        self.inner
            .descriptor
            .clone()
            .with_multikey(self.is_multikey())
    }

    pub fn name(&self) -> &str {
        self.inner.descriptor.name()
    }

    pub fn is_multikey(&self) -> bool {
        self.inner.multikey.load(Ordering::Acquire)
    }

    pub fn is_unique(&self) -> bool {
        self.inner.descriptor.is_unique()
    }

    /// Whether this document belongs in the index at all (partial filter).
    pub fn accepts(&self, doc: &Document) -> DocketResult<bool> {
        match self.inner.descriptor.partial_filter() {
            Some(filter) => matches(doc, filter),
            None => Ok(true),
        }
    }

    /// Computes every index key this document contributes.
    pub fn compute_keys(&self, doc: &Document) -> DocketResult<Vec<IndexKey>> {
        let pairs = self.inner.descriptor.fields().pairs();
        let mut extracted = Vec::with_capacity(pairs.len());
        let mut spread_field: Option<&str> = None;

        for (path, _) in pairs {
            let value = doc.get(path);
            match value {
                Value::Array(items) => {
                    if let Some(previous) = spread_field {
                        log::error!(
                            "Cannot index parallel arrays: {} and {}",
                            previous,
                            path
                        );
                        return Err(DocketError::new(
                            &format!("Cannot index parallel arrays: {} and {}", previous, path),
                            ErrorKind::ParallelArrays,
                        ));
                    }
                    spread_field = Some(path.as_str());
                    if items.is_empty() {
                        // empty arrays index as null so they stay findable
                        extracted.push(Extracted::Spread(vec![Value::Null]));
                    } else {
                        extracted.push(Extracted::Spread(items));
                    }
                }
                other => extracted.push(Extracted::Single(other)),
            }
        }

        let spread_len = extracted
            .iter()
            .find_map(|e| match e {
                Extracted::Spread(items) => Some(items.len()),
                _ => None,
            })
            .unwrap_or(1);

        let mut keys = Vec::with_capacity(spread_len);
        for slot in 0..spread_len {
            let parts: Vec<KeyPart> = extracted
                .iter()
                .zip(pairs.iter())
                .map(|(e, (_, order))| KeyPart {
                    value: match e {
                        Extracted::Single(v) => v.clone(),
                        Extracted::Spread(items) => items[slot].clone(),
                    },
                    descending: *order == SortOrder::Descending,
                })
                .collect();
            let key = IndexKey::new(parts);
            if key.byte_size() > self.inner.max_key_bytes {
                log::error!(
                    "Index key of {} bytes exceeds the {} byte limit",
                    key.byte_size(),
                    self.inner.max_key_bytes
                );
                return Err(DocketError::new(
                    &format!("Index key exceeds {} bytes", self.inner.max_key_bytes),
                    ErrorKind::KeyTooLong,
                ));
            }
            keys.push(key);
        }

        if spread_field.is_some() {
            self.inner.multikey.store(true, Ordering::Release);
        }
        Ok(keys)
    }

    /// Adds one document's entries. All-or-nothing: every key passes the
    /// uniqueness check before any entry is written.
    pub fn add_document(&self, id: DocId, doc: &Document) -> DocketResult<()> {
        if !self.accepts(doc)? {
            return Ok(());
        }
        let keys = self.compute_keys(doc)?;
        let mut entries = self.inner.entries.write();

        if self.is_unique() {
            for key in &keys {
                if let Some(ids) = entries.get(key) {
                    if !ids.is_empty() && !ids.contains(&id) {
                        log::error!(
                            "Duplicate key in unique index {}: {:?}",
                            self.name(),
                            key
                        );
                        return Err(DocketError::new(
                            &format!("Duplicate key in unique index {}", self.name()),
                            ErrorKind::DuplicateKey,
                        ));
                    }
                }
            }
        }

        for key in keys {
            entries.entry(key).or_default().insert(id);
        }
        Ok(())
    }

    /// Removes one document's entries, computed from the stored document.
    pub fn remove_document(&self, id: DocId, doc: &Document) -> DocketResult<()> {
        if !self.accepts(doc)? {
            return Ok(());
        }
        let keys = self.compute_keys(doc)?;
        let mut entries = self.inner.entries.write();
        for key in keys {
            if let Some(ids) = entries.get_mut(&key) {
                ids.remove(&id);
                if ids.is_empty() {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    /// Scans entries satisfying `bounds` in key order (reversed when
    /// `reverse`). Returns the matched `(key, id)` pairs and the number of
    /// index entries examined.
    pub fn scan(&self, bounds: &IndexBounds, reverse: bool) -> (Vec<(IndexKey, DocId)>, u64) {
        let entries = self.inner.entries.read();
        let mut results = Vec::new();
        let mut examined = 0u64;

        let mut visit = |key: &IndexKey, ids: &BTreeSet<DocId>| {
            examined += ids.len() as u64;
            if bounds.matches_key(key) {
                for id in ids {
                    results.push((key.clone(), *id));
                }
            }
        };

        if reverse {
            for (key, ids) in entries.iter().rev() {
                visit(key, ids);
            }
        } else {
            for (key, ids) in entries.iter() {
                visit(key, ids);
            }
        }
        (results, examined)
    }

    /// Number of distinct keys currently stored.
    pub fn key_count(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Drops every entry. Used by index drop and collection drop.
    pub fn clear(&self) {
        self.inner.entries.write().clear();
    }
}
