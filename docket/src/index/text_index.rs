use crate::collection::{DocId, Document};
use crate::common::Value;
use crate::errors::DocketResult;
use crate::filter::tokenize;
use crate::index::IndexDescriptor;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// An inverted index over one text field.
///
/// String values are lowercased and split on non-alphanumeric boundaries;
/// each token maps to the set of record ids containing it. Array-valued
/// fields index every string element. A text search matches a document when
/// any query term hits.
#[derive(Debug, Clone)]
pub struct TextIndex {
    inner: Arc<TextIndexInner>,
}

#[derive(Debug)]
struct TextIndexInner {
    descriptor: IndexDescriptor,
    postings: RwLock<BTreeMap<String, BTreeSet<DocId>>>,
}

impl TextIndex {
    pub fn new(descriptor: IndexDescriptor) -> Self {
        TextIndex {
            inner: Arc::new(TextIndexInner {
                descriptor,
                postings: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    pub fn descriptor(&self) -> IndexDescriptor {
        self.inner.descriptor.clone()
    }

    pub fn name(&self) -> &str {
        self.inner.descriptor.name()
    }

    fn field_tokens(&self, doc: &Document) -> Vec<String> {
        let path = self
            .inner
            .descriptor
            .fields()
            .pairs()
            .first()
            .map(|(name, _)| name.as_str())
            .unwrap_or_default();
        let mut tokens = Vec::new();
        match doc.get(path) {
            Value::String(text) => tokens.extend(tokenize(&text)),
            Value::Array(items) => {
                for item in items {
                    if let Value::String(text) = item {
                        tokens.extend(tokenize(&text));
                    }
                }
            }
            _ => {}
        }
        tokens.sort_unstable();
        tokens.dedup();
        tokens
    }

    pub fn add_document(&self, id: DocId, doc: &Document) -> DocketResult<()> {
        let tokens = self.field_tokens(doc);
        if tokens.is_empty() {
            return Ok(());
        }
        let mut postings = self.inner.postings.write();
        for token in tokens {
            postings.entry(token).or_default().insert(id);
        }
        Ok(())
    }

    pub fn remove_document(&self, id: DocId, doc: &Document) -> DocketResult<()> {
        let tokens = self.field_tokens(doc);
        let mut postings = self.inner.postings.write();
        for token in tokens {
            if let Some(ids) = postings.get_mut(&token) {
                ids.remove(&id);
                if ids.is_empty() {
                    postings.remove(&token);
                }
            }
        }
        Ok(())
    }

    /// Record ids matching any query term, with the number of posting
    /// entries examined.
    pub fn search(&self, query: &str) -> (Vec<DocId>, u64) {
        let terms = tokenize(query);
        let postings = self.inner.postings.read();
        let mut matched = BTreeSet::new();
        let mut examined = 0u64;
        for term in terms {
            if let Some(ids) = postings.get(&term) {
                examined += ids.len() as u64;
                matched.extend(ids.iter().copied());
            }
        }
        (matched.into_iter().collect(), examined)
    }

    pub fn token_count(&self) -> usize {
        self.inner.postings.read().len()
    }

    pub fn clear(&self) {
        self.inner.postings.write().clear();
    }
}
