use crate::collection::Document;
use crate::errors::DocketResult;

/// Client-side cursor over a query result stream.
///
/// Wraps the lazy execution iterator and caches produced documents so the
/// cursor can be rewound with [`DocumentCursor::reset`] and sized with
/// [`DocumentCursor::size`] without re-running the query.
pub struct DocumentCursor {
    underlying: Option<Box<dyn Iterator<Item = DocketResult<Document>> + Send>>,
    cache: Vec<DocketResult<Document>>,
    current_index: usize,
}

impl std::fmt::Debug for DocumentCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCursor")
            .field("drained", &self.underlying.is_none())
            .field("cached", &self.cache.len())
            .field("current_index", &self.current_index)
            .finish()
    }
}

impl DocumentCursor {
    pub fn new(iter: Box<dyn Iterator<Item = DocketResult<Document>> + Send>) -> Self {
        DocumentCursor {
            underlying: Some(iter),
            cache: Vec::new(),
            current_index: 0,
        }
    }

    /// Resets the cursor so that it can be iterated from the beginning.
    pub fn reset(&mut self) {
        self.current_index = 0;
    }

    /// Total number of results. Drains the underlying stream on first call.
    pub fn size(&mut self) -> usize {
        if self.underlying.is_none() {
            self.reset();
            return self.cache.len();
        }
        for _ in self.by_ref() {}
        self.reset();
        self.cache.len()
    }

    /// Rewinds and returns the first result.
    pub fn first(&mut self) -> Option<DocketResult<Document>> {
        self.reset();
        self.next()
    }

    /// Collects every remaining document, failing on the first error.
    pub fn try_collect(&mut self) -> DocketResult<Vec<Document>> {
        let mut docs = Vec::new();
        for item in self.by_ref() {
            docs.push(item?);
        }
        Ok(docs)
    }
}

impl Iterator for DocumentCursor {
    type Item = DocketResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index < self.cache.len() {
            let result = self.cache[self.current_index].clone();
            self.current_index += 1;
            return Some(result);
        }

        if let Some(ref mut iter) = self.underlying {
            if let Some(item) = iter.next() {
                self.cache.push(item.clone());
                self.current_index += 1;
                return Some(item);
            }
            // exhausted: drop the iterator (and any snapshot it pins)
            self.underlying = None;
        }
        None
    }
}
