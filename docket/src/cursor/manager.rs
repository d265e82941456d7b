use crate::collection::Document;
use crate::common::SortSpec;
use crate::cursor::EnsureSorted;
use crate::errors::{DocketError, DocketResult, ErrorKind};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of a server-side cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Open,
    Exhausted,
    Invalidated,
    Closed,
}

/// One batch handed back to the client. `cursor_id` is zero once the
/// cursor is exhausted.
#[derive(Debug)]
pub struct CursorBatch {
    pub cursor_id: u64,
    pub docs: Vec<Document>,
    pub exhausted: bool,
}

type ResultStream = Box<dyn Iterator<Item = DocketResult<Document>> + Send>;

struct ServerCursor {
    collection: String,
    state: CursorState,
    stream: Option<ResultStream>,
    ensure_sorted: Option<EnsureSorted>,
    default_batch_size: usize,
    last_used: Instant,
}

/// Registry of open server-side cursors.
///
/// `find`/`aggregate` register their result stream here and hand back the
/// first batch; `get_more` continues iteration. Cursors die by exhaustion,
/// explicit kill, idle timeout (checked lazily on access), or invalidation
/// when their collection is dropped.
#[derive(Clone)]
pub struct CursorManager {
    inner: Arc<CursorManagerInner>,
}

struct CursorManagerInner {
    cursors: DashMap<u64, Mutex<ServerCursor>>,
    next_id: AtomicU64,
    idle_timeout: Duration,
}

impl CursorManager {
    pub fn new(idle_timeout: Duration) -> Self {
        CursorManager {
            inner: Arc::new(CursorManagerInner {
                cursors: DashMap::new(),
                next_id: AtomicU64::new(1),
                idle_timeout,
            }),
        }
    }

    /// Opens a cursor over a result stream and pulls the first batch. When
    /// the stream drains within the first batch, no cursor is registered
    /// and the returned id is zero.
    pub fn open(
        &self,
        collection: &str,
        stream: ResultStream,
        batch_size: usize,
        sort: Option<SortSpec>,
    ) -> DocketResult<CursorBatch> {
        let mut cursor = ServerCursor {
            collection: collection.to_string(),
            state: CursorState::Open,
            stream: Some(stream),
            ensure_sorted: sort.map(EnsureSorted::new),
            default_batch_size: batch_size,
            last_used: Instant::now(),
        };

        let (docs, exhausted) = drain_batch(&mut cursor, batch_size)?;
        if exhausted {
            return Ok(CursorBatch {
                cursor_id: 0,
                docs,
                exhausted: true,
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.cursors.insert(id, Mutex::new(cursor));
        Ok(CursorBatch {
            cursor_id: id,
            docs,
            exhausted: false,
        })
    }

    /// Continues a cursor. Unknown, timed-out, and invalidated cursors all
    /// surface as `CursorNotFound`.
    pub fn get_more(&self, cursor_id: u64, batch_size: Option<usize>) -> DocketResult<CursorBatch> {
        let Some(entry) = self.inner.cursors.get(&cursor_id) else {
            return Err(cursor_not_found(cursor_id));
        };

        let result = {
            let mut cursor = entry.lock();
            if cursor.state == CursorState::Invalidated {
                drop(cursor);
                drop(entry);
                self.inner.cursors.remove(&cursor_id);
                log::warn!("Cursor {} was invalidated by a collection drop", cursor_id);
                return Err(cursor_not_found(cursor_id));
            }
            if cursor.last_used.elapsed() > self.inner.idle_timeout {
                drop(cursor);
                drop(entry);
                self.inner.cursors.remove(&cursor_id);
                log::warn!("Cursor {} timed out", cursor_id);
                return Err(cursor_not_found(cursor_id));
            }

            cursor.last_used = Instant::now();
            let size = batch_size.unwrap_or(cursor.default_batch_size);
            drain_batch(&mut cursor, size)
        };

        match result {
            Ok((docs, exhausted)) => {
                if exhausted {
                    drop(entry);
                    self.inner.cursors.remove(&cursor_id);
                    Ok(CursorBatch {
                        cursor_id: 0,
                        docs,
                        exhausted: true,
                    })
                } else {
                    Ok(CursorBatch {
                        cursor_id,
                        docs,
                        exhausted: false,
                    })
                }
            }
            Err(e) => {
                // a failed pull closes the cursor
                drop(entry);
                self.inner.cursors.remove(&cursor_id);
                Err(e)
            }
        }
    }

    /// Explicitly closes a cursor. Returns whether it existed.
    pub fn kill(&self, cursor_id: u64) -> bool {
        self.inner.cursors.remove(&cursor_id).is_some()
    }

    /// Marks every cursor over a collection invalidated and releases their
    /// streams. A later `get_more` reports `CursorNotFound`.
    pub fn invalidate_collection(&self, collection: &str) {
        for entry in self.inner.cursors.iter() {
            let mut cursor = entry.lock();
            if cursor.collection == collection && cursor.state == CursorState::Open {
                cursor.state = CursorState::Invalidated;
                cursor.stream = None;
            }
        }
    }

    /// Number of currently open cursors.
    pub fn open_cursors(&self) -> usize {
        self.inner.cursors.len()
    }
}

fn drain_batch(
    cursor: &mut ServerCursor,
    batch_size: usize,
) -> DocketResult<(Vec<Document>, bool)> {
    let batch_size = batch_size.max(1);
    let mut docs = Vec::with_capacity(batch_size.min(64));
    let mut exhausted = false;

    let Some(stream) = cursor.stream.as_mut() else {
        return Ok((docs, true));
    };

    while docs.len() < batch_size {
        match stream.next() {
            Some(Ok(doc)) => {
                let admitted = match cursor.ensure_sorted.as_mut() {
                    Some(guard) => guard.admit(&doc),
                    None => true,
                };
                if admitted {
                    docs.push(doc);
                }
            }
            Some(Err(e)) => {
                cursor.state = CursorState::Closed;
                cursor.stream = None;
                return Err(e);
            }
            None => {
                exhausted = true;
                break;
            }
        }
    }

    if exhausted {
        cursor.state = CursorState::Exhausted;
        cursor.stream = None;
    }
    Ok((docs, exhausted))
}

fn cursor_not_found(cursor_id: u64) -> DocketError {
    DocketError::new(
        &format!("Cursor {} not found", cursor_id),
        ErrorKind::CursorNotFound,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn stream_of(n: i32) -> ResultStream {
        Box::new((0..n).map(|i| Ok(doc! { n: i })))
    }

    fn manager() -> CursorManager {
        CursorManager::new(Duration::from_secs(600))
    }

    #[test]
    fn test_open_small_result_exhausts_immediately() {
        let manager = manager();
        let batch = manager.open("c", stream_of(3), 10, None).unwrap();
        assert_eq!(batch.cursor_id, 0);
        assert!(batch.exhausted);
        assert_eq!(batch.docs.len(), 3);
        assert_eq!(manager.open_cursors(), 0);
    }

    #[test]
    fn test_get_more_batches_through() {
        let manager = manager();
        let batch = manager.open("c", stream_of(7), 3, None).unwrap();
        assert_eq!(batch.docs.len(), 3);
        assert!(!batch.exhausted);

        let second = manager.get_more(batch.cursor_id, None).unwrap();
        assert_eq!(second.docs.len(), 3);
        assert!(!second.exhausted);

        let third = manager.get_more(batch.cursor_id, None).unwrap();
        assert_eq!(third.docs.len(), 1);
        assert!(third.exhausted);
        assert_eq!(third.cursor_id, 0);

        let err = manager.get_more(batch.cursor_id, None).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::CursorNotFound);
    }

    #[test]
    fn test_unknown_cursor() {
        let manager = manager();
        let err = manager.get_more(12345, None).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::CursorNotFound);
    }

    #[test]
    fn test_kill() {
        let manager = manager();
        let batch = manager.open("c", stream_of(10), 2, None).unwrap();
        assert!(manager.kill(batch.cursor_id));
        assert!(!manager.kill(batch.cursor_id));
        assert!(manager.get_more(batch.cursor_id, None).is_err());
    }

    #[test]
    fn test_invalidation_surfaces_as_not_found() {
        let manager = manager();
        let batch = manager.open("dropped", stream_of(10), 2, None).unwrap();
        manager.invalidate_collection("dropped");
        let err = manager.get_more(batch.cursor_id, None).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::CursorNotFound);
        assert_eq!(manager.open_cursors(), 0);
    }

    #[test]
    fn test_idle_timeout() {
        let manager = CursorManager::new(Duration::from_millis(1));
        let batch = manager.open("c", stream_of(10), 2, None).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let err = manager.get_more(batch.cursor_id, None).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::CursorNotFound);
    }

    #[test]
    fn test_explicit_batch_size_override() {
        let manager = manager();
        let batch = manager.open("c", stream_of(10), 2, None).unwrap();
        let next = manager.get_more(batch.cursor_id, Some(5)).unwrap();
        assert_eq!(next.docs.len(), 5);
    }
}
