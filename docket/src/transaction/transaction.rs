use crate::collection::operation::UpdateSpec;
use crate::collection::{DocId, DocketCollection, Document};
use crate::database::Docket;
use crate::errors::{DocketError, DocketResult, ErrorKind};
use crate::filter::{matches, MatchExpression};
use crate::store::StoreSnapshot;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Transaction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    Aborted,
}

/// Per-collection transactional view: the snapshot plus the local overlay.
struct TxView {
    collection: DocketCollection,
    snapshot: StoreSnapshot,
    inserted: IndexMap<DocId, Document>,
    /// id -> (new document, base revision from the snapshot)
    updated: HashMap<DocId, (Document, u64)>,
    /// id -> (pre-image, base revision from the snapshot)
    deleted: HashMap<DocId, (Document, u64)>,
}

impl TxView {
    /// Effective records visible inside the transaction, in id order for
    /// snapshot records followed by this transaction's inserts.
    fn visible(&self) -> Vec<(DocId, Document)> {
        let mut rows = Vec::new();
        for (id, record) in self.snapshot.iter() {
            if self.deleted.contains_key(&id) {
                continue;
            }
            match self.updated.get(&id) {
                Some((doc, _)) => rows.push((id, doc.clone())),
                None => rows.push((id, record.document)),
            }
        }
        for (id, doc) in &self.inserted {
            rows.push((*id, doc.clone()));
        }
        rows
    }

    fn base_revision(&self, id: &DocId) -> u64 {
        self.snapshot.get(id).map(|r| r.revision).unwrap_or(0)
    }
}

enum UndoOp {
    RemoveInserted { collection: DocketCollection, id: DocId, doc: Document },
    RestoreReplaced { collection: DocketCollection, id: DocId, old: Document, new: Document },
    ReinsertDeleted { collection: DocketCollection, id: DocId, doc: Document },
}

/// A multi-document transaction. See the module docs for the isolation
/// contract.
pub struct Transaction {
    db: Docket,
    state: TxState,
    views: IndexMap<String, TxView>,
}

impl Transaction {
    pub(crate) fn new(db: Docket) -> Self {
        Transaction {
            db,
            state: TxState::Active,
            views: IndexMap::new(),
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    fn ensure_active(&self) -> DocketResult<()> {
        if self.state != TxState::Active {
            log::error!("Transaction is no longer active");
            return Err(DocketError::new(
                "Transaction is no longer active",
                ErrorKind::TransactionAborted,
            ));
        }
        Ok(())
    }

    fn view(&mut self, collection: &str) -> DocketResult<&mut TxView> {
        if !self.views.contains_key(collection) {
            let handle = self.db.collection(collection)?;
            let snapshot = handle.ops().store.snapshot();
            self.views.insert(
                collection.to_string(),
                TxView {
                    collection: handle,
                    snapshot,
                    inserted: IndexMap::new(),
                    updated: HashMap::new(),
                    deleted: HashMap::new(),
                },
            );
        }
        self.views.get_mut(collection).ok_or_else(|| {
            DocketError::new("Transaction view missing", ErrorKind::InternalError)
        })
    }

    /// Finds documents in the transaction's consistent view: the snapshot
    /// plus this transaction's own writes.
    pub fn find(
        &mut self,
        collection: &str,
        filter: &MatchExpression,
    ) -> DocketResult<Vec<Document>> {
        self.ensure_active()?;
        let view = self.view(collection)?;
        let mut results = Vec::new();
        for (_, doc) in view.visible() {
            if matches(&doc, filter)? {
                results.push(doc);
            }
        }
        Ok(results)
    }

    /// Buffers an insert.
    pub fn insert(&mut self, collection: &str, mut doc: Document) -> DocketResult<DocId> {
        self.ensure_active()?;
        crate::collection::operation::validate_field_names(&doc)?;
        let view = self.view(collection)?;
        let id = DocId::new();
        doc.ensure_id(id);
        view.inserted.insert(id, doc);
        Ok(id)
    }

    /// Buffers an update of every matching document.
    pub fn update(
        &mut self,
        collection: &str,
        filter: &MatchExpression,
        update: &Document,
    ) -> DocketResult<u64> {
        self.ensure_active()?;
        let spec = UpdateSpec::parse(update)?;
        let view = self.view(collection)?;

        let mut updated_count = 0;
        for (id, doc) in view.visible() {
            if !matches(&doc, filter)? {
                continue;
            }
            let new_doc = spec.apply(&doc, false)?;
            if view.inserted.contains_key(&id) {
                view.inserted.insert(id, new_doc);
            } else {
                let base = view.base_revision(&id);
                view.updated.insert(id, (new_doc, base));
            }
            updated_count += 1;
        }
        Ok(updated_count)
    }

    /// Buffers a delete of every matching document.
    pub fn delete(
        &mut self,
        collection: &str,
        filter: &MatchExpression,
    ) -> DocketResult<u64> {
        self.ensure_active()?;
        let view = self.view(collection)?;

        let mut deleted_count = 0;
        for (id, doc) in view.visible() {
            if !matches(&doc, filter)? {
                continue;
            }
            if view.inserted.shift_remove(&id).is_some() {
                deleted_count += 1;
                continue;
            }
            view.updated.remove(&id);
            let base = view.base_revision(&id);
            let pre_image = view
                .snapshot
                .get(&id)
                .map(|r| r.document.clone())
                .unwrap_or(doc);
            view.deleted.insert(id, (pre_image, base));
            deleted_count += 1;
        }
        Ok(deleted_count)
    }

    /// Commits: verifies no committed writer touched this transaction's
    /// write set since its snapshots, then applies the buffered writes
    /// through the normal index-maintaining write path.
    pub fn commit(mut self) -> DocketResult<()> {
        self.ensure_active()?;

        // lock collections in name order so concurrent commits cannot
        // deadlock
        self.views.sort_keys();
        let guards: Vec<_> = self
            .views
            .values()
            .map(|view| view.collection.ops().write_lock.lock())
            .collect();

        // first-committer-wins: every buffered update/delete must still see
        // its base revision
        for view in self.views.values() {
            for (id, (_, base)) in view.updated.iter().chain(view.deleted.iter()) {
                let current = view.collection.ops().store.get_record(id);
                let conflicted = match current {
                    Some(record) => record.revision != *base,
                    None => true,
                };
                if conflicted {
                    drop(guards);
                    self.state = TxState::Aborted;
                    log::warn!("Transaction aborted on write conflict for {}", id);
                    return Err(DocketError::new(
                        &format!("Write conflict on record {}", id),
                        ErrorKind::WriteConflict,
                    ));
                }
            }
        }

        // apply with an undo log so a failure mid-commit leaves nothing
        // half-applied
        let mut undo: Vec<UndoOp> = Vec::new();
        let mut failure: Option<DocketError> = None;

        'apply: for view in self.views.values() {
            let ops = view.collection.ops();
            for (id, (new_doc, _)) in &view.updated {
                let Some(old) = ops.store.get(id) else {
                    failure = Some(DocketError::new(
                        &format!("Record {} vanished during commit", id),
                        ErrorKind::WriteConflict,
                    ));
                    break 'apply;
                };
                if let Err(e) = ops.replace_record(*id, &old, new_doc.clone()) {
                    failure = Some(e);
                    break 'apply;
                }
                undo.push(UndoOp::RestoreReplaced {
                    collection: view.collection.clone(),
                    id: *id,
                    old,
                    new: new_doc.clone(),
                });
            }
            for (id, (pre_image, _)) in &view.deleted {
                ops.raw_delete(*id, pre_image);
                undo.push(UndoOp::ReinsertDeleted {
                    collection: view.collection.clone(),
                    id: *id,
                    doc: pre_image.clone(),
                });
            }
            for (id, doc) in &view.inserted {
                if let Err(e) = ops.raw_insert(*id, doc.clone()) {
                    failure = Some(e);
                    break 'apply;
                }
                undo.push(UndoOp::RemoveInserted {
                    collection: view.collection.clone(),
                    id: *id,
                    doc: doc.clone(),
                });
            }
        }

        if let Some(e) = failure {
            for op in undo.into_iter().rev() {
                match op {
                    UndoOp::RemoveInserted { collection, id, doc } => {
                        collection.ops().raw_delete(id, &doc);
                    }
                    UndoOp::RestoreReplaced { collection, id, old, new } => {
                        if let Err(undo_err) = collection.ops().replace_record(id, &new, old) {
                            log::warn!("Failed to undo commit step: {}", undo_err);
                        }
                    }
                    UndoOp::ReinsertDeleted { collection, id, doc } => {
                        if let Err(undo_err) = collection.ops().raw_insert(id, doc) {
                            log::warn!("Failed to undo commit step: {}", undo_err);
                        }
                    }
                }
            }
            drop(guards);
            self.state = TxState::Aborted;
            return Err(e);
        }

        drop(guards);
        self.state = TxState::Committed;
        Ok(())
    }

    /// Discards the buffered writes.
    pub fn abort(mut self) -> DocketResult<()> {
        self.ensure_active()?;
        self.state = TxState::Aborted;
        self.views.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Docket;
    use crate::doc;
    use crate::filter::{all, field};

    fn db() -> Docket {
        Docket::builder().open().unwrap()
    }

    #[test]
    fn test_snapshot_isolation_for_reads() {
        let db = db();
        let coll = db.collection("c").unwrap();
        coll.insert(doc! { n: 1 }).unwrap();

        let session = db.create_session();
        let mut tx = session.begin_transaction().unwrap();
        // first touch takes the snapshot
        assert_eq!(tx.find("c", &all()).unwrap().len(), 1);

        // a write outside the transaction is invisible inside it
        coll.insert(doc! { n: 2 }).unwrap();
        assert_eq!(tx.find("c", &all()).unwrap().len(), 1);
        tx.abort().unwrap();
    }

    #[test]
    fn test_read_your_own_writes() {
        let db = db();
        db.collection("c").unwrap().insert(doc! { n: 1 }).unwrap();

        let session = db.create_session();
        let mut tx = session.begin_transaction().unwrap();
        tx.insert("c", doc! { n: 2 }).unwrap();
        tx.update("c", &field("n").eq(1.into()), &doc! { "$set": { n: 10 } })
            .unwrap();

        let visible = tx.find("c", &all()).unwrap();
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().any(|d| d.get("n") == 10.into()));

        // nothing is visible outside before commit
        let outside = db.collection("c").unwrap();
        assert_eq!(outside.count(all()).unwrap(), 1);
        assert_eq!(outside.count(field("n").eq(10.into())).unwrap(), 0);

        tx.commit().unwrap();
        assert_eq!(outside.count(all()).unwrap(), 2);
        assert_eq!(outside.count(field("n").eq(10.into())).unwrap(), 1);
    }

    #[test]
    fn test_abort_discards_writes() {
        let db = db();
        let coll = db.collection("c").unwrap();
        coll.insert(doc! { n: 1 }).unwrap();

        let session = db.create_session();
        let mut tx = session.begin_transaction().unwrap();
        tx.delete("c", &all()).unwrap();
        assert!(tx.find("c", &all()).unwrap().is_empty());
        tx.abort().unwrap();

        assert_eq!(coll.count(all()).unwrap(), 1);
    }

    #[test]
    fn test_write_conflict_aborts_later_committer() {
        let db = db();
        let coll = db.collection("c").unwrap();
        coll.insert(doc! { n: 1 }).unwrap();

        let session = db.create_session();
        let mut tx1 = session.begin_transaction().unwrap();
        let mut tx2 = session.begin_transaction().unwrap();
        tx1.update("c", &all(), &doc! { "$set": { who: "tx1" } }).unwrap();
        tx2.update("c", &all(), &doc! { "$set": { who: "tx2" } }).unwrap();

        tx1.commit().unwrap();
        let err = tx2.commit().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::WriteConflict);

        assert_eq!(coll.count(field("who").eq("tx1".into())).unwrap(), 1);
    }

    #[test]
    fn test_tx_delete_then_commit() {
        let db = db();
        let coll = db.collection("c").unwrap();
        coll.insert(doc! { n: 1 }).unwrap();
        coll.insert(doc! { n: 2 }).unwrap();

        let session = db.create_session();
        let mut tx = session.begin_transaction().unwrap();
        assert_eq!(tx.delete("c", &field("n").eq(1.into())).unwrap(), 1);
        tx.commit().unwrap();

        assert_eq!(coll.count(all()).unwrap(), 1);
    }

    #[test]
    fn test_operations_after_commit_fail() {
        let db = db();
        db.collection("c").unwrap();
        let session = db.create_session();
        let tx = session.begin_transaction().unwrap();
        tx.commit().unwrap();
        // the transaction was consumed; a fresh one is required. The state
        // check also guards the API when a transaction is held open:
        let mut tx = session.begin_transaction().unwrap();
        tx.insert("c", doc! { n: 1 }).unwrap();
        tx.commit().unwrap();
    }
}
