use crate::collection::operation::{validate_field_names, CollectionOps, UpdateSpec};
use crate::collection::{
    DeleteOptions, DeleteResult, DocId, Document, FindOptions, InsertResult, UpdateOptions,
    UpdateResult,
};
use crate::common::{OpContext, Value, DOC_ID};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use crate::filter::MatchExpression;
use crate::index::CollectionIndex;

impl CollectionOps {
    /// Inserts one document. Index maintenance is all-or-nothing: if any
    /// index rejects the document, entries already written for it are
    /// rolled back and the store is untouched.
    pub(crate) fn insert_one(&self, mut doc: Document) -> DocketResult<DocId> {
        validate_field_names(&doc)?;

        let record_id = DocId::new();
        let id_value = doc.ensure_id(record_id);
        if matches!(id_value, Value::Array(_)) {
            log::error!("The _id field cannot be an array");
            return Err(DocketError::new(
                "The _id field cannot be an array",
                ErrorKind::BadValue,
            ));
        }

        let _guard = self.write_lock.lock();
        let indexes = self.catalog.snapshot();
        self.link_indexes(record_id, &doc, &indexes)?;
        self.store.insert(record_id, doc)?;
        Ok(record_id)
    }

    /// Inserts a batch, stopping at the first failure. Documents already
    /// inserted stay inserted (per-document atomicity, not batch).
    pub(crate) fn insert_many(&self, docs: Vec<Document>) -> DocketResult<InsertResult> {
        let mut inserted_ids = Vec::with_capacity(docs.len());
        for doc in docs {
            inserted_ids.push(self.insert_one(doc)?);
        }
        Ok(InsertResult { inserted_ids })
    }

    /// Adds one document to every index, unwinding on failure.
    fn link_indexes(
        &self,
        id: DocId,
        doc: &Document,
        indexes: &[CollectionIndex],
    ) -> DocketResult<()> {
        let mut linked = 0;
        for index in indexes {
            if let Err(e) = index.add_document(id, doc) {
                for unwind in &indexes[..linked] {
                    if let Err(unwind_err) = unwind.remove_document(id, doc) {
                        log::warn!(
                            "Failed to unwind index {} after rejected write: {}",
                            unwind.name(),
                            unwind_err
                        );
                    }
                }
                return Err(e);
            }
            linked += 1;
        }
        Ok(())
    }

    /// Removes one document from every index. Failures are logged and
    /// skipped so teardown always completes.
    fn unlink_indexes(&self, id: DocId, doc: &Document, indexes: &[CollectionIndex]) {
        for index in indexes {
            if let Err(e) = index.remove_document(id, doc) {
                log::warn!("Failed to remove index entries from {}: {}", index.name(), e);
            }
        }
    }

    /// Inserts a record under a pre-assigned id without taking the write
    /// lock. Transaction commit holds the lock itself.
    pub(crate) fn raw_insert(&self, id: DocId, mut doc: Document) -> DocketResult<()> {
        validate_field_names(&doc)?;
        doc.ensure_id(id);
        let indexes = self.catalog.snapshot();
        self.link_indexes(id, &doc, &indexes)?;
        self.store.insert(id, doc)?;
        Ok(())
    }

    /// Deletes a record without taking the write lock.
    pub(crate) fn raw_delete(&self, id: DocId, doc: &Document) {
        let indexes = self.catalog.snapshot();
        self.unlink_indexes(id, doc, &indexes);
        self.store.remove(&id);
    }

    /// Replaces the document stored under `id` with `updated`, migrating
    /// index entries atomically.
    pub(crate) fn replace_record(
        &self,
        id: DocId,
        old_doc: &Document,
        updated: Document,
    ) -> DocketResult<()> {
        validate_field_names(&updated)?;
        if updated.id_value() != old_doc.id_value() {
            log::error!("The _id field is immutable");
            return Err(DocketError::new(
                "The _id field is immutable",
                ErrorKind::InvalidOperation,
            ));
        }

        let indexes = self.catalog.snapshot();
        self.unlink_indexes(id, old_doc, &indexes);
        if let Err(e) = self.link_indexes(id, &updated, &indexes) {
            // restore the old entries so the record stays queryable
            if let Err(restore_err) = self.relink_old(id, old_doc, &indexes) {
                log::warn!(
                    "Failed to restore index entries after rejected update: {}",
                    restore_err
                );
            }
            return Err(e);
        }
        self.store.update(id, updated);
        Ok(())
    }

    fn relink_old(
        &self,
        id: DocId,
        doc: &Document,
        indexes: &[CollectionIndex],
    ) -> DocketResult<()> {
        for index in indexes {
            index.add_document(id, doc)?;
        }
        Ok(())
    }

    /// Applies an update to every document matching `filter` (or the first,
    /// without `multi`), optionally upserting.
    pub(crate) fn update(
        &self,
        filter: &MatchExpression,
        spec: &UpdateSpec,
        options: &UpdateOptions,
        ctx: &OpContext,
    ) -> DocketResult<UpdateResult> {
        let _guard = self.write_lock.lock();

        let matches = self.collect_matches(filter, options.multi, ctx)?;
        if matches.is_empty() {
            if options.upsert {
                let seeded = self.seed_upsert(filter, spec)?;
                let record_id = {
                    // the write lock is already held; insert inline
                    let mut doc = seeded;
                    validate_field_names(&doc)?;
                    let record_id = DocId::new();
                    doc.ensure_id(record_id);
                    let indexes = self.catalog.snapshot();
                    self.link_indexes(record_id, &doc, &indexes)?;
                    self.store.insert(record_id, doc)?;
                    record_id
                };
                let upserted = self.store.get(&record_id).and_then(|d| {
                    d.id_value().cloned()
                });
                return Ok(UpdateResult {
                    matched_count: 0,
                    modified_count: 0,
                    upserted_id: upserted,
                });
            }
            return Ok(UpdateResult::default());
        }

        let mut modified = 0;
        for (id, old_doc) in &matches {
            ctx.checkpoint()?;
            let updated = spec.apply(old_doc, false)?;
            if &updated != old_doc {
                self.replace_record(*id, old_doc, updated)?;
                modified += 1;
            }
        }
        Ok(UpdateResult {
            matched_count: matches.len() as u64,
            modified_count: modified,
            upserted_id: None,
        })
    }

    /// Atomic read-modify-write of the first matching document. Returns the
    /// pre-image, or the post-image with `return_new`.
    pub(crate) fn find_one_and_update(
        &self,
        filter: &MatchExpression,
        spec: &UpdateSpec,
        return_new: bool,
        ctx: &OpContext,
    ) -> DocketResult<Option<Document>> {
        let _guard = self.write_lock.lock();
        let matches = self.collect_matches(filter, false, ctx)?;
        let Some((id, old_doc)) = matches.into_iter().next() else {
            return Ok(None);
        };
        let updated = spec.apply(&old_doc, false)?;
        if updated != old_doc {
            self.replace_record(id, &old_doc, updated.clone())?;
        }
        Ok(Some(if return_new { updated } else { old_doc }))
    }

    /// Deletes matching documents.
    pub(crate) fn delete(
        &self,
        filter: &MatchExpression,
        options: &DeleteOptions,
        ctx: &OpContext,
    ) -> DocketResult<DeleteResult> {
        let _guard = self.write_lock.lock();
        let matches = self.collect_matches(filter, options.multi, ctx)?;
        let indexes = self.catalog.snapshot();
        let mut deleted = 0;
        for (id, doc) in matches {
            ctx.checkpoint()?;
            self.unlink_indexes(id, &doc, &indexes);
            if self.store.remove(&id).is_some() {
                deleted += 1;
            }
        }
        Ok(DeleteResult {
            deleted_count: deleted,
        })
    }

    /// Runs the filter through the planner and collects matching records.
    fn collect_matches(
        &self,
        filter: &MatchExpression,
        multi: bool,
        ctx: &OpContext,
    ) -> DocketResult<Vec<(DocId, Document)>> {
        let options = FindOptions::new();
        let plan = self.planner.create_plan(filter, &options, &self.catalog)?;
        let stats = crate::collection::ExecStats::new();
        let iter = self.execute_plan(&plan, ctx, &stats)?;

        let mut matched = Vec::new();
        for item in iter {
            let (id, doc) = item?;
            matched.push((id, doc));
            if !multi {
                break;
            }
        }
        Ok(matched)
    }

    /// Builds the upsert seed: equality conjuncts of the filter merged with
    /// the update (operators applied with `$setOnInsert` active).
    fn seed_upsert(&self, filter: &MatchExpression, spec: &UpdateSpec) -> DocketResult<Document> {
        let mut seed = Document::new();
        if !spec.is_replacement() {
            for conjunct in filter.conjuncts() {
                if let MatchExpression::Eq { field, value } = conjunct {
                    if field != DOC_ID && !field.starts_with('$') {
                        seed.put_path(field, value.clone())?;
                    }
                }
            }
        }
        spec.apply(&seed, true)
    }
}
