use crate::aggregate::{execute_pipeline, CollectionProvider, Pipeline, PipelineStage};
use crate::collection::operation::{CollectionOps, UpdateSpec};
use crate::collection::{
    DeleteOptions, DeleteResult, DocId, Document, ExecStats, FindOptions, InsertResult,
    ScanChoice, UpdateOptions, UpdateResult,
};
use crate::common::{Fields, OpContext, SortOrder, Value, DOC_ID, ID_INDEX_NAME};
use crate::cursor::{CursorBatch, CursorManager, DocumentCursor};
use crate::db_config::DocketConfig;
use crate::errors::{DocketError, DocketResult, ErrorKind};
use crate::filter::MatchExpression;
use crate::index::{IndexCatalog, IndexDescriptor, IndexOptions};
use crate::store::RecordStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A named collection of documents.
///
/// Cloning is cheap and every clone shares the same underlying state. The
/// collection owns its record store, index catalog, and planner; cursors
/// live in the database-wide [CursorManager] so a collection drop can
/// invalidate them.
#[derive(Clone)]
pub struct DocketCollection {
    inner: Arc<CollectionInner>,
}

struct CollectionInner {
    name: String,
    ops: CollectionOps,
    cursors: CursorManager,
    provider: Arc<dyn CollectionProvider>,
    config: DocketConfig,
    dropped: AtomicBool,
}

impl DocketCollection {
    pub(crate) fn new(
        name: &str,
        config: DocketConfig,
        cursors: CursorManager,
        provider: Arc<dyn CollectionProvider>,
    ) -> DocketResult<Self> {
        let catalog = IndexCatalog::new(config.max_index_key_bytes);
        // every collection carries a unique index over _id
        catalog.create_btree(
            ID_INDEX_NAME,
            Fields::with_pairs(&[(DOC_ID, SortOrder::Ascending)])?,
            &IndexOptions::unique(),
        )?;
        let ops = CollectionOps::new(name, RecordStore::new(), catalog);
        Ok(DocketCollection {
            inner: Arc::new(CollectionInner {
                name: name.to_string(),
                ops,
                cursors,
                provider,
                config,
                dropped: AtomicBool::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn ops(&self) -> &CollectionOps {
        &self.inner.ops
    }

    fn ensure_active(&self) -> DocketResult<()> {
        if self.inner.dropped.load(Ordering::Acquire) {
            log::error!("Collection {} was dropped", self.inner.name);
            return Err(DocketError::new(
                &format!("Collection {} was dropped", self.inner.name),
                ErrorKind::CollectionNotFound,
            ));
        }
        Ok(())
    }

    fn op_context(&self, options: &FindOptions) -> OpContext {
        let ctx = match options.max_time {
            Some(max_time) => OpContext::with_max_time(max_time),
            None => OpContext::unbounded(),
        };
        ctx.with_yield_interval(self.inner.config.yield_interval)
    }

    /// Inserts one document, returning its record id.
    pub fn insert(&self, doc: Document) -> DocketResult<DocId> {
        self.ensure_active()?;
        self.inner.ops.insert_one(doc)
    }

    /// Inserts a batch of documents.
    pub fn insert_many(&self, docs: Vec<Document>) -> DocketResult<InsertResult> {
        self.ensure_active()?;
        self.inner.ops.insert_many(docs)
    }

    /// Finds matching documents as a client-side cursor.
    pub fn find(&self, filter: MatchExpression, options: FindOptions) -> DocketResult<DocumentCursor> {
        self.ensure_active()?;
        let ctx = self.op_context(&options);
        let stats = ExecStats::new();
        let stream = self.inner.ops.find(&filter, &options, &ctx, &stats)?;
        Ok(DocumentCursor::new(stream))
    }

    /// Finds matching documents as a server-side cursor: the first batch
    /// plus a cursor id for `get_more`.
    pub fn find_batched(
        &self,
        filter: MatchExpression,
        options: FindOptions,
    ) -> DocketResult<CursorBatch> {
        self.ensure_active()?;
        let ctx = self.op_context(&options);
        let stats = ExecStats::new();
        let batch_size = options
            .batch_size
            .unwrap_or(self.inner.config.default_batch_size);
        let sort = options.sort.clone();
        let stream = self.inner.ops.find(&filter, &options, &ctx, &stats)?;
        self.inner
            .cursors
            .open(&self.inner.name, stream, batch_size, sort)
    }

    /// Returns the first matching document, if any.
    pub fn find_one(&self, filter: MatchExpression) -> DocketResult<Option<Document>> {
        let mut cursor = self.find(filter, FindOptions::new().with_limit(1))?;
        cursor.next().transpose()
    }

    /// Updates matching documents.
    pub fn update(
        &self,
        filter: MatchExpression,
        update: &Document,
        options: UpdateOptions,
    ) -> DocketResult<UpdateResult> {
        self.ensure_active()?;
        let spec = UpdateSpec::parse(update)?;
        self.inner
            .ops
            .update(&filter, &spec, &options, &OpContext::unbounded())
    }

    /// Atomically updates the first match, returning its pre- or
    /// post-image.
    pub fn find_one_and_update(
        &self,
        filter: MatchExpression,
        update: &Document,
        return_new: bool,
    ) -> DocketResult<Option<Document>> {
        self.ensure_active()?;
        let spec = UpdateSpec::parse(update)?;
        self.inner
            .ops
            .find_one_and_update(&filter, &spec, return_new, &OpContext::unbounded())
    }

    /// Deletes matching documents.
    pub fn delete(
        &self,
        filter: MatchExpression,
        options: DeleteOptions,
    ) -> DocketResult<DeleteResult> {
        self.ensure_active()?;
        self.inner
            .ops
            .delete(&filter, &options, &OpContext::unbounded())
    }

    /// Number of matching documents.
    pub fn count(&self, filter: MatchExpression) -> DocketResult<u64> {
        self.ensure_active()?;
        self.inner.ops.count(&filter, &OpContext::unbounded())
    }

    /// Distinct values at a path among matching documents.
    pub fn distinct(&self, path: &str, filter: MatchExpression) -> DocketResult<Vec<Value>> {
        self.ensure_active()?;
        self.inner
            .ops
            .distinct(path, &filter, &OpContext::unbounded())
    }

    /// Runs an aggregation pipeline given in document form.
    ///
    /// The pipeline is compiled and validated before anything executes. A
    /// leading `$match` is pushed down into the planner so it can ride an
    /// index instead of filtering a full scan.
    pub fn aggregate(&self, stage_docs: &[Document]) -> DocketResult<DocumentCursor> {
        self.ensure_active()?;
        let stream = self.pipeline_stream(stage_docs)?;
        Ok(DocumentCursor::new(stream))
    }

    /// Like [`Self::aggregate`], but returns a server-side cursor batch.
    pub fn aggregate_batched(
        &self,
        stage_docs: &[Document],
        batch_size: Option<usize>,
    ) -> DocketResult<CursorBatch> {
        self.ensure_active()?;
        let stream = self.pipeline_stream(stage_docs)?;
        let batch_size = batch_size.unwrap_or(self.inner.config.default_batch_size);
        self.inner
            .cursors
            .open(&self.inner.name, stream, batch_size, None)
    }

    /// Compiles the pipeline, plans the source scan (with `$match`
    /// push-down), and chains the executor over it.
    fn pipeline_stream(
        &self,
        stage_docs: &[Document],
    ) -> DocketResult<Box<dyn Iterator<Item = DocketResult<Document>> + Send>> {
        let pipeline = Pipeline::compile(stage_docs)?;
        let ctx = OpContext::unbounded().with_yield_interval(self.inner.config.yield_interval);
        let stats = ExecStats::new();

        let (source_filter, remaining) = match pipeline.stages.split_first() {
            Some((PipelineStage::Match(filter), rest)) => (filter.clone(), rest.to_vec()),
            _ => (MatchExpression::All, pipeline.stages.clone()),
        };

        let plan = self
            .inner
            .ops
            .planner
            .create_plan(&source_filter, &FindOptions::new(), &self.inner.ops.catalog)?;

        // a forward or backward index scan keeps equal leading-field values
        // adjacent, which lets a following $group on that field stream;
        // multikey scans spread one record over several keys and cannot
        // promise adjacency
        let source_sorted_by = match &plan.scan {
            ScanChoice::IndexScan(scan) => {
                let multikey = self
                    .inner
                    .ops
                    .catalog
                    .get(&scan.index_name)
                    .map(|index| index.descriptor().is_multikey())
                    .unwrap_or(true);
                if multikey {
                    None
                } else {
                    scan.key_fields.pairs().first().map(|(path, _)| path.clone())
                }
            }
            _ => None,
        };

        let records = self.inner.ops.execute_plan(&plan, &ctx, &stats)?;
        let source: Box<dyn Iterator<Item = DocketResult<Document>> + Send> =
            Box::new(records.map(|item| item.map(|(_, doc)| doc)));

        let remaining = Pipeline { stages: remaining };
        execute_pipeline(
            &remaining,
            source,
            self.inner.provider.clone(),
            &ctx,
            source_sorted_by,
        )
    }

    /// Creates a b-tree index over a key pattern.
    pub fn create_index(&self, fields: Fields, options: &IndexOptions) -> DocketResult<bool> {
        self.ensure_active()?;
        self.inner
            .ops
            .create_index(fields, options, None, &OpContext::unbounded())
    }

    /// Creates a b-tree index with an explicit name.
    pub fn create_index_named(
        &self,
        name: &str,
        fields: Fields,
        options: &IndexOptions,
    ) -> DocketResult<bool> {
        self.ensure_active()?;
        self.inner
            .ops
            .create_index(fields, options, Some(name), &OpContext::unbounded())
    }

    /// Creates a text index over one field.
    pub fn create_text_index(&self, field_name: &str) -> DocketResult<bool> {
        self.ensure_active()?;
        let fields = Fields::with_names(&[field_name])?;
        self.inner
            .ops
            .create_text_index(fields, None, &OpContext::unbounded())
    }

    pub fn drop_index(&self, name: &str) -> DocketResult<()> {
        self.ensure_active()?;
        self.inner.ops.drop_index(name)
    }

    pub fn drop_indexes(&self) -> DocketResult<Vec<String>> {
        self.ensure_active()?;
        self.inner.ops.drop_all_indexes()
    }

    pub fn list_indexes(&self) -> DocketResult<Vec<IndexDescriptor>> {
        self.ensure_active()?;
        Ok(self.inner.ops.list_indexes())
    }

    /// Describes the chosen plan and its execution counters for a query.
    pub fn explain(
        &self,
        filter: MatchExpression,
        options: FindOptions,
    ) -> DocketResult<Document> {
        self.ensure_active()?;
        let ctx = self.op_context(&options);
        let stats = ExecStats::new();
        let plan = self
            .inner
            .ops
            .planner
            .create_plan(&filter, &options, &self.inner.ops.catalog)?;

        // run to completion so actual counters are available
        let stream = self.inner.ops.find(&filter, &options, &ctx, &stats)?;
        for item in stream {
            item?;
        }

        let mut planner_doc = Document::new();
        planner_doc.put("winningPlan", Value::Document(plan.describe()))?;

        let mut exec_doc = Document::new();
        exec_doc.put("nReturned", Value::I64(stats.returned() as i64))?;
        exec_doc.put("totalDocsExamined", Value::I64(stats.docs_examined() as i64))?;
        exec_doc.put("totalKeysExamined", Value::I64(stats.keys_examined() as i64))?;
        exec_doc.put("covered", plan.is_covered())?;
        if let Some(index_name) = plan.index_name() {
            exec_doc.put("indexName", index_name)?;
        }

        let mut out = Document::new();
        out.put("queryPlanner", Value::Document(planner_doc))?;
        out.put("executionStats", Value::Document(exec_doc))?;
        Ok(out)
    }

    /// Drops the collection: invalidates outstanding cursors, clears
    /// records and indexes, and marks the handle dead.
    pub fn drop_collection(&self) -> DocketResult<()> {
        if self.inner.dropped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.cursors.invalidate_collection(&self.inner.name);
        let _guard = self.inner.ops.write_lock.lock();
        self.inner.ops.catalog.drop_all();
        self.inner.ops.store.clear();
        self.inner.ops.planner.invalidate_cache();
        Ok(())
    }

    /// Every document in storage order, for `$lookup` and reference
    /// resolution.
    pub(crate) fn all_documents(&self) -> DocketResult<Vec<Document>> {
        self.ensure_active()?;
        let snapshot = self.inner.ops.store.snapshot();
        Ok(snapshot
            .into_iter_ordered()
            .map(|(_, record)| record.document)
            .collect())
    }

    /// Fetches a document by record id.
    pub(crate) fn get_by_record_id(&self, id: &DocId) -> DocketResult<Option<Document>> {
        self.ensure_active()?;
        Ok(self.inner.ops.store.get(id))
    }
}
