use crate::collection::operation::CollectionOps;
use crate::collection::{DocId, Document, ExecStats, FindOptions, QueryPlan, ScanChoice};
use crate::common::{OpContext, SortOrder, SortSpec, Value};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use crate::filter::{matches, MatchExpression};
use std::cmp::Ordering;
use std::collections::HashSet;

/// The record stream one plan execution produces.
pub(crate) type DocIter = Box<dyn Iterator<Item = DocketResult<(DocId, Document)>> + Send>;

impl CollectionOps {
    /// Runs a query: plan, execute, project.
    pub(crate) fn find(
        &self,
        filter: &MatchExpression,
        options: &FindOptions,
        ctx: &OpContext,
        stats: &ExecStats,
    ) -> DocketResult<Box<dyn Iterator<Item = DocketResult<Document>> + Send>> {
        let plan = self.planner.create_plan(filter, options, &self.catalog)?;
        let iter = self.execute_plan(&plan, ctx, stats)?;
        let projection = plan.projection.clone();
        let stats = stats.clone();
        Ok(Box::new(iter.map(move |item| {
            let (_, doc) = item?;
            let shaped = match &projection {
                Some(projection) => projection.apply(&doc)?,
                None => doc,
            };
            stats.add_returned(1);
            Ok(shaped)
        })))
    }

    /// Executes a plan into a `(record id, document)` stream. Projection is
    /// left to the caller; everything else (scan, residual filter, sort,
    /// skip, limit) happens here.
    pub(crate) fn execute_plan(
        &self,
        plan: &QueryPlan,
        ctx: &OpContext,
        stats: &ExecStats,
    ) -> DocketResult<DocIter> {
        let mut iter: DocIter = match &plan.or_subplans {
            Some(subplans) => {
                // clause-wise execution with dedup by record identity
                let mut seen: HashSet<DocId> = HashSet::new();
                let mut chained: Vec<DocIter> = Vec::with_capacity(subplans.len());
                for subplan in subplans {
                    chained.push(self.execute_plan(subplan, ctx, stats)?);
                }
                Box::new(chained.into_iter().flatten().filter(move |item| {
                    match item {
                        Ok((id, _)) => seen.insert(*id),
                        Err(_) => true,
                    }
                }))
            }
            None => self.scan_iter(plan, ctx, stats)?,
        };

        if let Some(residual) = &plan.residual {
            let residual = residual.clone();
            iter = Box::new(iter.filter(move |item| match item {
                Ok((_, doc)) => matches(doc, &residual).unwrap_or(false),
                Err(_) => true,
            }));
        }

        if let Some(sort) = &plan.sort {
            if !plan.sort_provided_by_scan {
                // blocking stage: materialize, then sort stably
                let mut rows: Vec<(DocId, Document)> = Vec::new();
                for item in iter {
                    rows.push(item?);
                }
                sort_records(&mut rows, sort);
                iter = Box::new(rows.into_iter().map(Ok));
            }
        }

        if let Some(skip) = plan.skip {
            iter = Box::new(iter.skip(skip));
        }
        if let Some(limit) = plan.limit {
            iter = Box::new(iter.take(limit));
        }
        Ok(iter)
    }

    fn scan_iter(
        &self,
        plan: &QueryPlan,
        ctx: &OpContext,
        stats: &ExecStats,
    ) -> DocketResult<DocIter> {
        match &plan.scan {
            ScanChoice::EmptyScan => Ok(Box::new(std::iter::empty())),
            ScanChoice::CollectionScan => {
                let snapshot = self.store.snapshot();
                let mut ticker = ctx.ticker();
                let stats = stats.clone();
                Ok(Box::new(snapshot.into_iter_ordered().map(move |(id, record)| {
                    ticker.tick()?;
                    stats.add_docs_examined(1);
                    Ok((id, record.document))
                })))
            }
            ScanChoice::IndexScan(scan) => {
                let Some(index) = self.catalog.get(&scan.index_name) else {
                    // the index vanished under a cached plan; report, never
                    // crash
                    log::warn!("Index {} was dropped mid-plan", scan.index_name);
                    return Err(DocketError::new(
                        &format!("Index {} was dropped", scan.index_name),
                        ErrorKind::IndexNotFound,
                    ));
                };
                let Some(btree) = index.as_btree() else {
                    return Err(DocketError::new(
                        &format!("Index {} cannot serve an index scan", scan.index_name),
                        ErrorKind::PlanningError,
                    ));
                };

                let (entries, keys_examined) = btree.scan(&scan.bounds, scan.reverse);
                stats.add_keys_examined(keys_examined);

                // multikey scans can surface one record several times
                let mut seen: HashSet<DocId> = HashSet::new();
                let deduped: Vec<_> = entries
                    .into_iter()
                    .filter(|(_, id)| seen.insert(*id))
                    .collect();

                if scan.covered {
                    let fields = scan.key_fields.clone();
                    Ok(Box::new(deduped.into_iter().map(move |(key, id)| {
                        let mut doc = Document::new();
                        for ((path, _), value) in fields.pairs().iter().zip(key.values()) {
                            doc.put_path(path, (*value).clone())?;
                        }
                        Ok((id, doc))
                    })))
                } else {
                    let store = self.store.clone();
                    let mut ticker = ctx.ticker();
                    let stats = stats.clone();
                    Ok(Box::new(deduped.into_iter().filter_map(move |(_, id)| {
                        if let Err(e) = ticker.tick() {
                            return Some(Err(e));
                        }
                        // records deleted since the keys were read are
                        // skipped, not errors
                        match store.get(&id) {
                            Some(doc) => {
                                stats.add_docs_examined(1);
                                Some(Ok((id, doc)))
                            }
                            None => None,
                        }
                    })))
                }
            }
            ScanChoice::TextScan { index_name, query } => {
                let Some(index) = self.catalog.get(index_name) else {
                    return Err(DocketError::new(
                        &format!("Index {} was dropped", index_name),
                        ErrorKind::IndexNotFound,
                    ));
                };
                let Some(text) = index.as_text() else {
                    return Err(DocketError::new(
                        &format!("Index {} is not a text index", index_name),
                        ErrorKind::PlanningError,
                    ));
                };
                let (ids, examined) = text.search(query);
                stats.add_keys_examined(examined);
                let store = self.store.clone();
                let stats = stats.clone();
                let mut ticker = ctx.ticker();
                Ok(Box::new(ids.into_iter().filter_map(move |id| {
                    if let Err(e) = ticker.tick() {
                        return Some(Err(e));
                    }
                    match store.get(&id) {
                        Some(doc) => {
                            stats.add_docs_examined(1);
                            Some(Ok((id, doc)))
                        }
                        None => None,
                    }
                })))
            }
        }
    }

    /// Distinct values at a path among matching documents, arrays
    /// flattened, in value order.
    pub(crate) fn distinct(
        &self,
        path: &str,
        filter: &MatchExpression,
        ctx: &OpContext,
    ) -> DocketResult<Vec<Value>> {
        let stats = ExecStats::new();
        let plan = self
            .planner
            .create_plan(filter, &FindOptions::new(), &self.catalog)?;
        let iter = self.execute_plan(&plan, ctx, &stats)?;

        let mut values: Vec<Value> = Vec::new();
        for item in iter {
            let (_, doc) = item?;
            match doc.get(path) {
                Value::Null => {}
                Value::Array(items) => values.extend(items),
                other => values.push(other),
            }
        }
        values.sort();
        values.dedup();
        Ok(values)
    }

    /// Number of matching documents.
    pub(crate) fn count(&self, filter: &MatchExpression, ctx: &OpContext) -> DocketResult<u64> {
        let stats = ExecStats::new();
        let plan = self
            .planner
            .create_plan(filter, &FindOptions::new(), &self.catalog)?;
        let iter = self.execute_plan(&plan, ctx, &stats)?;
        let mut count = 0;
        for item in iter {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

/// Stable in-memory sort of records by a sort specification. Missing fields
/// sort as null.
pub(crate) fn sort_records(rows: &mut [(DocId, Document)], spec: &SortSpec) {
    rows.sort_by(|(_, a), (_, b)| compare_documents(a, b, spec));
}

/// Compares two documents under a sort specification.
pub(crate) fn compare_documents(a: &Document, b: &Document, spec: &SortSpec) -> Ordering {
    for (path, order) in spec.fields() {
        let av = a.get(path);
        let bv = b.get(path);
        let mut ordering = av.cmp(&bv);
        if *order == SortOrder::Descending {
            ordering = ordering.reverse();
        }
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Compares two composite sort keys under a sort specification.
pub(crate) fn compare_sort_keys(a: &[Value], b: &[Value], spec: &SortSpec) -> Ordering {
    for (((_, order), av), bv) in spec.fields().iter().zip(a).zip(b) {
        let mut ordering = av.cmp(bv);
        if *order == SortOrder::Descending {
            ordering = ordering.reverse();
        }
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
