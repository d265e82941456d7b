use crate::aggregate::stage::{
    GeoNearStage, LookupStage, Pipeline, PipelineStage, ProjectStage, ProjectValue, UnwindStage,
};
use crate::aggregate::{Accumulator, AccumulatorState, Expression};
use crate::collection::operation::sort_records;
use crate::collection::{DocId, Document};
use crate::common::{OpContext, SortSpec, Value, DOC_ID};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use indexmap::IndexMap;
use rand::seq::index::sample;
use std::sync::Arc;

/// Resolves foreign collections for `$lookup`. Implemented by the database.
pub trait CollectionProvider: Send + Sync {
    /// Every document of the named collection, in storage order.
    fn collection_documents(&self, name: &str) -> DocketResult<Vec<Document>>;
}

type DocStream = Box<dyn Iterator<Item = DocketResult<Document>> + Send>;

/// Executes a compiled pipeline as a pull-based chain of lazy iterators.
///
/// Non-blocking stages (`$match`, `$project`, `$unwind`, `$skip`, `$limit`,
/// `$lookup`) transform the stream one document at a time. Blocking stages
/// (`$sort`, `$group`, `$sample`, `$count`, `$geoNear`) drain their input
/// before emitting, checking the operation deadline while they drain.
///
/// `source_sorted_by` tells the executor the source stream's known order
/// (an index-provided sort after `$match` push-down); `$group` streams
/// instead of hashing when its key is the leading sort field.
pub fn execute_pipeline(
    pipeline: &Pipeline,
    source: DocStream,
    provider: Arc<dyn CollectionProvider>,
    ctx: &OpContext,
    source_sorted_by: Option<String>,
) -> DocketResult<DocStream> {
    let mut stream = source;
    let mut sorted_by = source_sorted_by;

    for stage in &pipeline.stages {
        stream = apply_stage(stage, stream, &provider, ctx, &mut sorted_by)?;
    }
    Ok(stream)
}

fn apply_stage(
    stage: &PipelineStage,
    input: DocStream,
    provider: &Arc<dyn CollectionProvider>,
    ctx: &OpContext,
    sorted_by: &mut Option<String>,
) -> DocketResult<DocStream> {
    match stage {
        PipelineStage::Match(filter) => {
            let filter = filter.clone();
            Ok(Box::new(input.filter(move |item| match item {
                Ok(doc) => crate::filter::matches(doc, &filter).unwrap_or(false),
                Err(_) => true,
            })))
        }
        PipelineStage::Project(project) => {
            *sorted_by = None;
            let project = project.clone();
            Ok(Box::new(input.map(move |item| {
                item.and_then(|doc| apply_project(&project, &doc))
            })))
        }
        PipelineStage::AddFields(fields) => {
            // writing over the known-sorted field invalidates the order
            if let Some(sorted) = sorted_by.as_ref() {
                if fields.iter().any(|(path, _)| paths_overlap(path, sorted)) {
                    *sorted_by = None;
                }
            }
            let fields = fields.clone();
            Ok(Box::new(input.map(move |item| {
                item.and_then(|doc| {
                    let mut out = doc.clone();
                    for (path, expr) in &fields {
                        out.put_path(path, expr.evaluate(&doc)?)?;
                    }
                    Ok(out)
                })
            })))
        }
        PipelineStage::Unwind(unwind) => {
            *sorted_by = None;
            let unwind = unwind.clone();
            Ok(Box::new(input.flat_map(move |item| match item {
                Ok(doc) => apply_unwind(&unwind, doc),
                Err(e) => vec![Err(e)],
            })))
        }
        PipelineStage::Group { key, accumulators } => {
            let streaming = match (key, sorted_by.as_ref()) {
                (Expression::FieldPath(path), Some(sorted)) => path == sorted,
                _ => false,
            };
            *sorted_by = None;
            if streaming {
                Ok(streaming_group(key.clone(), accumulators.to_vec(), input))
            } else {
                blocking_group(key.clone(), accumulators.to_vec(), input, ctx)
            }
        }
        PipelineStage::Sort(spec) => {
            *sorted_by = spec.first().map(|(path, _)| path.clone());
            let mut rows: Vec<(DocId, Document)> = Vec::new();
            let mut ticker = ctx.ticker();
            for item in input {
                ticker.tick()?;
                rows.push((DocId::from_value(0), item?));
            }
            sort_records(&mut rows, spec);
            Ok(Box::new(rows.into_iter().map(|(_, doc)| Ok(doc))))
        }
        PipelineStage::Skip(n) => Ok(Box::new(input.skip(*n))),
        PipelineStage::Limit(n) => Ok(Box::new(input.take(*n))),
        PipelineStage::Lookup(lookup) => {
            if let Some(sorted) = sorted_by.as_ref() {
                if paths_overlap(&lookup.as_field, sorted) {
                    *sorted_by = None;
                }
            }
            apply_lookup(lookup, input, provider, ctx)
        }
        PipelineStage::Sample { size } => {
            *sorted_by = None;
            let mut docs: Vec<Document> = Vec::new();
            let mut ticker = ctx.ticker();
            for item in input {
                ticker.tick()?;
                docs.push(item?);
            }
            let n = (*size).min(docs.len());
            if n == 0 {
                return Ok(Box::new(std::iter::empty()));
            }
            let mut rng = rand::thread_rng();
            let chosen = sample(&mut rng, docs.len(), n);
            let mut picked: Vec<Document> = Vec::with_capacity(n);
            for index in chosen.iter() {
                if let Some(doc) = docs.get(index) {
                    picked.push(doc.clone());
                }
            }
            Ok(Box::new(picked.into_iter().map(Ok)))
        }
        PipelineStage::Count(field) => {
            let mut count: i64 = 0;
            let mut ticker = ctx.ticker();
            for item in input {
                ticker.tick()?;
                item?;
                count += 1;
            }
            let mut out = Document::new();
            out.put(field, Value::I64(count))?;
            Ok(Box::new(std::iter::once(Ok(out))))
        }
        PipelineStage::GeoNear(geo) => {
            *sorted_by = None;
            apply_geo_near(geo, input, ctx)
        }
    }
}

/// Whether a write at `written` can disturb the value at `watched`.
fn paths_overlap(written: &str, watched: &str) -> bool {
    written == watched
        || watched.starts_with(&format!("{}.", written))
        || written.starts_with(&format!("{}.", watched))
}

fn apply_project(project: &ProjectStage, doc: &Document) -> DocketResult<Document> {
    let inclusion = project.fields.iter().any(|(_, v)| {
        matches!(v, ProjectValue::Include | ProjectValue::Computed(_))
    });

    if inclusion || project.fields.is_empty() {
        let mut out = Document::new();
        if project.include_id {
            if let Some(id) = doc.id_value() {
                out.put(DOC_ID, id.clone())?;
            }
        }
        for (path, value) in &project.fields {
            match value {
                ProjectValue::Include => {
                    let current = doc.get(path);
                    if !current.is_null() {
                        out.put_path(path, current)?;
                    }
                }
                ProjectValue::Computed(expr) => {
                    if let Some(value) = expr.evaluate_opt(doc)? {
                        out.put_path(path, value)?;
                    }
                }
                ProjectValue::Exclude => {}
            }
        }
        Ok(out)
    } else {
        let mut out = doc.clone();
        for (path, value) in &project.fields {
            if matches!(value, ProjectValue::Exclude) {
                out.remove_path(path);
            }
        }
        if !project.include_id {
            out.remove(DOC_ID);
        }
        Ok(out)
    }
}

fn apply_unwind(unwind: &UnwindStage, doc: Document) -> Vec<DocketResult<Document>> {
    let value = doc.get(&unwind.path);
    match value {
        Value::Array(items) if !items.is_empty() => items
            .into_iter()
            .enumerate()
            .map(|(index, element)| {
                let mut out = doc.clone();
                out.put_path(&unwind.path, element)?;
                if let Some(index_field) = &unwind.include_array_index {
                    out.put_path(index_field, Value::I64(index as i64))?;
                }
                Ok(out)
            })
            .collect(),
        Value::Array(_) | Value::Null => {
            // empty arrays and missing/null fields drop the document
            // unless preservation was requested
            if unwind.preserve_null_and_empty {
                let mut out = doc;
                out.remove_path(&unwind.path);
                if let Some(index_field) = &unwind.include_array_index {
                    if out.put_path(index_field, Value::Null).is_err() {
                        return vec![Err(DocketError::new(
                            "Invalid includeArrayIndex field",
                            ErrorKind::InvalidPipeline,
                        ))];
                    }
                }
                vec![Ok(out)]
            } else {
                Vec::new()
            }
        }
        other => {
            // a non-array value unwinds to itself
            let mut out = doc;
            let mut results = Vec::with_capacity(1);
            let put = out.put_path(&unwind.path, other).and_then(|_| {
                if let Some(index_field) = &unwind.include_array_index {
                    out.put_path(index_field, Value::Null)?;
                }
                Ok(())
            });
            match put {
                Ok(()) => results.push(Ok(out)),
                Err(e) => results.push(Err(e)),
            }
            results
        }
    }
}

fn blocking_group(
    key: Expression,
    accumulators: Vec<(String, Accumulator)>,
    input: DocStream,
    ctx: &OpContext,
) -> DocketResult<DocStream> {
    let mut groups: IndexMap<Value, Vec<AccumulatorState>> = IndexMap::new();
    let mut ticker = ctx.ticker();

    for item in input {
        ticker.tick()?;
        let doc = item?;
        let group_key = key.evaluate(&doc)?;
        let states = groups.entry(group_key).or_insert_with(|| {
            accumulators
                .iter()
                .map(|(_, acc)| acc.new_state())
                .collect()
        });
        for ((_, accumulator), state) in accumulators.iter().zip(states.iter_mut()) {
            accumulator.update(state, &doc)?;
        }
    }

    let accumulators = Arc::new(accumulators);
    Ok(Box::new(groups.into_iter().map(move |(key, states)| {
        finalize_group(key, states, &accumulators)
    })))
}

/// Distinct-scan style grouping: the input is already ordered by the group
/// key, so each group finishes as soon as the key changes and nothing is
/// held beyond the current group.
fn streaming_group(
    key: Expression,
    accumulators: Vec<(String, Accumulator)>,
    input: DocStream,
) -> DocStream {
    struct StreamingGroups {
        key: Expression,
        accumulators: Arc<Vec<(String, Accumulator)>>,
        input: DocStream,
        current: Option<(Value, Vec<AccumulatorState>)>,
        done: bool,
    }

    impl Iterator for StreamingGroups {
        type Item = DocketResult<Document>;

        fn next(&mut self) -> Option<Self::Item> {
            if self.done {
                return None;
            }
            loop {
                match self.input.next() {
                    Some(Ok(doc)) => {
                        let group_key = match self.key.evaluate(&doc) {
                            Ok(k) => k,
                            Err(e) => return Some(Err(e)),
                        };
                        let rotate = match &self.current {
                            Some((current_key, _)) => current_key != &group_key,
                            None => false,
                        };
                        let finished = if rotate { self.current.take() } else { None };

                        if self.current.is_none() {
                            let fresh: Vec<AccumulatorState> = self
                                .accumulators
                                .iter()
                                .map(|(_, acc)| acc.new_state())
                                .collect();
                            self.current = Some((group_key, fresh));
                        }
                        if let Some((_, states)) = self.current.as_mut() {
                            for ((_, accumulator), state) in
                                self.accumulators.iter().zip(states.iter_mut())
                            {
                                if let Err(e) = accumulator.update(state, &doc) {
                                    return Some(Err(e));
                                }
                            }
                        }

                        if let Some((key, states)) = finished {
                            return Some(finalize_group(key, states, &self.accumulators));
                        }
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => {
                        self.done = true;
                        return self
                            .current
                            .take()
                            .map(|(key, states)| finalize_group(key, states, &self.accumulators));
                    }
                }
            }
        }
    }

    Box::new(StreamingGroups {
        key,
        accumulators: Arc::new(accumulators),
        input,
        current: None,
        done: false,
    })
}

fn finalize_group(
    key: Value,
    states: Vec<AccumulatorState>,
    accumulators: &Arc<Vec<(String, Accumulator)>>,
) -> DocketResult<Document> {
    let mut out = Document::new();
    out.put(DOC_ID, key)?;
    for ((field, accumulator), state) in accumulators.iter().zip(states) {
        out.put(field, accumulator.finalize(state))?;
    }
    Ok(out)
}

fn apply_lookup(
    lookup: &LookupStage,
    input: DocStream,
    provider: &Arc<dyn CollectionProvider>,
    ctx: &OpContext,
) -> DocketResult<DocStream> {
    let lookup = lookup.clone();
    let provider = provider.clone();
    let ctx = ctx.clone();

    // the foreign side is loaded lazily, once, on the first document
    let mut foreign: Option<Arc<Vec<Document>>> = None;

    Ok(Box::new(input.map(move |item| {
        let doc = item?;
        let foreign_docs = match &foreign {
            Some(cached) => cached.clone(),
            None => {
                let loaded = Arc::new(provider.collection_documents(&lookup.from)?);
                foreign = Some(loaded.clone());
                loaded
            }
        };

        let mut candidates: Vec<Document> = match (&lookup.local_field, &lookup.foreign_field) {
            (Some(local_field), Some(foreign_field)) => {
                let local = doc.get(local_field);
                foreign_docs
                    .iter()
                    .filter(|f| lookup_values_match(&local, &f.get(foreign_field)))
                    .cloned()
                    .collect()
            }
            _ => foreign_docs.as_ref().clone(),
        };

        if let Some(stages) = &lookup.pipeline {
            let sub = Pipeline {
                stages: stages.clone(),
            };
            let sub_stream: DocStream = Box::new(candidates.into_iter().map(Ok));
            let executed = execute_pipeline(&sub, sub_stream, provider.clone(), &ctx, None)?;
            candidates = executed.collect::<DocketResult<Vec<_>>>()?;
        }

        let mut out = doc;
        out.put_path(
            &lookup.as_field,
            Value::Array(candidates.into_iter().map(Value::Document).collect()),
        )?;
        Ok(out)
    })))
}

/// `$lookup` equality: null/missing joins null/missing, arrays join on any
/// element.
fn lookup_values_match(local: &Value, foreign: &Value) -> bool {
    let local_values: Vec<&Value> = match local {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let foreign_values: Vec<&Value> = match foreign {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    local_values
        .iter()
        .any(|l| foreign_values.iter().any(|f| l == f))
}

fn apply_geo_near(
    geo: &GeoNearStage,
    input: DocStream,
    ctx: &OpContext,
) -> DocketResult<DocStream> {
    let mut scored: Vec<(f64, Document)> = Vec::new();
    let mut ticker = ctx.ticker();
    for item in input {
        ticker.tick()?;
        let doc = item?;
        let Value::Array(point) = doc.get(&geo.key) else {
            continue;
        };
        let (Some(x), Some(y)) = (
            point.first().and_then(|v| v.as_f64()),
            point.get(1).and_then(|v| v.as_f64()),
        ) else {
            continue;
        };
        let distance = ((x - geo.near.0).powi(2) + (y - geo.near.1).powi(2)).sqrt();
        scored.push((distance, doc));
    }
    scored.sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let distance_field = geo.distance_field.clone();
    Ok(Box::new(scored.into_iter().map(move |(distance, mut doc)| {
        doc.put_path(&distance_field, Value::F64(distance))?;
        Ok(doc)
    })))
}
