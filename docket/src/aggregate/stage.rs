use crate::aggregate::{Accumulator, Expression};
use crate::collection::Document;
use crate::common::{SortOrder, SortSpec, Value, DOC_ID};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use crate::filter::{parse_filter, MatchExpression};

/// One value in a `$project` specification.
#[derive(Debug, Clone)]
pub enum ProjectValue {
    Include,
    Exclude,
    Computed(Expression),
}

/// A compiled `$project` stage.
#[derive(Debug, Clone)]
pub struct ProjectStage {
    pub fields: Vec<(String, ProjectValue)>,
    pub include_id: bool,
}

/// A compiled `$unwind` stage.
#[derive(Debug, Clone)]
pub struct UnwindStage {
    pub path: String,
    pub include_array_index: Option<String>,
    pub preserve_null_and_empty: bool,
}

/// A compiled `$lookup` stage.
#[derive(Debug, Clone)]
pub struct LookupStage {
    pub from: String,
    pub local_field: Option<String>,
    pub foreign_field: Option<String>,
    pub pipeline: Option<Vec<PipelineStage>>,
    pub as_field: String,
}

/// A compiled `$geoNear` stage: planar distance from `near` over the point
/// stored at `key`, results sorted nearest-first with the distance attached.
#[derive(Debug, Clone)]
pub struct GeoNearStage {
    pub near: (f64, f64),
    pub key: String,
    pub distance_field: String,
}

/// One compiled pipeline stage. The stage set is closed; compilation
/// rejects unknown stage names before execution starts.
#[derive(Debug, Clone)]
pub enum PipelineStage {
    Match(MatchExpression),
    Project(ProjectStage),
    AddFields(Vec<(String, Expression)>),
    Unwind(UnwindStage),
    Group {
        key: Expression,
        accumulators: Vec<(String, Accumulator)>,
    },
    Sort(SortSpec),
    Skip(usize),
    Limit(usize),
    Lookup(LookupStage),
    Sample { size: usize },
    Count(String),
    GeoNear(GeoNearStage),
}

/// A compiled aggregation pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stages: Vec<PipelineStage>,
}

impl Pipeline {
    /// Compiles and validates a pipeline from its document form. All
    /// structural validation happens here, before any stage executes:
    /// empty stage documents, unknown stage names, `$geoNear` placement,
    /// and malformed stage bodies.
    pub fn compile(stage_docs: &[Document]) -> DocketResult<Pipeline> {
        Self::compile_inner(stage_docs, false)
    }

    fn compile_inner(stage_docs: &[Document], in_lookup: bool) -> DocketResult<Pipeline> {
        let mut stages = Vec::with_capacity(stage_docs.len());
        for (position, stage_doc) in stage_docs.iter().enumerate() {
            let names = stage_doc.field_names();
            if names.is_empty() {
                return Err(pipeline_error(
                    "A pipeline stage specification object must contain exactly one field",
                ));
            }
            if names.len() > 1 {
                return Err(pipeline_error(&format!(
                    "A pipeline stage specification object must contain exactly one field, found {}",
                    names.len()
                )));
            }
            let name = names[0];
            let body = stage_doc.get_field(name).cloned().unwrap_or(Value::Null);
            let stage = compile_stage(name, &body)?;

            if matches!(stage, PipelineStage::GeoNear(_)) && position != 0 {
                let location = if in_lookup {
                    "a $lookup sub-pipeline"
                } else {
                    "the pipeline"
                };
                return Err(pipeline_error(&format!(
                    "$geoNear is only valid as the first stage of {}",
                    location
                )));
            }
            stages.push(stage);
        }
        Ok(Pipeline { stages })
    }
}

fn compile_stage(name: &str, body: &Value) -> DocketResult<PipelineStage> {
    match name {
        "$match" => {
            let Value::Document(filter_doc) = body else {
                return Err(pipeline_error("$match requires a document"));
            };
            Ok(PipelineStage::Match(parse_filter(filter_doc)?))
        }
        "$project" => compile_project(body),
        "$addFields" => {
            let Value::Document(fields_doc) = body else {
                return Err(pipeline_error("$addFields requires a document"));
            };
            if fields_doc.is_empty() {
                return Err(pipeline_error("$addFields requires at least one field"));
            }
            let mut fields = Vec::with_capacity(fields_doc.len());
            for (field, spec) in fields_doc.iter() {
                fields.push((field.clone(), Expression::parse(spec)?));
            }
            Ok(PipelineStage::AddFields(fields))
        }
        "$unwind" => compile_unwind(body),
        "$group" => compile_group(body),
        "$sort" => {
            let Value::Document(sort_doc) = body else {
                return Err(pipeline_error("$sort requires a document"));
            };
            if sort_doc.is_empty() {
                return Err(pipeline_error("$sort requires at least one field"));
            }
            let mut sort = SortSpec::new();
            for (field, dir) in sort_doc.iter() {
                let order = match dir.as_i64() {
                    Some(1) => SortOrder::Ascending,
                    Some(-1) => SortOrder::Descending,
                    _ => {
                        return Err(pipeline_error("$sort directions must be 1 or -1"));
                    }
                };
                sort = sort.then_by(field, order);
            }
            Ok(PipelineStage::Sort(sort))
        }
        "$skip" => {
            let n = body
                .as_i64()
                .filter(|n| *n >= 0)
                .ok_or_else(|| pipeline_error("$skip requires a non-negative integer"))?;
            Ok(PipelineStage::Skip(n as usize))
        }
        "$limit" => {
            let n = body
                .as_i64()
                .filter(|n| *n >= 0)
                .ok_or_else(|| pipeline_error("$limit requires a non-negative integer"))?;
            Ok(PipelineStage::Limit(n as usize))
        }
        "$lookup" => compile_lookup(body),
        "$sample" => {
            let Value::Document(spec) = body else {
                return Err(sample_error("$sample requires a {size} document"));
            };
            let size = spec.get("size");
            if size.is_null() {
                return Err(sample_error("$sample requires a size argument"));
            }
            let n = size
                .as_i64()
                .ok_or_else(|| sample_error("$sample size must be a number"))?;
            if n < 0 {
                return Err(sample_error("$sample size must be non-negative"));
            }
            Ok(PipelineStage::Sample { size: n as usize })
        }
        "$count" => {
            let Value::String(field) = body else {
                return Err(pipeline_error("$count requires a string field name"));
            };
            if field.is_empty() || field.starts_with('$') || field.contains('.') {
                return Err(pipeline_error("$count field name is not valid"));
            }
            Ok(PipelineStage::Count(field.clone()))
        }
        "$geoNear" => {
            let Value::Document(spec) = body else {
                return Err(pipeline_error("$geoNear requires a document"));
            };
            let Value::Array(near) = spec.get("near") else {
                return Err(pipeline_error("$geoNear requires a near: [x, y] point"));
            };
            let (Some(x), Some(y)) = (
                near.first().and_then(|v| v.as_f64()),
                near.get(1).and_then(|v| v.as_f64()),
            ) else {
                return Err(pipeline_error("$geoNear requires a near: [x, y] point"));
            };
            let Value::String(distance_field) = spec.get("distanceField") else {
                return Err(pipeline_error("$geoNear requires a distanceField"));
            };
            let key = match spec.get("key") {
                Value::String(key) => key,
                Value::Null => "location".to_string(),
                _ => return Err(pipeline_error("$geoNear key must be a string")),
            };
            Ok(PipelineStage::GeoNear(GeoNearStage {
                near: (x, y),
                key,
                distance_field,
            }))
        }
        other => Err(pipeline_error(&format!(
            "Unrecognized pipeline stage name: {}",
            other
        ))),
    }
}

fn compile_project(body: &Value) -> DocketResult<PipelineStage> {
    let Value::Document(spec) = body else {
        return Err(pipeline_error("$project requires a document"));
    };
    if spec.is_empty() {
        return Err(pipeline_error("$project requires at least one field"));
    }

    let mut fields: Vec<(String, ProjectValue)> = Vec::new();
    let mut include_id = true;
    let mut saw_include = false;
    let mut saw_exclude = false;

    for (path, value) in spec.iter() {
        let parsed = match value {
            Value::Bool(b) => {
                if *b {
                    ProjectValue::Include
                } else {
                    ProjectValue::Exclude
                }
            }
            v if v.is_numeric() => {
                if v.as_f64().unwrap_or(0.0) != 0.0 {
                    ProjectValue::Include
                } else {
                    ProjectValue::Exclude
                }
            }
            other => ProjectValue::Computed(Expression::parse(other)?),
        };

        if path == DOC_ID {
            include_id = !matches!(parsed, ProjectValue::Exclude);
            if matches!(parsed, ProjectValue::Computed(_)) {
                fields.push((path.clone(), parsed));
            }
            continue;
        }

        match parsed {
            ProjectValue::Include => saw_include = true,
            ProjectValue::Exclude => saw_exclude = true,
            ProjectValue::Computed(_) => saw_include = true,
        }
        fields.push((path.clone(), parsed));
    }

    if saw_include && saw_exclude {
        return Err(pipeline_error(
            "Cannot mix inclusion and exclusion in $project",
        ));
    }

    // numeric inclusion of a path that another entry projects as an object
    // shape is ambiguous; reject the collision
    for (a, value_a) in &fields {
        for (b, _) in &fields {
            if a != b && b.starts_with(&format!("{}.", a)) {
                if matches!(value_a, ProjectValue::Include | ProjectValue::Computed(_)) {
                    return Err(pipeline_error(&format!(
                        "Invalid $project: path collision between {} and {}",
                        a, b
                    )));
                }
            }
        }
    }

    Ok(PipelineStage::Project(ProjectStage { fields, include_id }))
}

fn compile_unwind(body: &Value) -> DocketResult<PipelineStage> {
    match body {
        Value::String(path) if path.starts_with('$') => Ok(PipelineStage::Unwind(UnwindStage {
            path: path[1..].to_string(),
            include_array_index: None,
            preserve_null_and_empty: false,
        })),
        Value::Document(spec) => {
            let Value::String(path) = spec.get("path") else {
                return Err(pipeline_error("$unwind requires a path"));
            };
            if !path.starts_with('$') {
                return Err(pipeline_error("$unwind path must start with '$'"));
            }
            let include_array_index = match spec.get("includeArrayIndex") {
                Value::String(field) => Some(field),
                Value::Null => None,
                _ => {
                    return Err(pipeline_error("includeArrayIndex must be a field name"));
                }
            };
            let preserve = match spec.get("preserveNullAndEmptyArrays") {
                Value::Bool(b) => b,
                Value::Null => false,
                _ => {
                    return Err(pipeline_error("preserveNullAndEmptyArrays must be a boolean"));
                }
            };
            Ok(PipelineStage::Unwind(UnwindStage {
                path: path[1..].to_string(),
                include_array_index,
                preserve_null_and_empty: preserve,
            }))
        }
        _ => Err(pipeline_error("$unwind requires a path or a document")),
    }
}

fn compile_group(body: &Value) -> DocketResult<PipelineStage> {
    let Value::Document(spec) = body else {
        return Err(pipeline_error("$group requires a document"));
    };
    if !spec.contains_key(DOC_ID) {
        return Err(pipeline_error("$group requires an _id expression"));
    }
    let key = Expression::parse(&spec.get(DOC_ID))?;
    let mut accumulators = Vec::new();
    for (field, acc_spec) in spec.iter() {
        if field == DOC_ID {
            continue;
        }
        if field.contains('.') {
            return Err(pipeline_error("$group output fields cannot be dotted"));
        }
        accumulators.push((field.clone(), Accumulator::parse(acc_spec)?));
    }
    Ok(PipelineStage::Group { key, accumulators })
}

fn compile_lookup(body: &Value) -> DocketResult<PipelineStage> {
    let Value::Document(spec) = body else {
        return Err(pipeline_error("$lookup requires a document"));
    };
    let Value::String(from) = spec.get("from") else {
        return Err(pipeline_error("$lookup requires a from collection"));
    };
    let Value::String(as_field) = spec.get("as") else {
        return Err(pipeline_error("$lookup requires an as field"));
    };

    let local_field = match spec.get("localField") {
        Value::String(f) => Some(f),
        Value::Null => None,
        _ => return Err(pipeline_error("localField must be a string")),
    };
    let foreign_field = match spec.get("foreignField") {
        Value::String(f) => Some(f),
        Value::Null => None,
        _ => return Err(pipeline_error("foreignField must be a string")),
    };
    if local_field.is_some() != foreign_field.is_some() {
        return Err(pipeline_error(
            "$lookup requires both localField and foreignField, or neither",
        ));
    }

    let pipeline = match spec.get("pipeline") {
        Value::Array(stage_values) => {
            let mut stage_docs = Vec::with_capacity(stage_values.len());
            for stage_value in &stage_values {
                let Value::Document(stage_doc) = stage_value else {
                    return Err(pipeline_error("$lookup pipeline stages must be documents"));
                };
                stage_docs.push(stage_doc.clone());
            }
            Some(Pipeline::compile_inner(&stage_docs, true)?.stages)
        }
        Value::Null => None,
        _ => return Err(pipeline_error("$lookup pipeline must be an array")),
    };

    if local_field.is_none() && pipeline.is_none() {
        return Err(pipeline_error(
            "$lookup requires localField/foreignField or a pipeline",
        ));
    }

    Ok(PipelineStage::Lookup(LookupStage {
        from,
        local_field,
        foreign_field,
        pipeline,
        as_field,
    }))
}

fn pipeline_error(message: &str) -> DocketError {
    log::error!("{}", message);
    DocketError::new(message, ErrorKind::InvalidPipeline)
}

fn sample_error(message: &str) -> DocketError {
    log::error!("{}", message);
    DocketError::new(message, ErrorKind::InvalidSampleSize)
}
