use crate::collection::Document;
use crate::common::{SortSpec, Value, DOC_ID};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use std::time::Duration;

/// Options for `find`: projection, sort, paging, batching, hint, deadline.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Option<Projection>,
    pub sort: Option<SortSpec>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub batch_size: Option<usize>,
    /// Force the named index. Unknown names are a client error; a partial
    /// index that cannot answer the query is a planning error.
    pub hint: Option<String>,
    pub max_time: Option<Duration>,
}

impl FindOptions {
    pub fn new() -> Self {
        FindOptions::default()
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_hint(mut self, index_name: &str) -> Self {
        self.hint = Some(index_name.to_string());
        self
    }

    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }
}

/// Whether a projection keeps or drops the listed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    Include,
    Exclude,
}

/// A parsed find projection.
///
/// Inclusion and exclusion cannot be mixed, with the usual `_id` exception:
/// `{a: 1, _id: 0}` is valid.
#[derive(Debug, Clone)]
pub struct Projection {
    mode: ProjectionMode,
    fields: Vec<String>,
    include_id: bool,
}

impl Projection {
    /// Parses a projection document such as `{a: 1, "b.c": 1, _id: 0}`.
    pub fn parse(spec: &Document) -> DocketResult<Projection> {
        if spec.is_empty() {
            log::error!("Projection document cannot be empty");
            return Err(DocketError::new(
                "Projection document cannot be empty",
                ErrorKind::BadValue,
            ));
        }

        let mut mode: Option<ProjectionMode> = None;
        let mut fields = Vec::new();
        let mut include_id = true;

        for (path, value) in spec.iter() {
            let included = match value {
                Value::Bool(b) => *b,
                v if v.is_numeric() => v.as_f64().unwrap_or(0.0) != 0.0,
                other => {
                    log::error!("Unsupported projection value for {}: {}", path, other);
                    return Err(DocketError::new(
                        &format!("Unsupported projection value for {}", path),
                        ErrorKind::BadValue,
                    ));
                }
            };

            if path == DOC_ID {
                include_id = included;
                continue;
            }

            let this_mode = if included {
                ProjectionMode::Include
            } else {
                ProjectionMode::Exclude
            };
            match mode {
                None => mode = Some(this_mode),
                Some(existing) if existing != this_mode => {
                    log::error!("Cannot mix inclusion and exclusion in a projection");
                    return Err(DocketError::new(
                        "Cannot mix inclusion and exclusion in a projection",
                        ErrorKind::BadValue,
                    ));
                }
                _ => {}
            }
            fields.push(path.clone());
        }

        // an _id-only projection: {_id: 0} excludes nothing else,
        // {_id: 1} includes everything implicitly? No: treat as inclusion
        let mode = mode.unwrap_or(if include_id {
            ProjectionMode::Include
        } else {
            ProjectionMode::Exclude
        });

        Ok(Projection {
            mode,
            fields,
            include_id,
        })
    }

    /// Builds an inclusion projection over the given paths, `_id` retained.
    pub fn include(paths: &[&str]) -> Projection {
        Projection {
            mode: ProjectionMode::Include,
            fields: paths.iter().map(|p| p.to_string()).collect(),
            include_id: true,
        }
    }

    /// Builds an inclusion projection with `_id` suppressed.
    pub fn include_without_id(paths: &[&str]) -> Projection {
        Projection {
            mode: ProjectionMode::Include,
            fields: paths.iter().map(|p| p.to_string()).collect(),
            include_id: false,
        }
    }

    /// Builds an exclusion projection over the given paths.
    pub fn exclude(paths: &[&str]) -> Projection {
        Projection {
            mode: ProjectionMode::Exclude,
            fields: paths.iter().map(|p| p.to_string()).collect(),
            include_id: true,
        }
    }

    pub fn mode(&self) -> ProjectionMode {
        self.mode
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn includes_id(&self) -> bool {
        self.include_id
    }

    /// The field paths a covered plan must find in the index key, `_id`
    /// included when the projection keeps it.
    pub fn required_fields(&self) -> Option<Vec<&str>> {
        if self.mode != ProjectionMode::Include {
            return None;
        }
        let mut required: Vec<&str> = self.fields.iter().map(|f| f.as_str()).collect();
        if self.include_id {
            required.push(DOC_ID);
        }
        Some(required)
    }

    /// Applies the projection to one document.
    pub fn apply(&self, doc: &Document) -> DocketResult<Document> {
        match self.mode {
            ProjectionMode::Include => {
                let mut projected = Document::new();
                if self.include_id {
                    if let Some(id) = doc.id_value() {
                        projected.put(DOC_ID, id.clone())?;
                    }
                }
                for path in &self.fields {
                    let value = doc.get(path);
                    if !value.is_null() || field_exists(doc, path) {
                        projected.put_path(path, value)?;
                    }
                }
                Ok(projected)
            }
            ProjectionMode::Exclude => {
                let mut projected = doc.clone();
                for path in &self.fields {
                    projected.remove_path(path);
                }
                if !self.include_id {
                    projected.remove(DOC_ID);
                }
                Ok(projected)
            }
        }
    }
}

fn field_exists(doc: &Document, path: &str) -> bool {
    if doc.contains_key(path) {
        return true;
    }
    if !path.contains('.') {
        return false;
    }
    let (head, _) = path.split_once('.').unwrap_or((path, ""));
    doc.contains_key(head)
}
