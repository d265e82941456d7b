use crate::collection::{Document, Projection};
use crate::common::{Fields, SortSpec, Value};
use crate::filter::MatchExpression;
use crate::index::IndexBounds;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-execution counters surfaced through `explain`.
///
/// Shared by every iterator in one execution tree; increments are relaxed
/// atomics since the counters are diagnostics, not control flow.
#[derive(Clone, Default)]
pub struct ExecStats {
    inner: Arc<ExecStatsInner>,
}

#[derive(Default)]
struct ExecStatsInner {
    docs_examined: AtomicU64,
    keys_examined: AtomicU64,
    returned: AtomicU64,
}

impl ExecStats {
    pub fn new() -> Self {
        ExecStats::default()
    }

    pub fn add_docs_examined(&self, n: u64) {
        self.inner.docs_examined.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_keys_examined(&self, n: u64) {
        self.inner.keys_examined.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_returned(&self, n: u64) {
        self.inner.returned.fetch_add(n, Ordering::Relaxed);
    }

    pub fn docs_examined(&self) -> u64 {
        self.inner.docs_examined.load(Ordering::Relaxed)
    }

    pub fn keys_examined(&self) -> u64 {
        self.inner.keys_examined.load(Ordering::Relaxed)
    }

    pub fn returned(&self) -> u64 {
        self.inner.returned.load(Ordering::Relaxed)
    }
}

/// An index scan chosen by the planner.
#[derive(Debug, Clone)]
pub struct IndexScanPlan {
    pub index_name: String,
    pub key_fields: Fields,
    pub bounds: IndexBounds,
    pub reverse: bool,
    /// Index-only plan: the projection is answered from key data and no
    /// document is fetched.
    pub covered: bool,
}

/// How the planner reaches the candidate record set.
#[derive(Debug, Clone)]
pub enum ScanChoice {
    /// Walk every record.
    CollectionScan,
    /// The predicate is provably empty; return nothing without touching
    /// storage or any index.
    EmptyScan,
    /// Walk one index's entries within bounds.
    IndexScan(IndexScanPlan),
    /// Walk a text index's postings.
    TextScan { index_name: String, query: String },
}

impl ScanChoice {
    fn stage_name(&self) -> &'static str {
        match self {
            ScanChoice::CollectionScan => "COLLSCAN",
            ScanChoice::EmptyScan => "EOF",
            ScanChoice::IndexScan(_) => "IXSCAN",
            ScanChoice::TextScan { .. } => "TEXT",
        }
    }
}

/// The chosen execution strategy for one query.
///
/// For a top-level `$or`, the plan is a union of independently planned
/// sub-plans deduplicated by record identity; `scan` is unused in that case.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub scan: ScanChoice,
    /// Predicate re-applied to fetched documents. `None` for covered and
    /// empty plans, and for unfiltered scans.
    pub residual: Option<MatchExpression>,
    pub sort: Option<SortSpec>,
    /// The scan already yields `sort` order, so no in-memory sort runs.
    pub sort_provided_by_scan: bool,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub projection: Option<Projection>,
    pub or_subplans: Option<Vec<QueryPlan>>,
}

impl QueryPlan {
    pub fn collection_scan(residual: Option<MatchExpression>) -> Self {
        QueryPlan {
            scan: ScanChoice::CollectionScan,
            residual,
            sort: None,
            sort_provided_by_scan: false,
            skip: None,
            limit: None,
            projection: None,
            or_subplans: None,
        }
    }

    pub fn empty_scan() -> Self {
        QueryPlan {
            scan: ScanChoice::EmptyScan,
            residual: None,
            sort: None,
            sort_provided_by_scan: false,
            skip: None,
            limit: None,
            projection: None,
            or_subplans: None,
        }
    }

    pub fn is_covered(&self) -> bool {
        matches!(&self.scan, ScanChoice::IndexScan(scan) if scan.covered)
    }

    pub fn index_name(&self) -> Option<&str> {
        match &self.scan {
            ScanChoice::IndexScan(scan) => Some(&scan.index_name),
            ScanChoice::TextScan { index_name, .. } => Some(index_name),
            _ => None,
        }
    }

    /// Renders the plan shape for `explain`, innermost scan outward.
    pub fn describe(&self) -> Document {
        let mut stage = if let Some(subplans) = &self.or_subplans {
            let mut or_stage = Document::new();
            let _ = or_stage.put("stage", "OR");
            let inputs: Vec<Value> = subplans
                .iter()
                .map(|p| Value::Document(p.describe()))
                .collect();
            let _ = or_stage.put("inputStages", Value::Array(inputs));
            or_stage
        } else {
            let mut scan_stage = Document::new();
            let _ = scan_stage.put("stage", self.scan.stage_name());
            match &self.scan {
                ScanChoice::IndexScan(scan) => {
                    let _ = scan_stage.put("indexName", scan.index_name.as_str());
                    let _ = scan_stage.put("keyPattern", scan.key_fields.to_string());
                    let _ = scan_stage.put(
                        "direction",
                        if scan.reverse { "backward" } else { "forward" },
                    );
                    let _ = scan_stage.put("covered", scan.covered);
                    if !scan.covered {
                        let mut fetch = Document::new();
                        let _ = fetch.put("stage", "FETCH");
                        let _ = fetch.put("inputStage", Value::Document(scan_stage));
                        scan_stage = fetch;
                    }
                }
                ScanChoice::TextScan { index_name, query } => {
                    let _ = scan_stage.put("indexName", index_name.as_str());
                    let _ = scan_stage.put("query", query.as_str());
                }
                _ => {}
            }
            scan_stage
        };

        if self.residual.is_some() {
            let mut filter = Document::new();
            let _ = filter.put(
                "filter",
                self.residual
                    .as_ref()
                    .map(|f| f.to_string())
                    .unwrap_or_default(),
            );
            let _ = filter.put("stage", "FILTER");
            let _ = filter.put("inputStage", Value::Document(stage));
            stage = filter;
        }

        if self.sort.is_some() && !self.sort_provided_by_scan {
            let mut sort = Document::new();
            let _ = sort.put("stage", "SORT");
            let _ = sort.put("inputStage", Value::Document(stage));
            stage = sort;
        }

        if self.projection.is_some() {
            let mut projection = Document::new();
            let _ = projection.put("stage", "PROJECTION");
            let _ = projection.put("inputStage", Value::Document(stage));
            stage = projection;
        }

        stage
    }
}
