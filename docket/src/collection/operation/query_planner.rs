use crate::collection::{FindOptions, IndexScanPlan, QueryPlan, ScanChoice};
use crate::common::{Fields, SortOrder, SortSpec, Value};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use crate::filter::{ComparisonOp, MatchExpression};
use crate::index::{CollectionIndex, FieldBound, IndexBounds, IndexCatalog, IndexDescriptor};
use dashmap::DashMap;
use smallvec::SmallVec;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type ConjunctVec<'a> = SmallVec<[&'a MatchExpression; 4]>;

/// Chooses an execution strategy for a filter and options against the
/// collection's current index set.
///
/// Plans are cached by query shape; any index creation or drop bumps the
/// version and implicitly invalidates every cached plan.
#[derive(Clone)]
pub(crate) struct QueryPlanner {
    inner: Arc<QueryPlannerInner>,
}

struct QueryPlannerInner {
    plan_cache: DashMap<u64, QueryPlan>,
    cache_limit: usize,
    index_version: AtomicU64,
}

impl QueryPlanner {
    pub fn new() -> Self {
        QueryPlanner {
            inner: Arc::new(QueryPlannerInner {
                plan_cache: DashMap::new(),
                cache_limit: 100,
                index_version: AtomicU64::new(0),
            }),
        }
    }

    /// Call whenever the index set changes; drops every cached plan.
    pub fn invalidate_cache(&self) {
        self.inner.plan_cache.clear();
        self.inner.index_version.fetch_add(1, Ordering::Relaxed);
    }

    pub fn create_plan(
        &self,
        filter: &MatchExpression,
        options: &FindOptions,
        catalog: &IndexCatalog,
    ) -> DocketResult<QueryPlan> {
        let cache_key = self.compute_cache_key(filter, options);
        if let Some(cached) = self.inner.plan_cache.get(&cache_key) {
            return Ok(cached.clone());
        }

        let plan = self.create_plan_internal(filter, options, catalog)?;

        if self.inner.plan_cache.len() < self.inner.cache_limit {
            self.inner.plan_cache.insert(cache_key, plan.clone());
        }
        Ok(plan)
    }

    fn compute_cache_key(&self, filter: &MatchExpression, options: &FindOptions) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.inner
            .index_version
            .load(Ordering::Relaxed)
            .hash(&mut hasher);
        filter.to_string().hash(&mut hasher);
        if let Some(sort) = &options.sort {
            for (field, order) in sort.fields() {
                field.hash(&mut hasher);
                (*order == SortOrder::Descending).hash(&mut hasher);
            }
        }
        options.skip.hash(&mut hasher);
        options.limit.hash(&mut hasher);
        options.hint.hash(&mut hasher);
        if let Some(projection) = &options.projection {
            for field in projection.fields() {
                field.hash(&mut hasher);
            }
            projection.includes_id().hash(&mut hasher);
        }
        hasher.finish()
    }

    fn create_plan_internal(
        &self,
        filter: &MatchExpression,
        options: &FindOptions,
        catalog: &IndexCatalog,
    ) -> DocketResult<QueryPlan> {
        // a top-level $or is planned clause by clause; results are unioned
        // with dedup by record identity
        if let MatchExpression::Or(clauses) = filter {
            if options.hint.is_none() {
                let mut subplans = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    let sub_options = FindOptions::new();
                    subplans.push(self.plan_conjunctive(clause, &sub_options, catalog)?);
                }
                let mut plan = QueryPlan::empty_scan();
                plan.or_subplans = Some(subplans);
                plan.sort = options.sort.clone();
                plan.skip = options.skip;
                plan.limit = options.limit;
                plan.projection = options.projection.clone();
                return Ok(plan);
            }
        }
        self.plan_conjunctive(filter, options, catalog)
    }

    fn plan_conjunctive(
        &self,
        filter: &MatchExpression,
        options: &FindOptions,
        catalog: &IndexCatalog,
    ) -> DocketResult<QueryPlan> {
        let conjuncts: ConjunctVec = filter.conjuncts().into_iter().collect();

        // an unsatisfiable predicate never consults an index
        if conjuncts
            .iter()
            .any(|c| matches!(c, MatchExpression::Nothing))
        {
            return Ok(QueryPlan::empty_scan());
        }

        if let Some(hint) = &options.hint {
            return self.plan_with_hint(hint, filter, &conjuncts, options, catalog);
        }

        // a $text conjunct rides the text index when one exists
        if let Some(plan) = self.plan_text_scan(filter, &conjuncts, options, catalog) {
            return Ok(plan);
        }

        let mut best: Option<(i64, CandidatePlan)> = None;
        for index in catalog.snapshot() {
            let Some(btree) = index.as_btree() else {
                continue;
            };
            let descriptor = btree.descriptor();
            let Some(candidate) = self.build_candidate(&descriptor, &conjuncts, options) else {
                continue;
            };
            let score = candidate.score();
            let better = match &best {
                Some((best_score, _)) => score > *best_score,
                None => true,
            };
            if better {
                best = Some((score, candidate));
            }
        }

        let residual = match filter {
            MatchExpression::All => None,
            other => Some(other.clone()),
        };

        let mut plan = match best {
            Some((_, candidate)) => {
                let covered = self.is_covered(&candidate, &conjuncts, options);
                QueryPlan {
                    scan: ScanChoice::IndexScan(IndexScanPlan {
                        index_name: candidate.descriptor.name().to_string(),
                        key_fields: candidate.descriptor.fields().clone(),
                        bounds: candidate.bounds,
                        reverse: candidate.reverse,
                        covered,
                    }),
                    residual: if covered { None } else { residual },
                    sort: options.sort.clone(),
                    sort_provided_by_scan: candidate.sort_provided,
                    skip: options.skip,
                    limit: options.limit,
                    projection: options.projection.clone(),
                    or_subplans: None,
                }
            }
            None => {
                let mut plan = QueryPlan::collection_scan(residual);
                plan.sort = options.sort.clone();
                plan.skip = options.skip;
                plan.limit = options.limit;
                plan.projection = options.projection.clone();
                plan
            }
        };

        if plan.sort.is_none() {
            plan.sort_provided_by_scan = false;
        }
        Ok(plan)
    }

    fn plan_with_hint(
        &self,
        hint: &str,
        filter: &MatchExpression,
        conjuncts: &[&MatchExpression],
        options: &FindOptions,
        catalog: &IndexCatalog,
    ) -> DocketResult<QueryPlan> {
        let Some(index) = catalog.get(hint) else {
            log::error!("Hinted index {} does not exist", hint);
            return Err(DocketError::new(
                &format!("Hinted index {} does not exist", hint),
                ErrorKind::UnknownHint,
            ));
        };
        let CollectionIndex::BTree(btree) = index else {
            log::error!("Hinted index {} cannot serve this query", hint);
            return Err(DocketError::new(
                &format!("Hinted index {} cannot serve this query", hint),
                ErrorKind::PlanningError,
            ));
        };
        let descriptor = btree.descriptor();
        if let Some(partial) = descriptor.partial_filter() {
            if !partial.implied_by(conjuncts) {
                log::error!(
                    "Hinted partial index {} does not cover the query predicate",
                    hint
                );
                return Err(DocketError::new(
                    &format!(
                        "Hinted partial index {} does not cover the query predicate",
                        hint
                    ),
                    ErrorKind::PlanningError,
                ));
            }
        }

        let (bounds, constrained, exact) = build_bounds(&descriptor, conjuncts);
        let (sort_provided, reverse) = match &options.sort {
            Some(sort) => match sort_satisfied_by(descriptor.fields(), sort) {
                Some(reverse) => (true, reverse),
                None => (false, false),
            },
            None => (false, false),
        };
        let candidate = CandidatePlan {
            descriptor,
            bounds,
            reverse,
            sort_provided,
            constrained,
            exact,
        };
        let covered = self.is_covered(&candidate, conjuncts, options);

        Ok(QueryPlan {
            scan: ScanChoice::IndexScan(IndexScanPlan {
                index_name: candidate.descriptor.name().to_string(),
                key_fields: candidate.descriptor.fields().clone(),
                bounds: candidate.bounds,
                reverse: candidate.reverse,
                covered,
            }),
            residual: if covered || matches!(filter, MatchExpression::All) {
                None
            } else {
                Some(filter.clone())
            },
            sort: options.sort.clone(),
            sort_provided_by_scan: sort_provided,
            skip: options.skip,
            limit: options.limit,
            projection: options.projection.clone(),
            or_subplans: None,
        })
    }

    fn plan_text_scan(
        &self,
        filter: &MatchExpression,
        conjuncts: &[&MatchExpression],
        options: &FindOptions,
        catalog: &IndexCatalog,
    ) -> Option<QueryPlan> {
        let text = conjuncts.iter().find_map(|c| match c {
            MatchExpression::Text { field, query } => Some((field.clone(), query.clone())),
            _ => None,
        })?;

        let index = catalog.snapshot().into_iter().find(|index| {
            index
                .as_text()
                .map(|t| {
                    t.descriptor()
                        .fields()
                        .field_names()
                        .first()
                        .map(|f| *f == text.0)
                        .unwrap_or(false)
                })
                .unwrap_or(false)
        })?;

        Some(QueryPlan {
            scan: ScanChoice::TextScan {
                index_name: index.name().to_string(),
                query: text.1,
            },
            residual: Some(filter.clone()),
            sort: options.sort.clone(),
            sort_provided_by_scan: false,
            skip: options.skip,
            limit: options.limit,
            projection: options.projection.clone(),
            or_subplans: None,
        })
    }

    fn build_candidate(
        &self,
        descriptor: &IndexDescriptor,
        conjuncts: &[&MatchExpression],
        options: &FindOptions,
    ) -> Option<CandidatePlan> {
        if let Some(partial) = descriptor.partial_filter() {
            if !partial.implied_by(conjuncts) {
                return None;
            }
        }

        let (bounds, constrained, exact) = build_bounds(descriptor, conjuncts);
        let (sort_provided, reverse) = match &options.sort {
            Some(sort) => match sort_satisfied_by(descriptor.fields(), sort) {
                Some(reverse) => (true, reverse),
                None => (false, false),
            },
            None => (false, false),
        };

        if constrained == 0 && !sort_provided {
            return None;
        }

        Some(CandidatePlan {
            descriptor: descriptor.clone(),
            bounds,
            reverse,
            sort_provided,
            constrained,
            exact,
        })
    }

    /// Index-only eligibility: every field the query and projection touch
    /// sits in the key pattern, the whole predicate translated exactly into
    /// bounds, and the index is not multikey (element keys cannot
    /// reconstruct the stored document).
    fn is_covered(
        &self,
        candidate: &CandidatePlan,
        conjuncts: &[&MatchExpression],
        options: &FindOptions,
    ) -> bool {
        if candidate.descriptor.is_multikey() {
            return false;
        }
        let Some(projection) = &options.projection else {
            return false;
        };
        let Some(required) = projection.required_fields() else {
            return false;
        };
        if !candidate.descriptor.fields().contains_all(&required) {
            return false;
        }
        if !candidate.exact {
            return false;
        }
        let key_names = candidate.descriptor.fields().field_names();
        conjuncts.iter().all(|c| {
            c.field()
                .map(|f| key_names.contains(&f))
                .unwrap_or(matches!(c, MatchExpression::All))
        })
    }
}

struct CandidatePlan {
    descriptor: IndexDescriptor,
    bounds: IndexBounds,
    reverse: bool,
    sort_provided: bool,
    constrained: usize,
    exact: bool,
}

impl CandidatePlan {
    /// Ranking heuristic (policy, not contract): longer constrained
    /// prefixes win, point bounds beat ranges, providing the sort breaks
    /// ties, unique point lookups get a bonus.
    fn score(&self) -> i64 {
        let points: usize = self
            .bounds
            .fields
            .iter()
            .filter(|b| b.point_count().is_some())
            .count();
        let unique_point = self.descriptor.is_unique()
            && self.constrained == self.descriptor.fields().len()
            && points == self.descriptor.fields().len();
        (self.constrained as i64) * 100
            + (points as i64) * 10
            + (self.sort_provided as i64) * 5
            + (unique_point as i64) * 50
    }
}

/// Translates conjuncts into per-field bounds over the key pattern.
///
/// Returns the bounds, the number of *leading* constrained fields, and
/// whether every conjunct was translated exactly (no residual semantics
/// such as whole-array equality or null/missing equivalence).
fn build_bounds(
    descriptor: &IndexDescriptor,
    conjuncts: &[&MatchExpression],
) -> (IndexBounds, usize, bool) {
    let mut fields = Vec::with_capacity(descriptor.fields().len());
    let mut consumed = vec![false; conjuncts.len()];
    let mut all_exact = true;

    for (path, _) in descriptor.fields().pairs() {
        let mut bound = FieldBound::Any;
        for (i, conjunct) in conjuncts.iter().enumerate() {
            if conjunct.field() != Some(path.as_str()) {
                continue;
            }
            let Some((next, exact)) = conjunct_bound(conjunct) else {
                continue;
            };
            bound = intersect_bounds(bound, next);
            consumed[i] = true;
            if !exact {
                all_exact = false;
            }
        }
        fields.push(bound);
    }

    let bounds = IndexBounds::new(fields);
    let constrained = bounds.constrained_prefix_len();

    // any conjunct that produced no bound leaves the translation inexact
    for (i, conjunct) in conjuncts.iter().enumerate() {
        if !consumed[i] && !matches!(conjunct, MatchExpression::All) {
            all_exact = false;
        }
    }
    (bounds, constrained, all_exact)
}

/// Bound for a single conjunct, with an exactness flag.
fn conjunct_bound(conjunct: &MatchExpression) -> Option<(FieldBound, bool)> {
    match conjunct {
        MatchExpression::Eq { value, .. } => Some(eq_bound(value)),
        MatchExpression::In { values, .. } => {
            let mut points = Vec::new();
            let mut exact = true;
            for value in values {
                let (bound, point_exact) = eq_bound(value);
                if let FieldBound::Points(ps) = bound {
                    points.extend(ps);
                }
                exact &= point_exact;
            }
            Some((FieldBound::Points(points), exact))
        }
        MatchExpression::Cmp { op, value, .. } => {
            let bound = match op {
                ComparisonOp::Gt => FieldBound::Range {
                    min: Some((value.clone(), false)),
                    max: None,
                },
                ComparisonOp::Gte => FieldBound::Range {
                    min: Some((value.clone(), true)),
                    max: None,
                },
                ComparisonOp::Lt => FieldBound::Range {
                    min: None,
                    max: Some((value.clone(), false)),
                },
                ComparisonOp::Lte => FieldBound::Range {
                    min: None,
                    max: Some((value.clone(), true)),
                },
                ComparisonOp::Ne => return None,
            };
            Some((bound, true))
        }
        _ => None,
    }
}

fn eq_bound(value: &Value) -> (FieldBound, bool) {
    match value {
        // whole-array equality also matches element keys: scan the first
        // element's point plus the whole array, then re-filter
        Value::Array(items) => {
            let mut points = vec![value.clone()];
            match items.first() {
                Some(first) => points.push(first.clone()),
                None => points.push(Value::Null),
            }
            (FieldBound::Points(points), false)
        }
        // null keys stand for both explicit null and missing
        Value::Null => (FieldBound::Points(vec![Value::Null]), false),
        other => (FieldBound::Points(vec![other.clone()]), true),
    }
}

fn intersect_bounds(a: FieldBound, b: FieldBound) -> FieldBound {
    match (a, b) {
        (FieldBound::Any, other) | (other, FieldBound::Any) => other,
        (FieldBound::Points(ps), other) | (other, FieldBound::Points(ps)) => {
            FieldBound::Points(ps.into_iter().filter(|p| other.contains(p)).collect())
        }
        (
            FieldBound::Range { min: min_a, max: max_a },
            FieldBound::Range { min: min_b, max: max_b },
        ) => FieldBound::Range {
            min: tighter_min(min_a, min_b),
            max: tighter_max(max_a, max_b),
        },
    }
}

fn tighter_min(
    a: Option<(Value, bool)>,
    b: Option<(Value, bool)>,
) -> Option<(Value, bool)> {
    match (a, b) {
        (None, other) | (other, None) => other,
        (Some((va, ia)), Some((vb, ib))) => match va.cmp(&vb) {
            std::cmp::Ordering::Greater => Some((va, ia)),
            std::cmp::Ordering::Less => Some((vb, ib)),
            std::cmp::Ordering::Equal => Some((va, ia && ib)),
        },
    }
}

fn tighter_max(
    a: Option<(Value, bool)>,
    b: Option<(Value, bool)>,
) -> Option<(Value, bool)> {
    match (a, b) {
        (None, other) | (other, None) => other,
        (Some((va, ia)), Some((vb, ib))) => match va.cmp(&vb) {
            std::cmp::Ordering::Less => Some((va, ia)),
            std::cmp::Ordering::Greater => Some((vb, ib)),
            std::cmp::Ordering::Equal => Some((va, ia && ib)),
        },
    }
}

/// Whether an index's key pattern yields the requested sort order: the sort
/// keys must be a leading prefix, either with matching directions (forward
/// scan) or with every direction flipped (backward scan).
fn sort_satisfied_by(key_fields: &Fields, sort: &SortSpec) -> Option<bool> {
    if sort.is_empty() || sort.fields().len() > key_fields.len() {
        return None;
    }
    let pattern = key_fields.pairs();
    let forward = sort
        .fields()
        .iter()
        .zip(pattern.iter())
        .all(|(s, p)| s.0 == p.0 && s.1 == p.1);
    if forward {
        return Some(false);
    }
    let backward = sort
        .fields()
        .iter()
        .zip(pattern.iter())
        .all(|(s, p)| s.0 == p.0 && s.1 == p.1.reverse());
    if backward {
        return Some(true);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Projection;
    use crate::common::{order_by, DEFAULT_MAX_INDEX_KEY_BYTES};
    use crate::filter::{and, field, or};
    use crate::index::IndexOptions;

    fn catalog_with(indexes: &[(&str, &[&str])]) -> IndexCatalog {
        let catalog = IndexCatalog::new(DEFAULT_MAX_INDEX_KEY_BYTES);
        for (name, field_names) in indexes {
            catalog
                .create_btree(
                    name,
                    Fields::with_names(field_names).unwrap(),
                    &IndexOptions::default(),
                )
                .unwrap();
        }
        catalog
    }

    #[test]
    fn test_no_index_falls_back_to_collscan() {
        let planner = QueryPlanner::new();
        let catalog = IndexCatalog::new(DEFAULT_MAX_INDEX_KEY_BYTES);
        let plan = planner
            .create_plan(&field("a").eq(1.into()), &FindOptions::new(), &catalog)
            .unwrap();
        assert!(matches!(plan.scan, ScanChoice::CollectionScan));
        assert!(plan.residual.is_some());
    }

    #[test]
    fn test_index_selected_for_equality() {
        let planner = QueryPlanner::new();
        let catalog = catalog_with(&[("a_1", &["a"])]);
        let plan = planner
            .create_plan(&field("a").eq(1.into()), &FindOptions::new(), &catalog)
            .unwrap();
        assert_eq!(plan.index_name(), Some("a_1"));
    }

    #[test]
    fn test_unsatisfiable_predicate_plans_empty_scan() {
        let planner = QueryPlanner::new();
        let catalog = catalog_with(&[("a_1", &["a"])]);
        let filter = and(vec![field("a").eq(1.into()), MatchExpression::Nothing]);
        let plan = planner
            .create_plan(&filter, &FindOptions::new(), &catalog)
            .unwrap();
        assert!(matches!(plan.scan, ScanChoice::EmptyScan));
    }

    #[test]
    fn test_longer_prefix_wins() {
        let planner = QueryPlanner::new();
        let catalog = catalog_with(&[("a_1", &["a"]), ("a_1_b_1", &["a", "b"])]);
        let filter = and(vec![field("a").eq(1.into()), field("b").eq(2.into())]);
        let plan = planner
            .create_plan(&filter, &FindOptions::new(), &catalog)
            .unwrap();
        assert_eq!(plan.index_name(), Some("a_1_b_1"));
    }

    #[test]
    fn test_sort_breaks_ties() {
        let planner = QueryPlanner::new();
        let catalog = catalog_with(&[("a_1", &["a"]), ("a_1_c_1", &["a", "c"])]);
        let options = FindOptions::new().with_sort(
            order_by("a", SortOrder::Ascending).then_by("c", SortOrder::Ascending),
        );
        let plan = planner
            .create_plan(&field("a").eq(1.into()), &options, &catalog)
            .unwrap();
        assert_eq!(plan.index_name(), Some("a_1_c_1"));
        assert!(plan.sort_provided_by_scan);
    }

    #[test]
    fn test_reverse_scan_for_flipped_sort() {
        let planner = QueryPlanner::new();
        let catalog = catalog_with(&[("a_1", &["a"])]);
        let options = FindOptions::new().with_sort(order_by("a", SortOrder::Descending));
        let plan = planner
            .create_plan(&field("a").gt(0.into()), &options, &catalog)
            .unwrap();
        match &plan.scan {
            ScanChoice::IndexScan(scan) => assert!(scan.reverse),
            other => panic!("expected index scan, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_index_filtered_out_when_not_implied() {
        let planner = QueryPlanner::new();
        let catalog = IndexCatalog::new(DEFAULT_MAX_INDEX_KEY_BYTES);
        catalog
            .create_btree(
                "a_1_b_1",
                Fields::with_names(&["a", "b"]).unwrap(),
                &IndexOptions::partial(field("b").lt(2.into())),
            )
            .unwrap();

        // {a: 1} alone does not imply b < 2
        let plan = planner
            .create_plan(&field("a").eq(1.into()), &FindOptions::new(), &catalog)
            .unwrap();
        assert!(matches!(plan.scan, ScanChoice::CollectionScan));

        // {a: 1, b: 1} implies b < 2, so the partial index is usable
        let filter = and(vec![field("a").eq(1.into()), field("b").eq(1.into())]);
        let plan = planner
            .create_plan(&filter, &FindOptions::new(), &catalog)
            .unwrap();
        assert_eq!(plan.index_name(), Some("a_1_b_1"));
    }

    #[test]
    fn test_or_plans_clause_wise() {
        let planner = QueryPlanner::new();
        let catalog = catalog_with(&[("a_1", &["a"]), ("b_1", &["b"])]);
        let filter = or(vec![field("a").eq(1.into()), field("b").eq(2.into())]);
        let plan = planner
            .create_plan(&filter, &FindOptions::new(), &catalog)
            .unwrap();
        let subplans = plan.or_subplans.as_ref().unwrap();
        assert_eq!(subplans.len(), 2);
        assert_eq!(subplans[0].index_name(), Some("a_1"));
        assert_eq!(subplans[1].index_name(), Some("b_1"));
    }

    #[test]
    fn test_unknown_hint_is_client_error() {
        let planner = QueryPlanner::new();
        let catalog = catalog_with(&[("a_1", &["a"])]);
        let options = FindOptions::new().with_hint("nope_1");
        let err = planner
            .create_plan(&field("a").eq(1.into()), &options, &catalog)
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UnknownHint);
    }

    #[test]
    fn test_hint_to_uncovering_partial_index_is_planning_error() {
        let planner = QueryPlanner::new();
        let catalog = IndexCatalog::new(DEFAULT_MAX_INDEX_KEY_BYTES);
        catalog
            .create_btree(
                "a_1",
                Fields::with_names(&["a"]).unwrap(),
                &IndexOptions::partial(field("b").lt(2.into())),
            )
            .unwrap();
        let options = FindOptions::new().with_hint("a_1");
        let err = planner
            .create_plan(&field("a").eq(1.into()), &options, &catalog)
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::PlanningError);
    }

    #[test]
    fn test_covered_plan_detection() {
        let planner = QueryPlanner::new();
        let catalog = catalog_with(&[("a_1_b_1", &["a", "b"])]);
        let options = FindOptions::new()
            .with_projection(Projection::include_without_id(&["a", "b"]));
        let plan = planner
            .create_plan(&field("a").eq(1.into()), &options, &catalog)
            .unwrap();
        assert!(plan.is_covered());
        assert!(plan.residual.is_none());
    }

    #[test]
    fn test_projection_outside_key_prevents_coverage() {
        let planner = QueryPlanner::new();
        let catalog = catalog_with(&[("a_1", &["a"])]);
        let options = FindOptions::new()
            .with_projection(Projection::include_without_id(&["a", "b"]));
        let plan = planner
            .create_plan(&field("a").eq(1.into()), &options, &catalog)
            .unwrap();
        assert!(!plan.is_covered());
    }

    #[test]
    fn test_id_projection_prevents_coverage_unless_in_key() {
        let planner = QueryPlanner::new();
        let catalog = catalog_with(&[("a_1", &["a"])]);
        let options =
            FindOptions::new().with_projection(Projection::include(&["a"]));
        let plan = planner
            .create_plan(&field("a").eq(1.into()), &options, &catalog)
            .unwrap();
        assert!(!plan.is_covered());
    }

    #[test]
    fn test_cache_invalidation_on_index_change() {
        let planner = QueryPlanner::new();
        let catalog = IndexCatalog::new(DEFAULT_MAX_INDEX_KEY_BYTES);
        let filter = field("a").eq(1.into());
        let plan = planner
            .create_plan(&filter, &FindOptions::new(), &catalog)
            .unwrap();
        assert!(matches!(plan.scan, ScanChoice::CollectionScan));

        catalog
            .create_btree(
                "a_1",
                Fields::with_names(&["a"]).unwrap(),
                &IndexOptions::default(),
            )
            .unwrap();
        planner.invalidate_cache();

        let plan = planner
            .create_plan(&filter, &FindOptions::new(), &catalog)
            .unwrap();
        assert_eq!(plan.index_name(), Some("a_1"));
    }

    #[test]
    fn test_range_bounds_merge() {
        let planner = QueryPlanner::new();
        let catalog = catalog_with(&[("a_1", &["a"])]);
        let filter = and(vec![field("a").gte(2.into()), field("a").lt(7.into())]);
        let plan = planner
            .create_plan(&filter, &FindOptions::new(), &catalog)
            .unwrap();
        match &plan.scan {
            ScanChoice::IndexScan(scan) => {
                match &scan.bounds.fields[0] {
                    FieldBound::Range { min, max } => {
                        assert_eq!(min.as_ref().unwrap(), &(Value::I32(2), true));
                        assert_eq!(max.as_ref().unwrap(), &(Value::I32(7), false));
                    }
                    other => panic!("expected range bound, got {:?}", other),
                }
            }
            other => panic!("expected index scan, got {:?}", other),
        }
    }
}
