use crate::common::Value;
use crate::errors::{DocketError, DocketResult, ErrorKind};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// Comparison operators for [MatchExpression::Cmp].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Ne,
}

impl ComparisonOp {
    pub fn token(&self) -> &'static str {
        match self {
            ComparisonOp::Gt => "$gt",
            ComparisonOp::Gte => "$gte",
            ComparisonOp::Lt => "$lt",
            ComparisonOp::Lte => "$lte",
            ComparisonOp::Ne => "$ne",
        }
    }

    /// Whether a query-level comparison outcome satisfies this operator.
    /// `None` (incomparable, e.g. exactly one NaN side) satisfies nothing.
    pub fn accepts(&self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (ComparisonOp::Gt, Some(Ordering::Greater)) => true,
            (ComparisonOp::Gte, Some(Ordering::Greater | Ordering::Equal)) => true,
            (ComparisonOp::Lt, Some(Ordering::Less)) => true,
            (ComparisonOp::Lte, Some(Ordering::Less | Ordering::Equal)) => true,
            // Ne is handled by negating equality over the whole leaf set,
            // not per leaf
            _ => false,
        }
    }
}

/// A query predicate over documents.
///
/// The operator set is closed: every variant the engine understands is a
/// case of this enum, and evaluation, planning, and validation dispatch with
/// exhaustive matches so a missing case is a compile error rather than a
/// runtime surprise.
///
/// Field paths may be dotted (`"a.b"`); a predicate on an array-valued field
/// matches when any element satisfies it (or the whole array does). The
/// empty path `""` inside an `ElemMatch` predicate refers to the array
/// element itself.
#[derive(Debug, Clone)]
pub enum MatchExpression {
    /// Matches every document.
    All,
    /// Provably matches nothing. Planned as an immediate empty scan.
    Nothing,
    /// Field equality, including whole-array and any-element equality.
    Eq { field: String, value: Value },
    /// Ordered comparison or negated equality.
    Cmp {
        field: String,
        op: ComparisonOp,
        value: Value,
    },
    /// Matches when any leaf equals any listed value.
    In { field: String, values: Vec<Value> },
    /// Negation of [MatchExpression::In].
    Nin { field: String, values: Vec<Value> },
    /// Field presence check. `$exists: false` matches only missing fields.
    Exists { field: String, should_exist: bool },
    /// Regular-expression match over string leaves.
    Regex {
        field: String,
        pattern: String,
        regex: regex::Regex,
    },
    /// Token-based text match, answerable from a text index.
    Text { field: String, query: String },
    /// Matches when a single array element satisfies the whole predicate.
    ElemMatch {
        field: String,
        predicate: Box<MatchExpression>,
    },
    /// Conjunction.
    And(Vec<MatchExpression>),
    /// Disjunction. Clauses may be planned independently.
    Or(Vec<MatchExpression>),
    /// Negation.
    Not(Box<MatchExpression>),
}

impl MatchExpression {
    /// Builds a regex predicate, enforcing the pattern length cap.
    pub fn regex(field: &str, pattern: &str, max_pattern_len: usize) -> DocketResult<Self> {
        if pattern.len() > max_pattern_len {
            log::error!(
                "Regex pattern of {} bytes exceeds the {} byte limit",
                pattern.len(),
                max_pattern_len
            );
            return Err(DocketError::new(
                &format!("Regex pattern exceeds {} bytes", max_pattern_len),
                ErrorKind::RegexTooLong,
            ));
        }
        let regex = regex::Regex::new(pattern).map_err(|e| {
            log::error!("Invalid regex pattern: {}", e);
            DocketError::new(&format!("Invalid regex pattern: {}", e), ErrorKind::BadValue)
        })?;
        Ok(MatchExpression::Regex {
            field: field.to_string(),
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Flattens nested conjunctions into a single clause list.
    pub fn conjuncts(&self) -> Vec<&MatchExpression> {
        match self {
            MatchExpression::And(clauses) => {
                clauses.iter().flat_map(|c| c.conjuncts()).collect()
            }
            other => vec![other],
        }
    }

    /// The single field path this predicate constrains, when it has one.
    pub fn field(&self) -> Option<&str> {
        match self {
            MatchExpression::Eq { field, .. }
            | MatchExpression::Cmp { field, .. }
            | MatchExpression::In { field, .. }
            | MatchExpression::Nin { field, .. }
            | MatchExpression::Exists { field, .. }
            | MatchExpression::Regex { field, .. }
            | MatchExpression::Text { field, .. }
            | MatchExpression::ElemMatch { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Every field path referenced anywhere in the predicate tree.
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields.sort_unstable();
        fields.dedup();
        fields
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            MatchExpression::All | MatchExpression::Nothing => {}
            MatchExpression::And(clauses) | MatchExpression::Or(clauses) => {
                for clause in clauses {
                    clause.collect_fields(out);
                }
            }
            MatchExpression::Not(inner) => inner.collect_fields(out),
            other => {
                if let Some(field) = other.field() {
                    out.push(field);
                }
            }
        }
    }

    /// Whether this conjunct can drive an index scan over its field.
    pub fn is_indexable(&self) -> bool {
        matches!(
            self,
            MatchExpression::Eq { .. }
                | MatchExpression::Cmp { .. }
                | MatchExpression::In { .. }
                | MatchExpression::Text { .. }
        )
    }

    /// Conservative implication check: does a query made of
    /// `query_conjuncts` provably imply this predicate?
    ///
    /// Used to decide whether a partial index's filter covers a query.
    /// Returns `false` whenever implication cannot be established.
    pub fn implied_by(&self, query_conjuncts: &[&MatchExpression]) -> bool {
        match self {
            MatchExpression::All => true,
            MatchExpression::And(clauses) => clauses
                .iter()
                .all(|clause| clause.implied_by(query_conjuncts)),
            MatchExpression::Eq { field, value } => query_conjuncts.iter().any(|q| match q {
                MatchExpression::Eq { field: qf, value: qv } => qf == field && qv == value,
                _ => false,
            }),
            MatchExpression::Cmp { field, op, value } => query_conjuncts
                .iter()
                .any(|q| conjunct_implies_cmp(q, field, *op, value)),
            MatchExpression::Exists {
                field,
                should_exist: true,
            } => query_conjuncts.iter().any(|q| match q {
                MatchExpression::Eq { field: qf, value } => qf == field && !value.is_null(),
                MatchExpression::Cmp { field: qf, op, .. } => {
                    qf == field && *op != ComparisonOp::Ne
                }
                MatchExpression::Exists {
                    field: qf,
                    should_exist: true,
                } => qf == field,
                _ => false,
            }),
            _ => false,
        }
    }
}

fn conjunct_implies_cmp(
    query: &MatchExpression,
    field: &str,
    op: ComparisonOp,
    bound: &Value,
) -> bool {
    match query {
        MatchExpression::Eq { field: qf, value } if qf == field => {
            op.accepts(value.compare_in_query(bound))
                || (op == ComparisonOp::Ne && value != bound)
        }
        MatchExpression::Cmp {
            field: qf,
            op: qop,
            value,
        } if qf == field => range_implies(*qop, value, op, bound),
        _ => false,
    }
}

/// Whether `field qop qval` implies `field op bound` for all field values.
fn range_implies(qop: ComparisonOp, qval: &Value, op: ComparisonOp, bound: &Value) -> bool {
    let Some(ordering) = qval.compare_in_query(bound) else {
        return false;
    };
    match (qop, op) {
        (ComparisonOp::Gt, ComparisonOp::Gt) => ordering != Ordering::Less,
        (ComparisonOp::Gt, ComparisonOp::Gte) => ordering != Ordering::Less,
        (ComparisonOp::Gte, ComparisonOp::Gte) => ordering != Ordering::Less,
        (ComparisonOp::Gte, ComparisonOp::Gt) => ordering == Ordering::Greater,
        (ComparisonOp::Lt, ComparisonOp::Lt) => ordering != Ordering::Greater,
        (ComparisonOp::Lt, ComparisonOp::Lte) => ordering != Ordering::Greater,
        (ComparisonOp::Lte, ComparisonOp::Lte) => ordering != Ordering::Greater,
        (ComparisonOp::Lte, ComparisonOp::Lt) => ordering == Ordering::Less,
        _ => false,
    }
}

impl Display for MatchExpression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchExpression::All => write!(f, "{{}}"),
            MatchExpression::Nothing => write!(f, "{{$nothing}}"),
            MatchExpression::Eq { field, value } => write!(f, "{{{}: {}}}", field, value),
            MatchExpression::Cmp { field, op, value } => {
                write!(f, "{{{}: {{{}: {}}}}}", field, op.token(), value)
            }
            MatchExpression::In { field, values } => {
                write!(f, "{{{}: {{$in: {:?}}}}}", field, values)
            }
            MatchExpression::Nin { field, values } => {
                write!(f, "{{{}: {{$nin: {:?}}}}}", field, values)
            }
            MatchExpression::Exists {
                field,
                should_exist,
            } => write!(f, "{{{}: {{$exists: {}}}}}", field, should_exist),
            MatchExpression::Regex { field, pattern, .. } => {
                write!(f, "{{{}: /{}/}}", field, pattern)
            }
            MatchExpression::Text { field, query } => {
                write!(f, "{{{}: {{$text: {:?}}}}}", field, query)
            }
            MatchExpression::ElemMatch { field, predicate } => {
                write!(f, "{{{}: {{$elemMatch: {}}}}}", field, predicate)
            }
            MatchExpression::And(clauses) => {
                let parts: Vec<String> = clauses.iter().map(|c| c.to_string()).collect();
                write!(f, "{{$and: [{}]}}", parts.join(", "))
            }
            MatchExpression::Or(clauses) => {
                let parts: Vec<String> = clauses.iter().map(|c| c.to_string()).collect();
                write!(f, "{{$or: [{}]}}", parts.join(", "))
            }
            MatchExpression::Not(inner) => write!(f, "{{$not: {}}}", inner),
        }
    }
}
