//! Query predicates.
//!
//! Predicates are built fluently (`field("age").gt(21.into())`), parsed from
//! query documents (`parse_filter`), and evaluated against documents
//! (`matches`). The predicate tree itself is the closed
//! [MatchExpression] sum type.

mod evaluate;
mod expression;
mod parse;

pub use evaluate::{matches, matches_value};
pub(crate) use evaluate::tokenize;
pub use expression::{ComparisonOp, MatchExpression};
pub use parse::parse_filter;
pub(crate) use parse::validation_error;

use crate::common::{Value, DEFAULT_MAX_REGEX_PATTERN_LEN};
use crate::errors::DocketResult;

/// Starts a fluent predicate on a field path.
pub fn field(name: &str) -> FieldPredicate {
    FieldPredicate {
        field: name.to_string(),
    }
}

/// Matches every document.
pub fn all() -> MatchExpression {
    MatchExpression::All
}

/// Combines predicates with logical AND.
pub fn and(clauses: Vec<MatchExpression>) -> MatchExpression {
    MatchExpression::And(clauses)
}

/// Combines predicates with logical OR.
pub fn or(clauses: Vec<MatchExpression>) -> MatchExpression {
    MatchExpression::Or(clauses)
}

/// Negates a predicate.
pub fn not(clause: MatchExpression) -> MatchExpression {
    MatchExpression::Not(Box::new(clause))
}

/// Fluent builder for single-field predicates.
pub struct FieldPredicate {
    field: String,
}

impl FieldPredicate {
    pub fn eq(self, value: Value) -> MatchExpression {
        MatchExpression::Eq {
            field: self.field,
            value,
        }
    }

    pub fn ne(self, value: Value) -> MatchExpression {
        MatchExpression::Cmp {
            field: self.field,
            op: ComparisonOp::Ne,
            value,
        }
    }

    pub fn gt(self, value: Value) -> MatchExpression {
        MatchExpression::Cmp {
            field: self.field,
            op: ComparisonOp::Gt,
            value,
        }
    }

    pub fn gte(self, value: Value) -> MatchExpression {
        MatchExpression::Cmp {
            field: self.field,
            op: ComparisonOp::Gte,
            value,
        }
    }

    pub fn lt(self, value: Value) -> MatchExpression {
        MatchExpression::Cmp {
            field: self.field,
            op: ComparisonOp::Lt,
            value,
        }
    }

    pub fn lte(self, value: Value) -> MatchExpression {
        MatchExpression::Cmp {
            field: self.field,
            op: ComparisonOp::Lte,
            value,
        }
    }

    pub fn within(self, values: Vec<Value>) -> MatchExpression {
        MatchExpression::In {
            field: self.field,
            values,
        }
    }

    pub fn not_within(self, values: Vec<Value>) -> MatchExpression {
        MatchExpression::Nin {
            field: self.field,
            values,
        }
    }

    pub fn exists(self, should_exist: bool) -> MatchExpression {
        MatchExpression::Exists {
            field: self.field,
            should_exist,
        }
    }

    pub fn regex(self, pattern: &str) -> DocketResult<MatchExpression> {
        MatchExpression::regex(&self.field, pattern, DEFAULT_MAX_REGEX_PATTERN_LEN)
    }

    pub fn text(self, query: &str) -> MatchExpression {
        MatchExpression::Text {
            field: self.field,
            query: query.to_string(),
        }
    }

    pub fn elem_match(self, predicate: MatchExpression) -> MatchExpression {
        MatchExpression::ElemMatch {
            field: self.field,
            predicate: Box::new(predicate),
        }
    }
}
