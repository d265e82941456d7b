use crate::collection::Document;
use crate::common::Value;
use crate::errors::DocketResult;
use crate::filter::{ComparisonOp, MatchExpression};

/// Evaluates a predicate against a document.
pub fn matches(doc: &Document, expr: &MatchExpression) -> DocketResult<bool> {
    eval(doc, expr, &EvalContext::top_level())
}

/// Evaluates a predicate against a bare value (an array element inside
/// `$elemMatch`). The empty field path refers to the element itself.
pub fn matches_value(value: &Value, expr: &MatchExpression) -> DocketResult<bool> {
    eval_element(value, expr, &EvalContext::inside_elem_match())
}

#[derive(Clone, Copy)]
struct EvalContext {
    /// At the top level `{field: null}` matches missing fields too. Inside
    /// an `$elemMatch` predicate, missing stays distinct from null unless
    /// the caller mixed in `$exists`.
    null_matches_missing: bool,
}

impl EvalContext {
    fn top_level() -> Self {
        EvalContext {
            null_matches_missing: true,
        }
    }

    fn inside_elem_match() -> Self {
        EvalContext {
            null_matches_missing: false,
        }
    }
}

/// Candidate leaf values a field path resolves to, with array-any
/// expansion: an array leaf contributes itself and each of its elements.
struct Leaves {
    values: Vec<Value>,
    found: bool,
}

impl Leaves {
    fn empty() -> Self {
        Leaves {
            values: Vec::new(),
            found: false,
        }
    }
}

fn resolve_leaves(doc: &Document, path: &str) -> Leaves {
    let mut leaves = Leaves::empty();
    if let Some(value) = doc.get_field(path) {
        push_leaf(value, &mut leaves);
        return leaves;
    }
    if path.contains('.') {
        let segments: Vec<&str> = path.split('.').collect();
        walk(&Value::Document(doc.clone()), &segments, &mut leaves);
    }
    leaves
}

fn push_leaf(value: &Value, leaves: &mut Leaves) {
    leaves.found = true;
    leaves.values.push(value.clone());
    if let Value::Array(items) = value {
        leaves.values.extend(items.iter().cloned());
    }
}

fn walk(current: &Value, segments: &[&str], leaves: &mut Leaves) {
    let Some((head, rest)) = segments.split_first() else {
        push_leaf(current, leaves);
        return;
    };

    match current {
        Value::Document(doc) => {
            if let Some(value) = doc.get_field(head) {
                walk(value, rest, leaves);
            }
        }
        Value::Array(items) => {
            // positional segment targets that slot; the literal-field
            // fanout below is the fallback when the slot is absent
            if let Ok(index) = head.parse::<usize>() {
                if let Some(element) = items.get(index) {
                    walk(element, rest, leaves);
                    return;
                }
            }
            for element in items {
                if let Value::Document(doc) = element {
                    if let Some(value) = doc.get_field(head) {
                        walk(value, rest, leaves);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Resolves a path to the array values it names, unexpanded. Used by
/// `$elemMatch`, which quantifies over elements itself.
fn resolve_arrays(doc: &Document, path: &str) -> Vec<Vec<Value>> {
    let leaves = resolve_leaves(doc, path);
    let mut arrays = Vec::new();
    if !leaves.found {
        return arrays;
    }
    // re-resolve without expansion: keep only the array-typed leaves
    let mut raw = Leaves::empty();
    if let Some(value) = doc.get_field(path) {
        raw.values.push(value.clone());
    } else if path.contains('.') {
        let segments: Vec<&str> = path.split('.').collect();
        walk_raw(&Value::Document(doc.clone()), &segments, &mut raw.values);
    }
    for value in raw.values {
        if let Value::Array(items) = value {
            arrays.push(items);
        }
    }
    arrays
}

fn walk_raw(current: &Value, segments: &[&str], out: &mut Vec<Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(current.clone());
        return;
    };
    match current {
        Value::Document(doc) => {
            if let Some(value) = doc.get_field(head) {
                walk_raw(value, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(element) = items.get(index) {
                    walk_raw(element, rest, out);
                    return;
                }
            }
            for element in items {
                if let Value::Document(doc) = element {
                    if let Some(value) = doc.get_field(head) {
                        walk_raw(value, rest, out);
                    }
                }
            }
        }
        _ => {}
    }
}

fn eval(doc: &Document, expr: &MatchExpression, ctx: &EvalContext) -> DocketResult<bool> {
    match expr {
        MatchExpression::All => Ok(true),
        MatchExpression::Nothing => Ok(false),
        MatchExpression::Eq { field, value } => {
            Ok(eval_eq(&resolve_leaves(doc, field), value, ctx))
        }
        MatchExpression::Cmp { field, op, value } => {
            Ok(eval_cmp(&resolve_leaves(doc, field), *op, value, ctx))
        }
        MatchExpression::In { field, values } => {
            let leaves = resolve_leaves(doc, field);
            Ok(values.iter().any(|v| eval_eq(&leaves, v, ctx)))
        }
        MatchExpression::Nin { field, values } => {
            let leaves = resolve_leaves(doc, field);
            Ok(!values.iter().any(|v| eval_eq(&leaves, v, ctx)))
        }
        MatchExpression::Exists {
            field,
            should_exist,
        } => Ok(resolve_leaves(doc, field).found == *should_exist),
        MatchExpression::Regex { field, regex, .. } => {
            let leaves = resolve_leaves(doc, field);
            Ok(leaves
                .values
                .iter()
                .any(|v| v.as_str().map(|s| regex.is_match(s)).unwrap_or(false)))
        }
        MatchExpression::Text { field, query } => {
            let leaves = resolve_leaves(doc, field);
            Ok(eval_text(&leaves, query))
        }
        MatchExpression::ElemMatch { field, predicate } => {
            let elem_ctx = EvalContext::inside_elem_match();
            for array in resolve_arrays(doc, field) {
                for element in &array {
                    if eval_element(element, predicate, &elem_ctx)? {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        }
        MatchExpression::And(clauses) => {
            for clause in clauses {
                if !eval(doc, clause, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        MatchExpression::Or(clauses) => {
            for clause in clauses {
                if eval(doc, clause, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        MatchExpression::Not(inner) => Ok(!eval(doc, inner, ctx)?),
    }
}

/// Evaluates a predicate against one array element. The empty field path
/// applies the operator to the element itself; named paths require the
/// element to be a sub-document.
fn eval_element(element: &Value, expr: &MatchExpression, ctx: &EvalContext) -> DocketResult<bool> {
    match expr {
        MatchExpression::And(clauses) => {
            for clause in clauses {
                if !eval_element(element, clause, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        MatchExpression::Or(clauses) => {
            for clause in clauses {
                if eval_element(element, clause, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        MatchExpression::Not(inner) => Ok(!eval_element(element, inner, ctx)?),
        other => {
            let field = other.field().unwrap_or("");
            if field.is_empty() {
                let mut leaves = Leaves::empty();
                push_leaf(element, &mut leaves);
                eval_against_leaves(&leaves, other, ctx)
            } else if let Value::Document(doc) = element {
                eval(doc, other, ctx)
            } else {
                Ok(false)
            }
        }
    }
}

fn eval_against_leaves(
    leaves: &Leaves,
    expr: &MatchExpression,
    ctx: &EvalContext,
) -> DocketResult<bool> {
    match expr {
        MatchExpression::Eq { value, .. } => Ok(eval_eq(leaves, value, ctx)),
        MatchExpression::Cmp { op, value, .. } => Ok(eval_cmp(leaves, *op, value, ctx)),
        MatchExpression::In { values, .. } => {
            Ok(values.iter().any(|v| eval_eq(leaves, v, ctx)))
        }
        MatchExpression::Nin { values, .. } => {
            Ok(!values.iter().any(|v| eval_eq(leaves, v, ctx)))
        }
        MatchExpression::Exists { should_exist, .. } => Ok(leaves.found == *should_exist),
        MatchExpression::Regex { regex, .. } => Ok(leaves
            .values
            .iter()
            .any(|v| v.as_str().map(|s| regex.is_match(s)).unwrap_or(false))),
        MatchExpression::Text { query, .. } => Ok(eval_text(leaves, query)),
        MatchExpression::ElemMatch { predicate, .. } => {
            let elem_ctx = EvalContext::inside_elem_match();
            for value in &leaves.values {
                if let Value::Array(items) = value {
                    for element in items {
                        if eval_element(element, predicate, &elem_ctx)? {
                            return Ok(true);
                        }
                    }
                }
            }
            Ok(false)
        }
        MatchExpression::All => Ok(true),
        MatchExpression::Nothing => Ok(false),
        _ => Ok(false),
    }
}

fn eval_eq(leaves: &Leaves, value: &Value, ctx: &EvalContext) -> bool {
    if value.is_null() {
        if leaves.values.iter().any(|v| v.is_null()) {
            return true;
        }
        return !leaves.found && ctx.null_matches_missing;
    }
    leaves.values.iter().any(|v| v == value)
}

fn eval_cmp(leaves: &Leaves, op: ComparisonOp, value: &Value, ctx: &EvalContext) -> bool {
    if op == ComparisonOp::Ne {
        return !eval_eq(leaves, value, ctx);
    }
    if value.is_null()
        && !leaves.found
        && ctx.null_matches_missing
        && matches!(op, ComparisonOp::Gte | ComparisonOp::Lte)
    {
        return true;
    }
    leaves
        .values
        .iter()
        .any(|leaf| op.accepts(leaf.compare_in_query(value)))
}

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn eval_text(leaves: &Leaves, query: &str) -> bool {
    let terms = tokenize(query);
    if terms.is_empty() {
        return false;
    }
    leaves.values.iter().any(|v| {
        v.as_str()
            .map(|s| {
                let tokens = tokenize(s);
                terms.iter().any(|t| tokens.contains(t))
            })
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::filter::{and, field, not, or};

    #[test]
    fn test_simple_equality() {
        let doc = doc! { a: 1, b: "x" };
        assert!(matches(&doc, &field("a").eq(1.into())).unwrap());
        assert!(matches(&doc, &field("b").eq("x".into())).unwrap());
        assert!(!matches(&doc, &field("a").eq(2.into())).unwrap());
    }

    #[test]
    fn test_array_any_element_semantics() {
        let doc = doc! { a: [1, 2, 3] };
        assert!(matches(&doc, &field("a").eq(2.into())).unwrap());
        assert!(matches(&doc, &field("a").gt(2.into())).unwrap());
        assert!(!matches(&doc, &field("a").gt(3.into())).unwrap());
    }

    #[test]
    fn test_whole_array_equality() {
        let doc = doc! { a: [1, 2] };
        let whole = field("a").eq(Value::Array(vec![Value::I32(1), Value::I32(2)]));
        assert!(matches(&doc, &whole).unwrap());
    }

    #[test]
    fn test_null_matches_missing_at_top_level() {
        let with_null = doc! { a: (Value::Null) };
        let without = doc! { b: 1 };
        let query = field("a").eq(Value::Null);
        assert!(matches(&with_null, &query).unwrap());
        assert!(matches(&without, &query).unwrap());
    }

    #[test]
    fn test_exists_distinguishes_null_from_missing() {
        let with_null = doc! { a: (Value::Null) };
        let without = doc! { b: 1 };
        assert!(matches(&with_null, &field("a").exists(true)).unwrap());
        assert!(!matches(&without, &field("a").exists(true)).unwrap());
        assert!(matches(&without, &field("a").exists(false)).unwrap());
    }

    #[test]
    fn test_nan_ordering_rules() {
        let nan_doc = doc! { a: (f64::NAN) };
        let num_doc = doc! { a: (5.0) };

        // equality: NaN matches only NaN
        assert!(matches(&nan_doc, &field("a").eq(f64::NAN.into())).unwrap());
        assert!(!matches(&num_doc, &field("a").eq(f64::NAN.into())).unwrap());

        // strict ordering never matches NaN on either side
        assert!(!matches(&nan_doc, &field("a").lt(10.0.into())).unwrap());
        assert!(!matches(&nan_doc, &field("a").gt((-10.0).into())).unwrap());
        assert!(!matches(&num_doc, &field("a").lt(f64::NAN.into())).unwrap());
        assert!(!matches(&num_doc, &field("a").gt(f64::NAN.into())).unwrap());

        // $lte/$gte against NaN match only NaN
        assert!(matches(&nan_doc, &field("a").lte(f64::NAN.into())).unwrap());
        assert!(matches(&nan_doc, &field("a").gte(f64::NAN.into())).unwrap());
        assert!(!matches(&num_doc, &field("a").lte(f64::NAN.into())).unwrap());
    }

    #[test]
    fn test_in_nin() {
        let doc = doc! { a: 2 };
        assert!(matches(&doc, &field("a").within(vec![1.into(), 2.into()])).unwrap());
        assert!(!matches(&doc, &field("a").not_within(vec![1.into(), 2.into()])).unwrap());
        // $in with null matches missing
        let other = doc! { b: 1 };
        assert!(matches(&other, &field("a").within(vec![Value::Null])).unwrap());
    }

    #[test]
    fn test_ne_excludes_missing_for_null() {
        let missing = doc! { b: 1 };
        // {a: {$ne: null}} must not match a document missing the field
        assert!(!matches(&missing, &field("a").ne(Value::Null)).unwrap());
        let present = doc! { a: 3 };
        assert!(matches(&present, &field("a").ne(Value::Null)).unwrap());
    }

    #[test]
    fn test_positional_path() {
        let doc = doc! { a: [10, 20, 30] };
        assert!(matches(&doc, &field("a.1").eq(20.into())).unwrap());
        assert!(!matches(&doc, &field("a.1").eq(10.into())).unwrap());
    }

    #[test]
    fn test_positional_fallback_to_literal_field() {
        let doc = doc! { a: [{ "3": "x" }] };
        assert!(matches(&doc, &field("a.3").eq("x".into())).unwrap());
    }

    #[test]
    fn test_dotted_path_through_array_of_subdocs() {
        let doc = doc! { orders: [{ total: 10 }, { total: 25 }] };
        assert!(matches(&doc, &field("orders.total").gt(20.into())).unwrap());
        assert!(!matches(&doc, &field("orders.total").gt(30.into())).unwrap());
    }

    #[test]
    fn test_elem_match_requires_single_element() {
        // one clause satisfied by one element, the other by another:
        // plain AND matches, $elemMatch must not
        let doc = doc! { a: [{ x: 1, y: 9 }, { x: 5, y: 2 }] };
        let loose = and(vec![
            field("a.x").eq(1.into()),
            field("a.y").eq(2.into()),
        ]);
        assert!(matches(&doc, &loose).unwrap());

        let strict = field("a").elem_match(and(vec![
            field("x").eq(1.into()),
            field("y").eq(2.into()),
        ]));
        assert!(!matches(&doc, &strict).unwrap());

        let satisfied = field("a").elem_match(and(vec![
            field("x").eq(5.into()),
            field("y").eq(2.into()),
        ]));
        assert!(matches(&doc, &satisfied).unwrap());
    }

    #[test]
    fn test_elem_match_value_form() {
        let doc = doc! { scores: [3, 8, 11] };
        let predicate = field("scores").elem_match(and(vec![
            field("").gt(5.into()),
            field("").lt(10.into()),
        ]));
        assert!(matches(&doc, &predicate).unwrap());

        let none = field("scores").elem_match(field("").gt(20.into()));
        assert!(!matches(&doc, &none).unwrap());
    }

    #[test]
    fn test_elem_match_does_not_equate_null_and_missing() {
        let doc = doc! { a: [{ x: 1 }] };
        let predicate = field("a").elem_match(field("y").eq(Value::Null));
        assert!(!matches(&doc, &predicate).unwrap());

        let with_exists = field("a").elem_match(field("y").exists(false));
        assert!(matches(&doc, &with_exists).unwrap());
    }

    #[test]
    fn test_or_and_not() {
        let doc = doc! { a: 1, b: 2 };
        let expr = or(vec![field("a").eq(9.into()), field("b").eq(2.into())]);
        assert!(matches(&doc, &expr).unwrap());
        assert!(!matches(&doc, &not(expr)).unwrap());
    }

    #[test]
    fn test_regex_match() {
        let doc = doc! { name: "document store" };
        let expr = field("name").regex("^doc.*store$").unwrap();
        assert!(matches(&doc, &expr).unwrap());
        let miss = field("name").regex("^store").unwrap();
        assert!(!matches(&doc, &miss).unwrap());
    }

    #[test]
    fn test_text_match_any_term() {
        let doc = doc! { body: "The quick brown Fox" };
        assert!(matches(&doc, &field("body").text("fox jumps")).unwrap());
        assert!(!matches(&doc, &field("body").text("lazy dog")).unwrap());
    }

    #[test]
    fn test_cross_type_comparison_never_matches() {
        let doc = doc! { a: "5" };
        assert!(!matches(&doc, &field("a").gt(1.into())).unwrap());
        assert!(!matches(&doc, &field("a").lt(10.into())).unwrap());
    }
}
