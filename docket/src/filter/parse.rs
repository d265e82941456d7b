use crate::collection::Document;
use crate::common::{Value, DEFAULT_MAX_REGEX_PATTERN_LEN};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use crate::filter::{ComparisonOp, MatchExpression};

/// Parses a query document into a [MatchExpression].
///
/// The surface is the familiar operator-document shape:
///
/// ```ignore
/// parse_filter(&doc! {
///     age: { "$gte": 21 },
///     name: { "$regex": "^a" },
///     "$or": [ { city: "Oslo" }, { city: "Bergen" } ],
/// })?;
/// ```
///
/// An empty document matches everything. Structural problems (unknown
/// operators, empty `$or` arrays, non-array `$in` operands) are validation
/// errors raised here, before any execution starts.
pub fn parse_filter(doc: &Document) -> DocketResult<MatchExpression> {
    if doc.is_empty() {
        return Ok(MatchExpression::All);
    }

    let mut clauses = Vec::new();
    for (key, value) in doc.iter() {
        if let Some(operator) = key.strip_prefix('$') {
            clauses.push(parse_logical(operator, value)?);
        } else {
            clauses.push(parse_field(key, value)?);
        }
    }

    if clauses.len() == 1 {
        Ok(clauses.pop().unwrap_or(MatchExpression::All))
    } else {
        Ok(MatchExpression::And(clauses))
    }
}

fn parse_logical(operator: &str, value: &Value) -> DocketResult<MatchExpression> {
    match operator {
        "or" | "and" => {
            let Value::Array(items) = value else {
                return Err(validation_error(&format!(
                    "${} requires an array of filter documents",
                    operator
                )));
            };
            if items.is_empty() {
                return Err(validation_error(&format!(
                    "${} requires a non-empty array",
                    operator
                )));
            }
            let mut clauses = Vec::with_capacity(items.len());
            for item in items {
                let Value::Document(sub) = item else {
                    return Err(validation_error(&format!(
                        "${} array elements must be documents",
                        operator
                    )));
                };
                clauses.push(parse_filter(sub)?);
            }
            Ok(if operator == "or" {
                MatchExpression::Or(clauses)
            } else {
                MatchExpression::And(clauses)
            })
        }
        other => Err(validation_error(&format!(
            "Unknown top-level operator: ${}",
            other
        ))),
    }
}

fn parse_field(field: &str, value: &Value) -> DocketResult<MatchExpression> {
    match value {
        Value::Document(spec) if is_operator_document(spec) => {
            let mut clauses = Vec::new();
            for (op_key, operand) in spec.iter() {
                clauses.push(parse_operator(field, op_key, operand)?);
            }
            if clauses.len() == 1 {
                Ok(clauses.pop().unwrap_or(MatchExpression::All))
            } else {
                Ok(MatchExpression::And(clauses))
            }
        }
        other => Ok(MatchExpression::Eq {
            field: field.to_string(),
            value: other.clone(),
        }),
    }
}

fn is_operator_document(doc: &Document) -> bool {
    !doc.is_empty() && doc.field_names().iter().all(|name| name.starts_with('$'))
}

fn parse_operator(field: &str, op_key: &str, operand: &Value) -> DocketResult<MatchExpression> {
    let field = field.to_string();
    match op_key {
        "$eq" => Ok(MatchExpression::Eq {
            field,
            value: operand.clone(),
        }),
        "$gt" | "$gte" | "$lt" | "$lte" | "$ne" => {
            let op = match op_key {
                "$gt" => ComparisonOp::Gt,
                "$gte" => ComparisonOp::Gte,
                "$lt" => ComparisonOp::Lt,
                "$lte" => ComparisonOp::Lte,
                _ => ComparisonOp::Ne,
            };
            Ok(MatchExpression::Cmp {
                field,
                op,
                value: operand.clone(),
            })
        }
        "$in" | "$nin" => {
            let Value::Array(values) = operand else {
                return Err(validation_error(&format!(
                    "{} requires an array operand",
                    op_key
                )));
            };
            if op_key == "$in" {
                Ok(MatchExpression::In {
                    field,
                    values: values.clone(),
                })
            } else {
                Ok(MatchExpression::Nin {
                    field,
                    values: values.clone(),
                })
            }
        }
        "$exists" => {
            let should_exist = match operand {
                Value::Bool(b) => *b,
                v if v.is_numeric() => v.as_f64().unwrap_or(0.0) != 0.0,
                _ => {
                    return Err(validation_error("$exists requires a boolean operand"));
                }
            };
            Ok(MatchExpression::Exists {
                field,
                should_exist,
            })
        }
        "$regex" => {
            let Value::String(pattern) = operand else {
                return Err(validation_error("$regex requires a string operand"));
            };
            MatchExpression::regex(&field, pattern, DEFAULT_MAX_REGEX_PATTERN_LEN)
        }
        "$text" => {
            let Value::String(query) = operand else {
                return Err(validation_error("$text requires a string operand"));
            };
            Ok(MatchExpression::Text {
                field,
                query: query.clone(),
            })
        }
        "$elemMatch" => {
            let Value::Document(spec) = operand else {
                return Err(validation_error("$elemMatch requires a document operand"));
            };
            let predicate = if is_operator_document(spec) {
                // value form: operators apply to the element itself
                let mut clauses = Vec::new();
                for (op_key, operand) in spec.iter() {
                    clauses.push(parse_operator("", op_key, operand)?);
                }
                if clauses.len() == 1 {
                    clauses.pop().unwrap_or(MatchExpression::All)
                } else {
                    MatchExpression::And(clauses)
                }
            } else {
                parse_filter(spec)?
            };
            Ok(MatchExpression::ElemMatch {
                field,
                predicate: Box::new(predicate),
            })
        }
        "$not" => {
            let Value::Document(spec) = operand else {
                return Err(validation_error("$not requires an operator document"));
            };
            if !is_operator_document(spec) {
                return Err(validation_error("$not requires an operator document"));
            }
            let mut clauses = Vec::new();
            for (op_key, operand) in spec.iter() {
                clauses.push(parse_operator(&field, op_key, operand)?);
            }
            let inner = if clauses.len() == 1 {
                clauses.pop().unwrap_or(MatchExpression::All)
            } else {
                MatchExpression::And(clauses)
            };
            Ok(MatchExpression::Not(Box::new(inner)))
        }
        other => {
            log::error!("Unknown query operator {}", other);
            Err(validation_error(&format!(
                "Unknown query operator: {}",
                other
            )))
        }
    }
}

pub(crate) fn validation_error(message: &str) -> DocketError {
    log::error!("{}", message);
    DocketError::new(message, ErrorKind::BadValue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::filter::matches;

    #[test]
    fn test_empty_filter_matches_all() {
        let expr = parse_filter(&doc! {}).unwrap();
        assert!(matches(&doc! { a: 1 }, &expr).unwrap());
    }

    #[test]
    fn test_direct_equality() {
        let expr = parse_filter(&doc! { a: 1 }).unwrap();
        assert!(matches(&doc! { a: 1 }, &expr).unwrap());
        assert!(!matches(&doc! { a: 2 }, &expr).unwrap());
    }

    #[test]
    fn test_operator_document() {
        let expr = parse_filter(&doc! { a: { "$gte": 2, "$lt": 5 } }).unwrap();
        assert!(matches(&doc! { a: 3 }, &expr).unwrap());
        assert!(!matches(&doc! { a: 1 }, &expr).unwrap());
        assert!(!matches(&doc! { a: 5 }, &expr).unwrap());
    }

    #[test]
    fn test_or_parsing() {
        let expr = parse_filter(&doc! {
            "$or": [ { a: 1 }, { b: { "$gt": 5 } } ],
        })
        .unwrap();
        assert!(matches(&doc! { a: 1 }, &expr).unwrap());
        assert!(matches(&doc! { b: 9 }, &expr).unwrap());
        assert!(!matches(&doc! { a: 2, b: 2 }, &expr).unwrap());
    }

    #[test]
    fn test_empty_or_rejected() {
        let spec = doc! { "$or": [] };
        assert!(parse_filter(&spec).is_err());
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let spec = doc! { a: { "$frobnicate": 1 } };
        let err = parse_filter(&spec).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::BadValue);
    }

    #[test]
    fn test_in_requires_array() {
        let spec = doc! { a: { "$in": 3 } };
        assert!(parse_filter(&spec).is_err());
    }

    #[test]
    fn test_elem_match_object_form() {
        let expr = parse_filter(&doc! {
            items: { "$elemMatch": { qty: { "$gt": 10 }, sku: "abc" } },
        })
        .unwrap();
        let hit = doc! { items: [{ qty: 20, sku: "abc" }] };
        let miss = doc! { items: [{ qty: 20, sku: "xyz" }, { qty: 5, sku: "abc" }] };
        assert!(matches(&hit, &expr).unwrap());
        assert!(!matches(&miss, &expr).unwrap());
    }

    #[test]
    fn test_elem_match_value_form() {
        let expr = parse_filter(&doc! {
            scores: { "$elemMatch": { "$gte": 80, "$lt": 90 } },
        })
        .unwrap();
        assert!(matches(&doc! { scores: [70, 85] }, &expr).unwrap());
        assert!(!matches(&doc! { scores: [70, 95] }, &expr).unwrap());
    }

    #[test]
    fn test_not_operator() {
        let expr = parse_filter(&doc! { a: { "$not": { "$gt": 5 } } }).unwrap();
        assert!(matches(&doc! { a: 3 }, &expr).unwrap());
        assert!(!matches(&doc! { a: 9 }, &expr).unwrap());
    }

    #[test]
    fn test_embedded_document_equality_is_not_operator_doc() {
        // a plain nested document is an equality match on the whole value
        let expr = parse_filter(&doc! { a: { b: 1 } }).unwrap();
        assert!(matches(&doc! { a: { b: 1 } }, &expr).unwrap());
        assert!(!matches(&doc! { a: { b: 2 } }, &expr).unwrap());
    }
}
