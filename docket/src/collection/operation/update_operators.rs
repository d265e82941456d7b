use crate::collection::Document;
use crate::common::{Value, DOC_ID};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use crate::filter::{matches_value, parse_filter, validation_error, MatchExpression};
use chrono::Utc;
use std::cmp::Ordering;

/// A parsed update specification: either a whole-document replacement or a
/// list of field-level operators.
#[derive(Debug, Clone)]
pub enum UpdateSpec {
    Replace(Document),
    Operators(Vec<UpdateOp>),
}

/// Condition used by `$pull`.
#[derive(Debug, Clone)]
pub enum PullCriterion {
    /// Remove elements equal to the value.
    Value(Value),
    /// Remove elements satisfying the predicate.
    Predicate(MatchExpression),
}

/// One field-level update operator.
#[derive(Debug, Clone)]
pub enum UpdateOp {
    Set { path: String, value: Value },
    SetOnInsert { path: String, value: Value },
    Unset { path: String },
    Inc { path: String, amount: Value },
    Mul { path: String, factor: Value },
    Min { path: String, value: Value },
    Max { path: String, value: Value },
    Rename { from: String, to: String },
    CurrentDate { path: String },
    Push {
        path: String,
        values: Vec<Value>,
        slice: Option<i64>,
        sort: Option<i32>,
        position: Option<usize>,
    },
    AddToSet { path: String, values: Vec<Value> },
    Pull { path: String, criterion: PullCriterion },
    PullAll { path: String, values: Vec<Value> },
    Pop { path: String, front: bool },
}

impl UpdateSpec {
    /// Parses an update document. All-operator keys make an operator
    /// update, no operator keys make a replacement; mixing is an error.
    pub fn parse(spec: &Document) -> DocketResult<UpdateSpec> {
        if spec.is_empty() {
            return Err(validation_error("Update document cannot be empty"));
        }
        let operator_keys = spec
            .field_names()
            .iter()
            .filter(|k| k.starts_with('$'))
            .count();
        if operator_keys == 0 {
            return Ok(UpdateSpec::Replace(spec.clone()));
        }
        if operator_keys != spec.len() {
            return Err(validation_error(
                "Update document cannot mix operators and replacement fields",
            ));
        }

        let mut ops = Vec::new();
        for (operator, operand) in spec.iter() {
            let Value::Document(fields) = operand else {
                return Err(validation_error(&format!(
                    "{} requires a document operand",
                    operator
                )));
            };
            for (path, value) in fields.iter() {
                ops.push(parse_op(operator, path, value)?);
            }
        }
        Ok(UpdateSpec::Operators(ops))
    }

    /// Whether this update can seed an upsert (operators can; a replacement
    /// document is the seed itself).
    pub fn is_replacement(&self) -> bool {
        matches!(self, UpdateSpec::Replace(_))
    }

    /// Applies the update to a document, returning the new version.
    /// `on_insert` enables `$setOnInsert` during upsert seeding.
    pub fn apply(&self, doc: &Document, on_insert: bool) -> DocketResult<Document> {
        match self {
            UpdateSpec::Replace(replacement) => {
                let mut updated = replacement.clone();
                // a replacement keeps the original identity
                if let Some(id) = doc.id_value() {
                    if let Some(new_id) = updated.id_value() {
                        if new_id != id {
                            return Err(immutable_id_error());
                        }
                    } else {
                        let mut with_id = Document::new();
                        with_id.put(DOC_ID, id.clone())?;
                        for (key, value) in updated.iter() {
                            with_id.put(key, value.clone())?;
                        }
                        updated = with_id;
                    }
                }
                Ok(updated)
            }
            UpdateSpec::Operators(ops) => {
                let mut updated = doc.clone();
                for op in ops {
                    apply_op(&mut updated, op, on_insert)?;
                }
                Ok(updated)
            }
        }
    }
}

fn parse_op(operator: &str, path: &str, value: &Value) -> DocketResult<UpdateOp> {
    let path = path.to_string();
    match operator {
        "$set" => Ok(UpdateOp::Set {
            path,
            value: value.clone(),
        }),
        "$setOnInsert" => Ok(UpdateOp::SetOnInsert {
            path,
            value: value.clone(),
        }),
        "$unset" => Ok(UpdateOp::Unset { path }),
        "$inc" => {
            if !value.is_numeric() {
                return Err(validation_error("$inc requires a numeric amount"));
            }
            Ok(UpdateOp::Inc {
                path,
                amount: value.clone(),
            })
        }
        "$mul" => {
            if !value.is_numeric() {
                return Err(validation_error("$mul requires a numeric factor"));
            }
            Ok(UpdateOp::Mul {
                path,
                factor: value.clone(),
            })
        }
        "$min" => Ok(UpdateOp::Min {
            path,
            value: value.clone(),
        }),
        "$max" => Ok(UpdateOp::Max {
            path,
            value: value.clone(),
        }),
        "$rename" => {
            let Value::String(to) = value else {
                return Err(validation_error("$rename requires a string target path"));
            };
            Ok(UpdateOp::Rename {
                from: path,
                to: to.clone(),
            })
        }
        "$currentDate" => Ok(UpdateOp::CurrentDate { path }),
        "$push" => parse_push(path, value),
        "$addToSet" => {
            let values = match value {
                Value::Document(spec) if spec.contains_key("$each") => {
                    match spec.get_field("$each") {
                        Some(Value::Array(items)) => items.clone(),
                        _ => {
                            return Err(validation_error("$each requires an array operand"));
                        }
                    }
                }
                other => vec![other.clone()],
            };
            Ok(UpdateOp::AddToSet { path, values })
        }
        "$pull" => {
            let criterion = match value {
                Value::Document(spec) if !spec.is_empty() => {
                    if spec.field_names().iter().all(|k| k.starts_with('$')) {
                        // operator document applies to the element itself
                        let filter = parse_element_predicate(spec)?;
                        PullCriterion::Predicate(filter)
                    } else {
                        PullCriterion::Predicate(parse_filter(spec)?)
                    }
                }
                other => PullCriterion::Value(other.clone()),
            };
            Ok(UpdateOp::Pull { path, criterion })
        }
        "$pullAll" => {
            let Value::Array(values) = value else {
                return Err(validation_error("$pullAll requires an array operand"));
            };
            Ok(UpdateOp::PullAll {
                path,
                values: values.clone(),
            })
        }
        "$pop" => {
            let front = match value.as_i64() {
                Some(-1) => true,
                Some(1) => false,
                _ => {
                    return Err(validation_error("$pop requires 1 or -1"));
                }
            };
            Ok(UpdateOp::Pop { path, front })
        }
        other => Err(validation_error(&format!(
            "Unknown update operator: {}",
            other
        ))),
    }
}

fn parse_element_predicate(spec: &Document) -> DocketResult<MatchExpression> {
    // reuse the filter parser by wrapping the operator document under a
    // placeholder field, then rewrite the field to mean "the element"
    let mut wrapper = Document::new();
    wrapper.put("elem", Value::Document(spec.clone()))?;
    Ok(rewrite_element_field(parse_filter(&wrapper)?))
}

fn rewrite_element_field(expr: MatchExpression) -> MatchExpression {
    match expr {
        MatchExpression::Eq { value, .. } => MatchExpression::Eq {
            field: String::new(),
            value,
        },
        MatchExpression::Cmp { op, value, .. } => MatchExpression::Cmp {
            field: String::new(),
            op,
            value,
        },
        MatchExpression::In { values, .. } => MatchExpression::In {
            field: String::new(),
            values,
        },
        MatchExpression::Nin { values, .. } => MatchExpression::Nin {
            field: String::new(),
            values,
        },
        MatchExpression::Regex {
            pattern, regex, ..
        } => MatchExpression::Regex {
            field: String::new(),
            pattern,
            regex,
        },
        MatchExpression::And(clauses) => {
            MatchExpression::And(clauses.into_iter().map(rewrite_element_field).collect())
        }
        MatchExpression::Not(inner) => {
            MatchExpression::Not(Box::new(rewrite_element_field(*inner)))
        }
        other => other,
    }
}

fn parse_push(path: String, value: &Value) -> DocketResult<UpdateOp> {
    match value {
        Value::Document(spec) if spec.contains_key("$each") => {
            let values = match spec.get_field("$each") {
                Some(Value::Array(items)) => items.clone(),
                _ => {
                    return Err(validation_error("$each requires an array operand"));
                }
            };
            let slice = match spec.get_field("$slice") {
                Some(v) => Some(
                    v.as_i64()
                        .ok_or_else(|| validation_error("$slice requires an integer"))?,
                ),
                None => None,
            };
            let sort = match spec.get_field("$sort") {
                Some(v) => match v.as_i64() {
                    Some(1) => Some(1),
                    Some(-1) => Some(-1),
                    _ => {
                        return Err(validation_error("$sort requires 1 or -1"));
                    }
                },
                None => None,
            };
            let position = match spec.get_field("$position") {
                Some(v) => Some(
                    v.as_i64()
                        .filter(|n| *n >= 0)
                        .ok_or_else(|| validation_error("$position requires a non-negative integer"))?
                        as usize,
                ),
                None => None,
            };
            Ok(UpdateOp::Push {
                path,
                values,
                slice,
                sort,
                position,
            })
        }
        other => Ok(UpdateOp::Push {
            path,
            values: vec![other.clone()],
            slice: None,
            sort: None,
            position: None,
        }),
    }
}

fn apply_op(doc: &mut Document, op: &UpdateOp, on_insert: bool) -> DocketResult<()> {
    match op {
        UpdateOp::Set { path, value } => {
            guard_id_path(path)?;
            doc.put_path(path, value.clone())
        }
        UpdateOp::SetOnInsert { path, value } => {
            if on_insert {
                guard_id_path(path)?;
                doc.put_path(path, value.clone())?;
            }
            Ok(())
        }
        UpdateOp::Unset { path } => {
            guard_id_path(path)?;
            doc.remove_path(path);
            Ok(())
        }
        UpdateOp::Inc { path, amount } => {
            guard_id_path(path)?;
            let current = existing_number(doc, path, "$inc")?;
            let incremented = current.add_numeric(amount)?;
            doc.put_path(path, incremented)
        }
        UpdateOp::Mul { path, factor } => {
            guard_id_path(path)?;
            let current = existing_number(doc, path, "$mul")?;
            let multiplied = current.mul_numeric(factor)?;
            doc.put_path(path, multiplied)
        }
        UpdateOp::Min { path, value } => {
            guard_id_path(path)?;
            let current = doc.get(path);
            if current.is_null() && !path_exists(doc, path) {
                return doc.put_path(path, value.clone());
            }
            if value.cmp(&current) == Ordering::Less {
                doc.put_path(path, value.clone())?;
            }
            Ok(())
        }
        UpdateOp::Max { path, value } => {
            guard_id_path(path)?;
            let current = doc.get(path);
            if current.is_null() && !path_exists(doc, path) {
                return doc.put_path(path, value.clone());
            }
            if value.cmp(&current) == Ordering::Greater {
                doc.put_path(path, value.clone())?;
            }
            Ok(())
        }
        UpdateOp::Rename { from, to } => {
            guard_id_path(from)?;
            guard_id_path(to)?;
            // renaming a missing source is a no-op, not an error
            match doc.remove_path(from) {
                Some(value) => doc.put_path(to, value),
                None => Ok(()),
            }
        }
        UpdateOp::CurrentDate { path } => {
            guard_id_path(path)?;
            doc.put_path(path, Value::DateTime(Utc::now()))
        }
        UpdateOp::Push {
            path,
            values,
            slice,
            sort,
            position,
        } => {
            guard_id_path(path)?;
            let mut array = take_array(doc, path, "$push")?;
            let insert_at = position.unwrap_or(array.len()).min(array.len());
            for (offset, value) in values.iter().enumerate() {
                array.insert(insert_at + offset, value.clone());
            }
            if let Some(direction) = sort {
                array.sort_by(|a, b| {
                    if *direction >= 0 {
                        a.cmp(b)
                    } else {
                        b.cmp(a)
                    }
                });
            }
            if let Some(limit) = slice {
                apply_slice(&mut array, *limit);
            }
            doc.put_path(path, Value::Array(array))
        }
        UpdateOp::AddToSet { path, values } => {
            guard_id_path(path)?;
            let mut array = take_array(doc, path, "$addToSet")?;
            for value in values {
                if !array.contains(value) {
                    array.push(value.clone());
                }
            }
            doc.put_path(path, Value::Array(array))
        }
        UpdateOp::Pull { path, criterion } => {
            guard_id_path(path)?;
            let Some(mut array) = optional_array(doc, path, "$pull")? else {
                return Ok(());
            };
            let mut failure = None;
            array.retain(|element| match criterion {
                PullCriterion::Value(value) => element != value,
                PullCriterion::Predicate(predicate) => {
                    match matches_value(element, predicate) {
                        Ok(hit) => !hit,
                        Err(e) => {
                            failure.get_or_insert(e);
                            true
                        }
                    }
                }
            });
            if let Some(e) = failure {
                return Err(e);
            }
            doc.put_path(path, Value::Array(array))
        }
        UpdateOp::PullAll { path, values } => {
            guard_id_path(path)?;
            let Some(mut array) = optional_array(doc, path, "$pullAll")? else {
                return Ok(());
            };
            array.retain(|element| !values.contains(element));
            doc.put_path(path, Value::Array(array))
        }
        UpdateOp::Pop { path, front } => {
            guard_id_path(path)?;
            let Some(mut array) = optional_array(doc, path, "$pop")? else {
                return Ok(());
            };
            if !array.is_empty() {
                if *front {
                    array.remove(0);
                } else {
                    array.pop();
                }
            }
            doc.put_path(path, Value::Array(array))
        }
    }
}

fn guard_id_path(path: &str) -> DocketResult<()> {
    if path == DOC_ID || path.starts_with("_id.") {
        return Err(immutable_id_error());
    }
    Ok(())
}

fn immutable_id_error() -> DocketError {
    log::error!("The _id field is immutable");
    DocketError::new("The _id field is immutable", ErrorKind::InvalidOperation)
}

fn path_exists(doc: &Document, path: &str) -> bool {
    if doc.contains_key(path) {
        return true;
    }
    if let Some((head, _)) = path.split_once('.') {
        return doc.contains_key(head);
    }
    false
}

fn existing_number(doc: &Document, path: &str, operator: &str) -> DocketResult<Value> {
    let current = doc.get(path);
    if current.is_null() {
        return Ok(Value::I64(0));
    }
    if !current.is_numeric() {
        log::error!(
            "{} cannot apply to non-numeric field {} of type {}",
            operator,
            path,
            current.type_name()
        );
        return Err(DocketError::new(
            &format!("{} cannot apply to non-numeric field {}", operator, path),
            ErrorKind::TypeMismatch,
        ));
    }
    Ok(current)
}

fn take_array(doc: &Document, path: &str, operator: &str) -> DocketResult<Vec<Value>> {
    match doc.get(path) {
        Value::Array(items) => Ok(items),
        Value::Null if !path_exists(doc, path) => Ok(Vec::new()),
        other => {
            log::error!(
                "{} requires an array field at {}, found {}",
                operator,
                path,
                other.type_name()
            );
            Err(DocketError::new(
                &format!("{} requires an array field at {}", operator, path),
                ErrorKind::TypeMismatch,
            ))
        }
    }
}

fn optional_array(doc: &Document, path: &str, operator: &str) -> DocketResult<Option<Vec<Value>>> {
    match doc.get(path) {
        Value::Array(items) => Ok(Some(items)),
        Value::Null => Ok(None),
        other => {
            log::error!(
                "{} requires an array field at {}, found {}",
                operator,
                path,
                other.type_name()
            );
            Err(DocketError::new(
                &format!("{} requires an array field at {}", operator, path),
                ErrorKind::TypeMismatch,
            ))
        }
    }
}

fn apply_slice(array: &mut Vec<Value>, limit: i64) {
    if limit >= 0 {
        array.truncate(limit as usize);
    } else {
        let keep = (-limit) as usize;
        if array.len() > keep {
            let drop = array.len() - keep;
            array.drain(0..drop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn apply(doc: &Document, spec: Document) -> DocketResult<Document> {
        UpdateSpec::parse(&spec)?.apply(doc, false)
    }

    #[test]
    fn test_set_and_unset() {
        let doc = doc! { a: 1, b: 2 };
        let updated = apply(&doc, doc! { "$set": { a: 9, "c.d": 3 }, "$unset": { b: 1 } }).unwrap();
        assert_eq!(updated.get("a"), Value::I32(9));
        assert_eq!(updated.get("c.d"), Value::I32(3));
        assert_eq!(updated.get("b"), Value::Null);
    }

    #[test]
    fn test_inc_on_missing_starts_at_zero() {
        let doc = doc! { a: 1 };
        let updated = apply(&doc, doc! { "$inc": { counter: 5 } }).unwrap();
        assert_eq!(updated.get("counter"), Value::I64(5));
    }

    #[test]
    fn test_inc_overflow_promotes_to_double() {
        let doc = doc! { n: (i64::MAX) };
        let updated = apply(&doc, doc! { "$inc": { n: 1 } }).unwrap();
        assert!(matches!(updated.get("n"), Value::F64(_)));
    }

    #[test]
    fn test_inc_non_numeric_is_type_mismatch() {
        let doc = doc! { a: "text" };
        let err = apply(&doc, doc! { "$inc": { a: 1 } }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_mul() {
        let doc = doc! { n: 6 };
        let updated = apply(&doc, doc! { "$mul": { n: 7 } }).unwrap();
        assert_eq!(updated.get("n"), Value::I64(42));
    }

    #[test]
    fn test_rename_missing_source_is_noop() {
        let doc = doc! { a: 1 };
        let updated = apply(&doc, doc! { "$rename": { missing: "target" } }).unwrap();
        assert_eq!(updated, doc);
    }

    #[test]
    fn test_rename_moves_value() {
        let doc = doc! { old: 7 };
        let updated = apply(&doc, doc! { "$rename": { old: "new" } }).unwrap();
        assert_eq!(updated.get("new"), Value::I32(7));
        assert!(!updated.contains_key("old"));
    }

    #[test]
    fn test_min_max() {
        let doc = doc! { low: 5, high: 5 };
        let updated = apply(&doc, doc! { "$min": { low: 3 }, "$max": { high: 9 } }).unwrap();
        assert_eq!(updated.get("low"), Value::I32(3));
        assert_eq!(updated.get("high"), Value::I32(9));

        let unchanged = apply(&doc, doc! { "$min": { low: 8 }, "$max": { high: 1 } }).unwrap();
        assert_eq!(unchanged.get("low"), Value::I32(5));
        assert_eq!(unchanged.get("high"), Value::I32(5));
    }

    #[test]
    fn test_push_simple_and_each() {
        let doc = doc! { tags: ["a"] };
        let updated = apply(&doc, doc! { "$push": { tags: "b" } }).unwrap();
        assert_eq!(
            updated.get("tags"),
            Value::Array(vec![Value::from("a"), Value::from("b")])
        );

        let updated = apply(
            &doc,
            doc! { "$push": { tags: { "$each": ["b", "c"], "$position": 0 } } },
        )
        .unwrap();
        assert_eq!(
            updated.get("tags"),
            Value::Array(vec![Value::from("b"), Value::from("c"), Value::from("a")])
        );
    }

    #[test]
    fn test_push_sort_and_slice() {
        let doc = doc! { scores: [5, 1] };
        let updated = apply(
            &doc,
            doc! { "$push": { scores: { "$each": [9, 3], "$sort": (-1), "$slice": 3 } } },
        )
        .unwrap();
        assert_eq!(
            updated.get("scores"),
            Value::Array(vec![Value::I32(9), Value::I32(5), Value::I32(3)])
        );
    }

    #[test]
    fn test_push_negative_slice_keeps_tail() {
        let doc = doc! { log: [1, 2, 3] };
        let updated = apply(
            &doc,
            doc! { "$push": { log: { "$each": [4], "$slice": (-2) } } },
        )
        .unwrap();
        assert_eq!(
            updated.get("log"),
            Value::Array(vec![Value::I32(3), Value::I32(4)])
        );
    }

    #[test]
    fn test_add_to_set_dedups() {
        let doc = doc! { tags: ["a", "b"] };
        let updated = apply(&doc, doc! { "$addToSet": { tags: "a" } }).unwrap();
        assert_eq!(
            updated.get("tags"),
            Value::Array(vec![Value::from("a"), Value::from("b")])
        );
        let updated = apply(
            &doc,
            doc! { "$addToSet": { tags: { "$each": ["b", "c"] } } },
        )
        .unwrap();
        assert_eq!(
            updated.get("tags"),
            Value::Array(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        );
    }

    #[test]
    fn test_pull_by_value_and_predicate() {
        let doc = doc! { n: [1, 5, 9, 5] };
        let updated = apply(&doc, doc! { "$pull": { n: 5 } }).unwrap();
        assert_eq!(updated.get("n"), Value::Array(vec![Value::I32(1), Value::I32(9)]));

        let updated = apply(&doc, doc! { "$pull": { n: { "$gt": 4 } } }).unwrap();
        assert_eq!(updated.get("n"), Value::Array(vec![Value::I32(1)]));
    }

    #[test]
    fn test_pull_all() {
        let doc = doc! { n: [1, 2, 3, 2] };
        let updated = apply(&doc, doc! { "$pullAll": { n: [2, 3] } }).unwrap();
        assert_eq!(updated.get("n"), Value::Array(vec![Value::I32(1)]));
    }

    #[test]
    fn test_pop_both_ends() {
        let doc = doc! { n: [1, 2, 3] };
        let updated = apply(&doc, doc! { "$pop": { n: 1 } }).unwrap();
        assert_eq!(updated.get("n"), Value::Array(vec![Value::I32(1), Value::I32(2)]));
        let updated = apply(&doc, doc! { "$pop": { n: (-1) } }).unwrap();
        assert_eq!(updated.get("n"), Value::Array(vec![Value::I32(2), Value::I32(3)]));
    }

    #[test]
    fn test_set_on_insert_only_on_insert() {
        let doc = doc! { a: 1 };
        let spec = UpdateSpec::parse(&doc! { "$setOnInsert": { created: true } }).unwrap();
        let plain = spec.apply(&doc, false).unwrap();
        assert!(!plain.contains_key("created"));
        let seeded = spec.apply(&doc, true).unwrap();
        assert_eq!(seeded.get("created"), Value::Bool(true));
    }

    #[test]
    fn test_id_is_immutable() {
        let doc = doc! { a: 1 };
        let err = apply(&doc, doc! { "$set": { "_id": 5 } }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_mixed_operators_and_fields_rejected() {
        let doc = doc! { a: 1 };
        let err = apply(&doc, doc! { "$set": { a: 2 }, b: 3 }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::BadValue);
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let doc = doc! { a: 1 };
        let err = apply(&doc, doc! { "$bogus": { a: 2 } }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::BadValue);
    }
}
