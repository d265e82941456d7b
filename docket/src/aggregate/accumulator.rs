use crate::aggregate::Expression;
use crate::collection::operation::compare_documents;
use crate::collection::Document;
use crate::common::{SortSpec, Value};
use crate::errors::{DocketError, DocketResult, ErrorKind};

/// A `$group` accumulator operator.
#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(Expression),
    Avg(Expression),
    Min(Expression),
    Max(Expression),
    First(Expression),
    Last(Expression),
    Push(Expression),
    AddToSet(Expression),
    Count,
    FirstN { input: Expression, n: usize },
    LastN { input: Expression, n: usize },
    TopN { output: Expression, sort_by: SortSpec, n: usize },
    BottomN { output: Expression, sort_by: SortSpec, n: usize },
}

impl Accumulator {
    /// Parses `{$sum: expr}`, `{$topN: {output, sortBy, n}}`, etc.
    pub fn parse(spec: &Value) -> DocketResult<Accumulator> {
        let Value::Document(doc) = spec else {
            return Err(group_error("An accumulator must be a single-operator document"));
        };
        let names = doc.field_names();
        if names.len() != 1 {
            return Err(group_error("An accumulator must be a single-operator document"));
        }
        let name = names[0];
        let operand = doc.get_field(name).cloned().unwrap_or(Value::Null);

        match name {
            "$sum" => Ok(Accumulator::Sum(Expression::parse(&operand)?)),
            "$avg" => Ok(Accumulator::Avg(Expression::parse(&operand)?)),
            "$min" => Ok(Accumulator::Min(Expression::parse(&operand)?)),
            "$max" => Ok(Accumulator::Max(Expression::parse(&operand)?)),
            "$first" => Ok(Accumulator::First(Expression::parse(&operand)?)),
            "$last" => Ok(Accumulator::Last(Expression::parse(&operand)?)),
            "$push" => Ok(Accumulator::Push(Expression::parse(&operand)?)),
            "$addToSet" => Ok(Accumulator::AddToSet(Expression::parse(&operand)?)),
            "$count" => {
                if !matches!(&operand, Value::Document(d) if d.is_empty()) {
                    return Err(group_error("$count takes an empty document"));
                }
                Ok(Accumulator::Count)
            }
            "$firstN" | "$lastN" => {
                let (input, n) = parse_n_spec(&operand, "input")?;
                if name == "$firstN" {
                    Ok(Accumulator::FirstN { input, n })
                } else {
                    Ok(Accumulator::LastN { input, n })
                }
            }
            "$topN" | "$bottomN" => {
                let Value::Document(spec) = &operand else {
                    return Err(group_error(&format!("{} requires a document operand", name)));
                };
                let (output, n) = parse_n_spec(&operand, "output")?;
                let sort_by = parse_sort_by(spec)?;
                if name == "$topN" {
                    Ok(Accumulator::TopN { output, sort_by, n })
                } else {
                    Ok(Accumulator::BottomN { output, sort_by, n })
                }
            }
            other => Err(group_error(&format!("Unknown accumulator: {}", other))),
        }
    }

    /// Fresh state for one group.
    pub fn new_state(&self) -> AccumulatorState {
        match self {
            Accumulator::Sum(_) => AccumulatorState::Sum(Value::I32(0)),
            Accumulator::Avg(_) => AccumulatorState::Avg { sum: 0.0, count: 0 },
            Accumulator::Min(_) => AccumulatorState::Extreme(None),
            Accumulator::Max(_) => AccumulatorState::Extreme(None),
            Accumulator::First(_) => AccumulatorState::Once(None),
            Accumulator::Last(_) => AccumulatorState::Latest(None),
            Accumulator::Push(_) | Accumulator::AddToSet(_) => {
                AccumulatorState::Collected(Vec::new())
            }
            Accumulator::Count => AccumulatorState::Counter(0),
            Accumulator::FirstN { .. } | Accumulator::LastN { .. } => {
                AccumulatorState::Collected(Vec::new())
            }
            Accumulator::TopN { .. } | Accumulator::BottomN { .. } => {
                AccumulatorState::Ranked(Vec::new())
            }
        }
    }

    /// Folds one input document into the state.
    pub fn update(&self, state: &mut AccumulatorState, doc: &Document) -> DocketResult<()> {
        match (self, state) {
            (Accumulator::Sum(expr), AccumulatorState::Sum(total)) => {
                let value = expr.evaluate(doc)?;
                if value.is_numeric() {
                    *total = total.add_numeric(&value)?;
                }
                Ok(())
            }
            (Accumulator::Avg(expr), AccumulatorState::Avg { sum, count }) => {
                let value = expr.evaluate(doc)?;
                if let Some(f) = value.as_f64() {
                    *sum += f;
                    *count += 1;
                }
                Ok(())
            }
            (Accumulator::Min(expr), AccumulatorState::Extreme(best)) => {
                if let Some(value) = expr.evaluate_opt(doc)? {
                    let replace = best.as_ref().map(|b| &value < b).unwrap_or(true);
                    if replace {
                        *best = Some(value);
                    }
                }
                Ok(())
            }
            (Accumulator::Max(expr), AccumulatorState::Extreme(best)) => {
                if let Some(value) = expr.evaluate_opt(doc)? {
                    let replace = best.as_ref().map(|b| &value > b).unwrap_or(true);
                    if replace {
                        *best = Some(value);
                    }
                }
                Ok(())
            }
            (Accumulator::First(expr), AccumulatorState::Once(slot)) => {
                if slot.is_none() {
                    *slot = Some(expr.evaluate(doc)?);
                }
                Ok(())
            }
            (Accumulator::Last(expr), AccumulatorState::Latest(slot)) => {
                *slot = Some(expr.evaluate(doc)?);
                Ok(())
            }
            (Accumulator::Push(expr), AccumulatorState::Collected(values)) => {
                if let Some(value) = expr.evaluate_opt(doc)? {
                    values.push(value);
                }
                Ok(())
            }
            (Accumulator::AddToSet(expr), AccumulatorState::Collected(values)) => {
                if let Some(value) = expr.evaluate_opt(doc)? {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
                Ok(())
            }
            (Accumulator::Count, AccumulatorState::Counter(n)) => {
                *n += 1;
                Ok(())
            }
            (Accumulator::FirstN { input, n }, AccumulatorState::Collected(values)) => {
                if values.len() < *n {
                    if let Some(value) = input.evaluate_opt(doc)? {
                        values.push(value);
                    }
                }
                Ok(())
            }
            (Accumulator::LastN { input, n }, AccumulatorState::Collected(values)) => {
                if let Some(value) = input.evaluate_opt(doc)? {
                    values.push(value);
                    if values.len() > *n {
                        values.remove(0);
                    }
                }
                Ok(())
            }
            (
                Accumulator::TopN { output, .. } | Accumulator::BottomN { output, .. },
                AccumulatorState::Ranked(entries),
            ) => {
                let value = output.evaluate(doc)?;
                entries.push((doc.clone(), value));
                Ok(())
            }
            _ => Err(DocketError::new(
                "Accumulator state mismatch",
                ErrorKind::InternalError,
            )),
        }
    }

    /// Produces the output value once the group's input is exhausted.
    pub fn finalize(&self, state: AccumulatorState) -> Value {
        match (self, state) {
            (Accumulator::Sum(_), AccumulatorState::Sum(total)) => total,
            (Accumulator::Avg(_), AccumulatorState::Avg { sum, count }) => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::F64(sum / count as f64)
                }
            }
            (Accumulator::Min(_) | Accumulator::Max(_), AccumulatorState::Extreme(best)) => {
                best.unwrap_or(Value::Null)
            }
            (Accumulator::First(_), AccumulatorState::Once(slot)) => slot.unwrap_or(Value::Null),
            (Accumulator::Last(_), AccumulatorState::Latest(slot)) => slot.unwrap_or(Value::Null),
            (
                Accumulator::Push(_)
                | Accumulator::AddToSet(_)
                | Accumulator::FirstN { .. }
                | Accumulator::LastN { .. },
                AccumulatorState::Collected(values),
            ) => Value::Array(values),
            (Accumulator::Count, AccumulatorState::Counter(n)) => Value::I64(n as i64),
            (Accumulator::TopN { sort_by, n, .. }, AccumulatorState::Ranked(mut entries)) => {
                entries.sort_by(|(a, _), (b, _)| compare_documents(a, b, sort_by));
                Value::Array(entries.into_iter().take(*n).map(|(_, v)| v).collect())
            }
            (Accumulator::BottomN { sort_by, n, .. }, AccumulatorState::Ranked(mut entries)) => {
                entries.sort_by(|(a, _), (b, _)| compare_documents(a, b, sort_by));
                let skip = entries.len().saturating_sub(*n);
                Value::Array(entries.into_iter().skip(skip).map(|(_, v)| v).collect())
            }
            _ => Value::Null,
        }
    }
}

/// Mutable per-group accumulator state.
#[derive(Debug, Clone)]
pub enum AccumulatorState {
    Sum(Value),
    Avg { sum: f64, count: u64 },
    Extreme(Option<Value>),
    Once(Option<Value>),
    Latest(Option<Value>),
    Collected(Vec<Value>),
    Counter(u64),
    Ranked(Vec<(Document, Value)>),
}

fn parse_n_spec(operand: &Value, input_key: &str) -> DocketResult<(Expression, usize)> {
    let Value::Document(spec) = operand else {
        return Err(group_error("Expected a {input, n} document"));
    };
    let input = Expression::parse(&spec.get(input_key))?;
    let n = spec
        .get("n")
        .as_i64()
        .filter(|n| *n > 0)
        .ok_or_else(|| group_error("n must be a positive integer"))? as usize;
    Ok((input, n))
}

fn parse_sort_by(spec: &Document) -> DocketResult<SortSpec> {
    let Value::Document(sort_doc) = spec.get("sortBy") else {
        return Err(group_error("sortBy must be a document"));
    };
    let mut sort = SortSpec::new();
    for (field, dir) in sort_doc.iter() {
        let order = match dir.as_i64() {
            Some(1) => crate::common::SortOrder::Ascending,
            Some(-1) => crate::common::SortOrder::Descending,
            _ => return Err(group_error("sortBy directions must be 1 or -1")),
        };
        sort = sort.then_by(field, order);
    }
    if sort.is_empty() {
        return Err(group_error("sortBy cannot be empty"));
    }
    Ok(sort)
}

fn group_error(message: &str) -> DocketError {
    log::error!("{}", message);
    DocketError::new(message, ErrorKind::InvalidPipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn run(acc_spec: Document, docs: &[Document]) -> Value {
        let accumulator = Accumulator::parse(&Value::Document(acc_spec)).unwrap();
        let mut state = accumulator.new_state();
        for doc in docs {
            accumulator.update(&mut state, doc).unwrap();
        }
        accumulator.finalize(state)
    }

    #[test]
    fn test_sum_ignores_non_numeric() {
        let docs = vec![doc! { n: 1 }, doc! { n: "x" }, doc! { n: 2 }];
        assert_eq!(run(doc! { "$sum": "$n" }, &docs), Value::I32(3));
    }

    #[test]
    fn test_avg() {
        let docs = vec![doc! { n: 2 }, doc! { n: 4 }];
        assert_eq!(run(doc! { "$avg": "$n" }, &docs), Value::F64(3.0));
        assert_eq!(run(doc! { "$avg": "$n" }, &[]), Value::Null);
    }

    #[test]
    fn test_min_max() {
        let docs = vec![doc! { n: 5 }, doc! { n: 1 }, doc! { n: 9 }];
        assert_eq!(run(doc! { "$min": "$n" }, &docs), Value::I32(1));
        assert_eq!(run(doc! { "$max": "$n" }, &docs), Value::I32(9));
    }

    #[test]
    fn test_first_last() {
        let docs = vec![doc! { n: 1 }, doc! { n: 2 }, doc! { n: 3 }];
        assert_eq!(run(doc! { "$first": "$n" }, &docs), Value::I32(1));
        assert_eq!(run(doc! { "$last": "$n" }, &docs), Value::I32(3));
    }

    #[test]
    fn test_push_preserves_order_and_duplicates() {
        let docs = vec![doc! { n: 2 }, doc! { n: 1 }, doc! { n: 2 }];
        assert_eq!(
            run(doc! { "$push": "$n" }, &docs),
            Value::Array(vec![Value::I32(2), Value::I32(1), Value::I32(2)])
        );
    }

    #[test]
    fn test_push_skips_missing() {
        let docs = vec![doc! { n: 1 }, doc! { other: 9 }];
        assert_eq!(run(doc! { "$push": "$n" }, &docs), Value::Array(vec![Value::I32(1)]));
    }

    #[test]
    fn test_add_to_set_dedups() {
        let docs = vec![doc! { n: 1 }, doc! { n: 1 }, doc! { n: 2 }];
        assert_eq!(
            run(doc! { "$addToSet": "$n" }, &docs),
            Value::Array(vec![Value::I32(1), Value::I32(2)])
        );
    }

    #[test]
    fn test_first_n_last_n() {
        let docs: Vec<Document> = (1..=5).map(|n| doc! { n: n }).collect();
        assert_eq!(
            run(doc! { "$firstN": { input: "$n", n: 2 } }, &docs),
            Value::Array(vec![Value::I32(1), Value::I32(2)])
        );
        assert_eq!(
            run(doc! { "$lastN": { input: "$n", n: 2 } }, &docs),
            Value::Array(vec![Value::I32(4), Value::I32(5)])
        );
    }

    #[test]
    fn test_top_n_bottom_n() {
        let docs = vec![
            doc! { score: 70, name: "c" },
            doc! { score: 95, name: "a" },
            doc! { score: 85, name: "b" },
        ];
        // topN under descending sort: the highest scores first
        assert_eq!(
            run(
                doc! { "$topN": { output: "$name", sortBy: { score: (-1) }, n: 2 } },
                &docs
            ),
            Value::Array(vec![Value::from("a"), Value::from("b")])
        );
        assert_eq!(
            run(
                doc! { "$bottomN": { output: "$name", sortBy: { score: (-1) }, n: 1 } },
                &docs
            ),
            Value::Array(vec![Value::from("c")])
        );
    }

    #[test]
    fn test_invalid_n_rejected() {
        let spec = Value::Document(doc! { "$firstN": { input: "$n", n: 0 } });
        assert!(Accumulator::parse(&spec).is_err());
    }

    #[test]
    fn test_unknown_accumulator_rejected() {
        let spec = Value::Document(doc! { "$median": "$n" });
        let err = Accumulator::parse(&spec).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidPipeline);
    }
}
