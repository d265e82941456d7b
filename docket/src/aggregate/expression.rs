use crate::collection::Document;
use crate::common::Value;
use crate::errors::{DocketError, DocketResult, ErrorKind};
use chrono::Datelike;

/// A computed value inside a pipeline: group keys, projected fields,
/// accumulator inputs.
///
/// Like the match-expression tree, the operator set is closed and
/// dispatched exhaustively.
#[derive(Debug, Clone)]
pub enum Expression {
    /// A constant.
    Literal(Value),
    /// A `"$path"` reference into the current document.
    FieldPath(String),
    /// A literal document shape whose values are themselves expressions.
    Object(Vec<(String, Expression)>),
    /// A literal array of expressions.
    ArrayLit(Vec<Expression>),
    Add(Vec<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Multiply(Vec<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    Concat(Vec<Expression>),
    Size(Box<Expression>),
    IndexOfArray {
        array: Box<Expression>,
        search: Box<Expression>,
    },
    Year(Box<Expression>),
    Month(Box<Expression>),
    DayOfMonth(Box<Expression>),
    Cmp {
        op: CmpOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Cond {
        condition: Box<Expression>,
        then: Box<Expression>,
        otherwise: Box<Expression>,
    },
    IfNull(Box<Expression>, Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Expression {
    /// Parses an expression from its document form: `"$path"` strings,
    /// single-operator documents, literal documents/arrays, constants.
    pub fn parse(value: &Value) -> DocketResult<Expression> {
        match value {
            Value::String(s) if s.starts_with('$') => {
                Ok(Expression::FieldPath(s[1..].to_string()))
            }
            Value::Document(doc) => {
                let names = doc.field_names();
                if names.len() == 1 && names[0].starts_with('$') {
                    return parse_operator(names[0], doc.get_field(names[0]).unwrap_or(&Value::Null));
                }
                if names.iter().any(|n| n.starts_with('$')) {
                    return Err(pipeline_error(
                        "An expression document cannot mix operators and fields",
                    ));
                }
                let mut fields = Vec::with_capacity(names.len());
                for (name, value) in doc.iter() {
                    fields.push((name.clone(), Expression::parse(value)?));
                }
                Ok(Expression::Object(fields))
            }
            Value::Array(items) => {
                let mut exprs = Vec::with_capacity(items.len());
                for item in items {
                    exprs.push(Expression::parse(item)?);
                }
                Ok(Expression::ArrayLit(exprs))
            }
            other => Ok(Expression::Literal(other.clone())),
        }
    }

    /// Evaluates against one document. Missing field paths yield null.
    pub fn evaluate(&self, doc: &Document) -> DocketResult<Value> {
        Ok(self.evaluate_opt(doc)?.unwrap_or(Value::Null))
    }

    /// Evaluates, distinguishing a missing field path (`None`) from an
    /// explicit null. `$push`-style accumulators skip missing inputs.
    pub fn evaluate_opt(&self, doc: &Document) -> DocketResult<Option<Value>> {
        match self {
            Expression::Literal(value) => Ok(Some(value.clone())),
            Expression::FieldPath(path) => {
                let value = doc.get(path);
                if value.is_null() && !path_present(doc, path) {
                    Ok(None)
                } else {
                    Ok(Some(value))
                }
            }
            Expression::Object(fields) => {
                let mut out = Document::new();
                for (name, expr) in fields {
                    if let Some(value) = expr.evaluate_opt(doc)? {
                        out.put(name, value)?;
                    }
                }
                Ok(Some(Value::Document(out)))
            }
            Expression::ArrayLit(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.evaluate(doc)?);
                }
                Ok(Some(Value::Array(out)))
            }
            Expression::Add(operands) => Ok(Some(eval_add(operands, doc)?)),
            Expression::Subtract(left, right) => {
                Ok(Some(eval_subtract(&left.evaluate(doc)?, &right.evaluate(doc)?)?))
            }
            Expression::Multiply(operands) => {
                let mut product = Value::I32(1);
                for operand in operands {
                    let value = operand.evaluate(doc)?;
                    if value.is_null() {
                        return Ok(Some(Value::Null));
                    }
                    product = product.mul_numeric(&value)?;
                }
                Ok(Some(product))
            }
            Expression::Divide(left, right) => {
                let (left, right) = (left.evaluate(doc)?, right.evaluate(doc)?);
                if left.is_null() || right.is_null() {
                    return Ok(Some(Value::Null));
                }
                let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                    return Err(type_error(&format!(
                        "$divide requires numeric operands, got {} and {}",
                        left.type_name(),
                        right.type_name()
                    )));
                };
                if b == 0.0 {
                    return Err(DocketError::new(
                        "Cannot $divide by zero",
                        ErrorKind::BadValue,
                    ));
                }
                Ok(Some(Value::F64(a / b)))
            }
            Expression::Concat(operands) => {
                let mut out = String::new();
                for operand in operands {
                    match operand.evaluate(doc)? {
                        Value::Null => return Ok(Some(Value::Null)),
                        Value::String(s) => out.push_str(&s),
                        other => {
                            return Err(type_error(&format!(
                                "$concat requires string operands, got {}",
                                other.type_name()
                            )));
                        }
                    }
                }
                Ok(Some(Value::String(out)))
            }
            Expression::Size(operand) => match operand.evaluate(doc)? {
                Value::Array(items) => Ok(Some(Value::I32(items.len() as i32))),
                other => Err(type_error(&format!(
                    "$size requires an array, got {}",
                    other.type_name()
                ))),
            },
            Expression::IndexOfArray { array, search } => {
                let haystack = array.evaluate(doc)?;
                if haystack.is_null() {
                    return Ok(Some(Value::Null));
                }
                let Value::Array(items) = haystack else {
                    return Err(type_error(&format!(
                        "$indexOfArray requires an array, got {}",
                        haystack.type_name()
                    )));
                };
                let needle = search.evaluate(doc)?;
                let position = items
                    .iter()
                    .position(|item| item == &needle)
                    .map(|i| i as i32)
                    .unwrap_or(-1);
                Ok(Some(Value::I32(position)))
            }
            Expression::Year(operand) => date_part(operand, doc, |d| d.year()),
            Expression::Month(operand) => date_part(operand, doc, |d| d.month() as i32),
            Expression::DayOfMonth(operand) => date_part(operand, doc, |d| d.day() as i32),
            Expression::Cmp { op, left, right } => {
                let (a, b) = (left.evaluate(doc)?, right.evaluate(doc)?);
                let ordering = a.cmp(&b);
                let result = match op {
                    CmpOp::Eq => a == b,
                    CmpOp::Ne => a != b,
                    CmpOp::Gt => ordering == std::cmp::Ordering::Greater,
                    CmpOp::Gte => ordering != std::cmp::Ordering::Less,
                    CmpOp::Lt => ordering == std::cmp::Ordering::Less,
                    CmpOp::Lte => ordering != std::cmp::Ordering::Greater,
                };
                Ok(Some(Value::Bool(result)))
            }
            Expression::Cond {
                condition,
                then,
                otherwise,
            } => {
                if is_truthy(&condition.evaluate(doc)?) {
                    Ok(Some(then.evaluate(doc)?))
                } else {
                    Ok(Some(otherwise.evaluate(doc)?))
                }
            }
            Expression::IfNull(value, fallback) => {
                let primary = value.evaluate(doc)?;
                if primary.is_null() {
                    Ok(Some(fallback.evaluate(doc)?))
                } else {
                    Ok(Some(primary))
                }
            }
        }
    }
}

fn path_present(doc: &Document, path: &str) -> bool {
    if doc.contains_key(path) {
        return true;
    }
    match path.split_once('.') {
        Some((head, _)) => doc.contains_key(head),
        None => false,
    }
}

fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
        && value.as_f64().map(|f| f != 0.0).unwrap_or(true)
}

/// `$add`: numerics sum with overflow promotion; at most one date operand
/// shifts the date by the numeric sum of the rest; two dates are a type
/// mismatch. A null operand nulls the result.
fn eval_add(operands: &[Expression], doc: &Document) -> DocketResult<Value> {
    let mut date: Option<i64> = None;
    let mut sum = Value::I32(0);
    for operand in operands {
        let value = operand.evaluate(doc)?;
        match value {
            Value::Null => return Ok(Value::Null),
            Value::DateTime(d) => {
                if date.is_some() {
                    return Err(type_error("Only one date is allowed in $add"));
                }
                date = Some(d.timestamp_millis());
            }
            other if other.is_numeric() => {
                sum = sum.add_numeric(&other)?;
            }
            other => {
                return Err(type_error(&format!(
                    "$add cannot operate on {}",
                    other.type_name()
                )));
            }
        }
    }
    match date {
        Some(millis) => {
            let offset = sum.as_i64().or_else(|| sum.as_f64().map(|f| f as i64)).unwrap_or(0);
            Ok(Value::date_from_millis(millis + offset))
        }
        None => Ok(sum),
    }
}

/// `$subtract`: two dates yield millisecond difference; a date minus a
/// number shifts the date; numbers subtract with overflow promotion.
fn eval_subtract(left: &Value, right: &Value) -> DocketResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    match (left, right) {
        (Value::DateTime(a), Value::DateTime(b)) => {
            Ok(Value::I64(a.timestamp_millis() - b.timestamp_millis()))
        }
        (Value::DateTime(a), b) if b.is_numeric() => {
            let offset = b.as_i64().or_else(|| b.as_f64().map(|f| f as i64)).unwrap_or(0);
            Ok(Value::date_from_millis(a.timestamp_millis() - offset))
        }
        (a, b) if a.is_numeric() && b.is_numeric() => {
            let negated = b.mul_numeric(&Value::I32(-1))?;
            a.add_numeric(&negated)
        }
        (a, b) => Err(type_error(&format!(
            "$subtract cannot operate on {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn date_part(
    operand: &Expression,
    doc: &Document,
    part: impl Fn(chrono::DateTime<chrono::Utc>) -> i32,
) -> DocketResult<Option<Value>> {
    let value = operand.evaluate(doc)?;
    match value {
        Value::DateTime(d) => Ok(Some(Value::I32(part(d)))),
        other => Err(type_error(&format!(
            "Cannot extract a date part from {}",
            other.type_name()
        ))),
    }
}

fn parse_operator(name: &str, operand: &Value) -> DocketResult<Expression> {
    match name {
        "$literal" => Ok(Expression::Literal(operand.clone())),
        "$add" => Ok(Expression::Add(parse_operand_list(name, operand)?)),
        "$multiply" => Ok(Expression::Multiply(parse_operand_list(name, operand)?)),
        "$concat" => Ok(Expression::Concat(parse_operand_list(name, operand)?)),
        "$subtract" | "$divide" => {
            let pair = parse_operand_list(name, operand)?;
            if pair.len() != 2 {
                return Err(pipeline_error(&format!("{} requires exactly 2 operands", name)));
            }
            let mut iter = pair.into_iter();
            let left = Box::new(iter.next().unwrap_or(Expression::Literal(Value::Null)));
            let right = Box::new(iter.next().unwrap_or(Expression::Literal(Value::Null)));
            Ok(if name == "$subtract" {
                Expression::Subtract(left, right)
            } else {
                Expression::Divide(left, right)
            })
        }
        "$size" => Ok(Expression::Size(Box::new(Expression::parse(operand)?))),
        "$indexOfArray" => {
            let operands = parse_operand_list(name, operand)?;
            if operands.len() != 2 {
                return Err(pipeline_error("$indexOfArray requires [array, search]"));
            }
            let mut iter = operands.into_iter();
            Ok(Expression::IndexOfArray {
                array: Box::new(iter.next().unwrap_or(Expression::Literal(Value::Null))),
                search: Box::new(iter.next().unwrap_or(Expression::Literal(Value::Null))),
            })
        }
        "$year" => Ok(Expression::Year(Box::new(Expression::parse(operand)?))),
        "$month" => Ok(Expression::Month(Box::new(Expression::parse(operand)?))),
        "$dayOfMonth" => Ok(Expression::DayOfMonth(Box::new(Expression::parse(operand)?))),
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
            let pair = parse_operand_list(name, operand)?;
            if pair.len() != 2 {
                return Err(pipeline_error(&format!("{} requires exactly 2 operands", name)));
            }
            let op = match name {
                "$eq" => CmpOp::Eq,
                "$ne" => CmpOp::Ne,
                "$gt" => CmpOp::Gt,
                "$gte" => CmpOp::Gte,
                "$lt" => CmpOp::Lt,
                _ => CmpOp::Lte,
            };
            let mut iter = pair.into_iter();
            Ok(Expression::Cmp {
                op,
                left: Box::new(iter.next().unwrap_or(Expression::Literal(Value::Null))),
                right: Box::new(iter.next().unwrap_or(Expression::Literal(Value::Null))),
            })
        }
        "$cond" => {
            let Value::Document(spec) = operand else {
                return Err(pipeline_error("$cond requires a document operand"));
            };
            Ok(Expression::Cond {
                condition: Box::new(Expression::parse(&spec.get("if"))?),
                then: Box::new(Expression::parse(&spec.get("then"))?),
                otherwise: Box::new(Expression::parse(&spec.get("else"))?),
            })
        }
        "$ifNull" => {
            let pair = parse_operand_list(name, operand)?;
            if pair.len() != 2 {
                return Err(pipeline_error("$ifNull requires exactly 2 operands"));
            }
            let mut iter = pair.into_iter();
            Ok(Expression::IfNull(
                Box::new(iter.next().unwrap_or(Expression::Literal(Value::Null))),
                Box::new(iter.next().unwrap_or(Expression::Literal(Value::Null))),
            ))
        }
        other => Err(pipeline_error(&format!(
            "Unknown expression operator: {}",
            other
        ))),
    }
}

fn parse_operand_list(name: &str, operand: &Value) -> DocketResult<Vec<Expression>> {
    let Value::Array(items) = operand else {
        return Err(pipeline_error(&format!("{} requires an array of operands", name)));
    };
    items.iter().map(Expression::parse).collect()
}

fn pipeline_error(message: &str) -> DocketError {
    log::error!("{}", message);
    DocketError::new(message, ErrorKind::InvalidPipeline)
}

fn type_error(message: &str) -> DocketError {
    log::error!("{}", message);
    DocketError::new(message, ErrorKind::TypeMismatch)
}
