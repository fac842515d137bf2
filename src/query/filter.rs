//! Structured document matcher.
//!
//! A small subset of document-store filter syntax: field equality (with
//! array-membership semantics), comparison operators, `$in`/`$nin`,
//! `$exists`, `$regex`, the array operators `$size`/`$all`/`$elemMatch`,
//! field-level `$not`, and the logical combinators `$and`/`$or`/`$nor`.

use super::MalformedQuery;
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A predicate over documents.
#[derive(Debug, Clone, Default)]
pub enum Filter {
    /// Matches every document.
    #[default]
    All,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    /// Every condition must hold for the value at `path`.
    Field {
        path: String,
        conditions: Vec<Condition>,
    },
}

/// A single condition on one field.
#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
    /// The field is an array of exactly this length.
    Size(u64),
    /// Every listed value is present. An empty list matches nothing.
    All(Vec<Value>),
    /// None of the wrapped conditions hold together; absent fields match.
    Not(Vec<Condition>),
    /// Some array element matches the sub-document filter.
    ElemMatch(Box<Filter>),
    /// Some array element satisfies every operator.
    ElemMatchValue(Vec<Condition>),
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Field {
            path: path.into(),
            conditions: vec![Condition::Eq(value.into())],
        }
    }

    pub fn id(id: &str) -> Self {
        Self::eq("_id", id)
    }

    pub fn id_in<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::Field {
            path: "_id".to_string(),
            conditions: vec![Condition::In(
                ids.into_iter().map(|id| Value::String(id.into())).collect(),
            )],
        }
    }

    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut items), f) => {
                items.push(f);
                Filter::And(items)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// If this filter pins `_id` to a single value, return it.
    pub fn as_id(&self) -> Option<&str> {
        match self {
            Filter::Field { path, conditions } if path == "_id" => match conditions.as_slice() {
                [Condition::Eq(Value::String(id))] => Some(id),
                _ => None,
            },
            _ => None,
        }
    }

    /// Parse a JSON matcher object.
    pub fn parse(value: &Value) -> Result<Self, MalformedQuery> {
        let obj = value
            .as_object()
            .ok_or_else(|| MalformedQuery::new("where", "expected an object"))?;

        let mut clauses = Vec::with_capacity(obj.len());
        for (key, val) in obj {
            let clause = match key.as_str() {
                "$and" => Filter::And(parse_clause_list(key, val)?),
                "$or" => Filter::Or(parse_clause_list(key, val)?),
                "$nor" => Filter::Nor(parse_clause_list(key, val)?),
                op if op.starts_with('$') => {
                    return Err(MalformedQuery::new("where", format!("unknown operator {}", op)));
                }
                path => Filter::Field {
                    path: path.to_string(),
                    conditions: parse_conditions(val)?,
                },
            };
            clauses.push(clause);
        }

        Ok(match clauses.len() {
            0 => Filter::All,
            1 => clauses.remove(0),
            _ => Filter::And(clauses),
        })
    }

    /// Evaluate this filter against a document.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::And(items) => items.iter().all(|f| f.matches(doc)),
            Filter::Or(items) => items.iter().any(|f| f.matches(doc)),
            Filter::Nor(items) => !items.iter().any(|f| f.matches(doc)),
            Filter::Field { path, conditions } => {
                let field = lookup(doc, path);
                conditions.iter().all(|c| c.matches(field))
            }
        }
    }
}

fn parse_clause_list(op: &str, value: &Value) -> Result<Vec<Filter>, MalformedQuery> {
    let items = value
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| MalformedQuery::new("where", format!("{} expects a non-empty array", op)))?;
    items.iter().map(Filter::parse).collect()
}

fn parse_conditions(value: &Value) -> Result<Vec<Condition>, MalformedQuery> {
    let ops = match value.as_object() {
        Some(obj) if !obj.is_empty() && obj.keys().any(|k| k.starts_with('$')) => obj,
        _ => return Ok(vec![Condition::Eq(value.clone())]),
    };
    if ops.keys().any(|k| !k.starts_with('$')) {
        return Err(MalformedQuery::new(
            "where",
            "cannot mix operators and plain fields",
        ));
    }

    let mut conditions = Vec::with_capacity(ops.len());
    for (op, arg) in ops {
        let condition = match op.as_str() {
            "$eq" => Condition::Eq(arg.clone()),
            "$ne" => Condition::Ne(arg.clone()),
            "$gt" => Condition::Gt(arg.clone()),
            "$gte" => Condition::Gte(arg.clone()),
            "$lt" => Condition::Lt(arg.clone()),
            "$lte" => Condition::Lte(arg.clone()),
            "$in" => Condition::In(value_list(op, arg)?),
            "$nin" => Condition::Nin(value_list(op, arg)?),
            "$exists" => Condition::Exists(crate::types::truthy(arg)),
            "$regex" => Condition::Regex(compile_regex(arg, ops)?),
            "$options" if ops.contains_key("$regex") => continue,
            "$size" => Condition::Size(arg.as_u64().ok_or_else(|| {
                MalformedQuery::new("where", "$size expects a non-negative integer")
            })?),
            "$all" => Condition::All(value_list(op, arg)?),
            "$not" => Condition::Not(operator_object(op, arg)?),
            "$elemMatch" => parse_elem_match(arg)?,
            other => {
                return Err(MalformedQuery::new("where", format!("unknown operator {}", other)));
            }
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

fn operator_object(op: &str, arg: &Value) -> Result<Vec<Condition>, MalformedQuery> {
    match arg.as_object() {
        Some(obj) if !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')) => parse_conditions(arg),
        _ => Err(MalformedQuery::new(
            "where",
            format!("{} expects an operator object", op),
        )),
    }
}

fn parse_elem_match(arg: &Value) -> Result<Condition, MalformedQuery> {
    let obj = arg
        .as_object()
        .filter(|obj| !obj.is_empty())
        .ok_or_else(|| MalformedQuery::new("where", "$elemMatch expects an object"))?;
    let is_logical = |k: &String| matches!(k.as_str(), "$and" | "$or" | "$nor");
    if obj.keys().any(|k| k.starts_with('$') && !is_logical(k)) {
        Ok(Condition::ElemMatchValue(operator_object("$elemMatch", arg)?))
    } else {
        Ok(Condition::ElemMatch(Box::new(Filter::parse(arg)?)))
    }
}

fn value_list(op: &str, arg: &Value) -> Result<Vec<Value>, MalformedQuery> {
    arg.as_array()
        .cloned()
        .ok_or_else(|| MalformedQuery::new("where", format!("{} expects an array", op)))
}

fn compile_regex(arg: &Value, ops: &Map<String, Value>) -> Result<Regex, MalformedQuery> {
    let pattern = arg
        .as_str()
        .ok_or_else(|| MalformedQuery::new("where", "$regex expects a string"))?;
    let flags: String = ops
        .get("$options")
        .and_then(Value::as_str)
        .unwrap_or("")
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();
    let source = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", flags, pattern)
    };
    Regex::new(&source).map_err(|e| MalformedQuery::new("where", e.to_string()))
}

impl Condition {
    /// `field` is `None` when the path is absent from the document.
    pub fn matches(&self, field: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => equals(field, expected),
            Condition::Ne(expected) => !equals(field, expected),
            Condition::Gt(bound) => compares(field, bound, |o| o == Ordering::Greater),
            Condition::Gte(bound) => compares(field, bound, |o| o != Ordering::Less),
            Condition::Lt(bound) => compares(field, bound, |o| o == Ordering::Less),
            Condition::Lte(bound) => compares(field, bound, |o| o != Ordering::Greater),
            Condition::In(options) => options.iter().any(|v| equals(field, v)),
            Condition::Nin(options) => !options.iter().any(|v| equals(field, v)),
            Condition::Exists(want) => field.is_some() == *want,
            Condition::Regex(re) => candidates(field).any(|v| v.as_str().is_some_and(|s| re.is_match(s))),
            Condition::Size(len) => field
                .and_then(Value::as_array)
                .is_some_and(|items| items.len() as u64 == *len),
            Condition::All(required) => {
                !required.is_empty() && required.iter().all(|v| equals(field, v))
            }
            Condition::Not(inner) => !inner.iter().all(|c| c.matches(field)),
            Condition::ElemMatch(filter) => elements(field).any(|item| filter.matches(item)),
            Condition::ElemMatchValue(inner) => {
                elements(field).any(|item| inner.iter().all(|c| c.matches(Some(item))))
            }
        }
    }
}

/// Resolve a dotted path inside a document.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, key| current.get(key))
}

/// The value itself, followed by its elements when it is an array.
fn candidates(field: Option<&Value>) -> impl Iterator<Item = &Value> {
    field.into_iter().chain(elements(field))
}

fn elements(field: Option<&Value>) -> impl Iterator<Item = &Value> {
    field
        .and_then(Value::as_array)
        .map(|items| items.iter())
        .into_iter()
        .flatten()
}

fn equals(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        None => expected.is_null(),
        Some(_) => candidates(field).any(|v| same_value(v, expected)),
    }
}

fn compares(field: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    candidates(field)
        .filter(|v| type_rank(v) == type_rank(bound))
        .any(|v| accept(compare_values(v, bound)))
}

fn same_value(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b) && compare_values(a, b) == Ordering::Equal
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values: values of different types order by type,
/// numbers compare numerically, containers compare element-wise.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(l, r)| compare_values(l, r))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y)
            .map(|((lk, lv), (rk, rv))| lk.cmp(rk).then_with(|| compare_values(lv, rv)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
