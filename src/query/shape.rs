//! Result shaping: sort order and field projection.

use super::MalformedQuery;
use super::filter::{compare_values, lookup};
use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Ordered list of sort keys; earlier keys take precedence.
#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec(pub Vec<(String, Direction)>);

impl SortSpec {
    pub fn parse(value: &Value) -> Result<Self, MalformedQuery> {
        let obj = value
            .as_object()
            .filter(|obj| !obj.is_empty())
            .ok_or_else(|| MalformedQuery::new("sort", "expected a non-empty object"))?;

        let keys = obj
            .iter()
            .map(|(field, dir)| {
                parse_direction(dir)
                    .map(|d| (field.clone(), d))
                    .ok_or_else(|| MalformedQuery::new("sort", format!("bad direction for {}", field)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SortSpec(keys))
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for (path, direction) in &self.0 {
            let null = Value::Null;
            let left = lookup(a, path).unwrap_or(&null);
            let right = lookup(b, path).unwrap_or(&null);
            let ord = compare_values(left, right);
            let ord = match direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Stable sort, so ties keep the store's natural order.
    pub fn apply(&self, docs: &mut [Value]) {
        docs.sort_by(|a, b| self.compare(a, b));
    }
}

fn parse_direction(value: &Value) -> Option<Direction> {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(Direction::Ascending),
            Some(f) if f == -1.0 => Some(Direction::Descending),
            _ => None,
        },
        Value::String(s) => match s.to_lowercase().as_str() {
            "1" | "asc" | "ascending" => Some(Direction::Ascending),
            "-1" | "desc" | "descending" => Some(Direction::Descending),
            _ => None,
        },
        _ => None,
    }
}

/// Which top-level fields of a document to return.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Only the listed fields, plus `_id` unless `with_id` is false.
    Include { fields: Vec<String>, with_id: bool },
    /// Everything except the listed fields.
    Exclude(Vec<String>),
}

impl Projection {
    pub fn parse(value: &Value) -> Result<Self, MalformedQuery> {
        let obj = value
            .as_object()
            .filter(|obj| !obj.is_empty())
            .ok_or_else(|| MalformedQuery::new("select", "expected a non-empty object"))?;

        let mut included = Vec::new();
        let mut excluded = Vec::new();
        let mut with_id = true;
        for (field, flag) in obj {
            let keep = match flag {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                _ => return Err(MalformedQuery::new("select", format!("bad flag for {}", field))),
            };
            match (field.as_str(), keep) {
                ("_id", keep) => with_id = keep,
                (_, true) => included.push(field.clone()),
                (_, false) => excluded.push(field.clone()),
            }
        }

        match (included.is_empty(), excluded.is_empty()) {
            (false, true) => Ok(Projection::Include {
                fields: included,
                with_id,
            }),
            (true, _) => {
                if !with_id {
                    excluded.push("_id".to_string());
                }
                if excluded.is_empty() {
                    // `{"_id": 1}` alone
                    Ok(Projection::Include {
                        fields: Vec::new(),
                        with_id: true,
                    })
                } else {
                    Ok(Projection::Exclude(excluded))
                }
            }
            (false, false) => Err(MalformedQuery::new(
                "select",
                "cannot mix inclusion and exclusion",
            )),
        }
    }

    pub fn apply(&self, doc: Value) -> Value {
        let Value::Object(map) = doc else {
            return doc;
        };
        let kept: Map<String, Value> = map
            .into_iter()
            .filter(|(key, _)| self.keeps(key))
            .collect();
        Value::Object(kept)
    }

    fn keeps(&self, key: &str) -> bool {
        match self {
            Projection::Include { fields, with_id } => {
                (key == "_id" && *with_id) || fields.iter().any(|f| f == key)
            }
            Projection::Exclude(fields) => !fields.iter().any(|f| f == key),
        }
    }
}
