//! Query construction for collection listings.
//!
//! Clients pass loosely structured options (`where`, `sort`, `select`/`filter`,
//! `skip`, `limit`, `count`). Each is parsed independently and any option that
//! does not parse is dropped, so a bad `sort` degrades to the store's natural
//! order instead of failing the request.

mod filter;
mod shape;

pub use filter::{Condition, Filter, compare_values, lookup};
pub use shape::{Direction, Projection, SortSpec};

use crate::db::{DocumentStore, StoreError};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// An option that could not be parsed; never surfaced to clients.
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed `{option}`: {reason}")]
pub struct MalformedQuery {
    pub option: &'static str,
    pub reason: String,
}

impl MalformedQuery {
    pub fn new(option: &'static str, reason: impl Into<String>) -> Self {
        Self {
            option,
            reason: reason.into(),
        }
    }
}

/// Parsed listing options. Absent fields mean "use the default".
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filter: Filter,
    pub sort: Option<SortSpec>,
    pub projection: Option<Projection>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub count: bool,
}

impl QueryOptions {
    /// Parse raw query-string parameters.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let param = |key: &str| params.get(key).map(String::as_str).filter(|s| !s.is_empty());

        Self {
            filter: param("where")
                .and_then(|raw| parse_json_option(raw, Filter::parse))
                .unwrap_or_default(),
            sort: param("sort").and_then(|raw| parse_json_option(raw, SortSpec::parse)),
            projection: param("select")
                .or_else(|| param("filter"))
                .and_then(|raw| parse_json_option(raw, Projection::parse)),
            skip: param("skip").and_then(|raw| parse_count_option("skip", raw)),
            limit: param("limit").and_then(|raw| parse_count_option("limit", raw)),
            count: param("count").is_some_and(|raw| raw.eq_ignore_ascii_case("true")),
        }
    }

    /// Parse only the projection, as accepted by get-by-id.
    pub fn projection_from_params(params: &HashMap<String, String>) -> Option<Projection> {
        params
            .get("select")
            .filter(|s| !s.is_empty())
            .and_then(|raw| parse_json_option(raw, Projection::parse))
    }
}

fn parse_json_option<T>(raw: &str, parse: fn(&Value) -> Result<T, MalformedQuery>) -> Option<T> {
    let parsed = serde_json::from_str::<Value>(raw)
        .map_err(|e| MalformedQuery::new("json", e.to_string()))
        .and_then(|value| parse(&value));
    match parsed {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(error = %e, raw, "Ignoring malformed query option");
            None
        }
    }
}

/// Read the leading run of digits, so `"10abc"` is 10 and `"2.5"` is 2.
/// Negative or digit-less values are dropped.
fn parse_count_option(option: &'static str, raw: &str) -> Option<u64> {
    let text = raw.trim_start();
    let text = text.strip_prefix('+').unwrap_or(text);
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    match text[..end].parse::<u64>() {
        Ok(n) => {
            if end < text.len() {
                debug!(option, raw, value = n, "Ignoring trailing characters in query option");
            }
            Some(n)
        }
        Err(_) => {
            debug!(option, raw, "Ignoring malformed query option");
            None
        }
    }
}

/// Binds listing options to one collection and its default page size.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    collection: &'static str,
    default_limit: Option<u64>,
}

impl QueryBuilder {
    /// `default_limit` of `None` means unlimited.
    pub fn new(collection: &'static str, default_limit: Option<u64>) -> Self {
        Self {
            collection,
            default_limit,
        }
    }

    pub fn collection(&self) -> &'static str {
        self.collection
    }

    pub fn build(&self, options: &QueryOptions) -> QueryPlan {
        if options.count {
            return QueryPlan {
                collection: self.collection,
                filter: options.filter.clone(),
                sort: None,
                projection: None,
                skip: 0,
                limit: None,
                count: true,
            };
        }

        // A limit of zero means "no limit", as in the store's own cursor API.
        let limit = options
            .limit
            .or(self.default_limit)
            .filter(|&limit| limit > 0);

        QueryPlan {
            collection: self.collection,
            filter: options.filter.clone(),
            sort: options.sort.clone(),
            projection: options.projection.clone(),
            skip: options.skip.unwrap_or(0),
            limit,
            count: false,
        }
    }
}

/// A fully bound query against one collection.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub collection: &'static str,
    pub filter: Filter,
    pub sort: Option<SortSpec>,
    pub projection: Option<Projection>,
    pub skip: u64,
    pub limit: Option<u64>,
    pub count: bool,
}

/// Result of running a [`QueryPlan`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutput {
    Count(u64),
    Documents(Vec<Value>),
}

impl QueryPlan {
    pub fn execute(&self, store: &dyn DocumentStore) -> Result<QueryOutput, StoreError> {
        if self.count {
            return store.count(self.collection, &self.filter).map(QueryOutput::Count);
        }

        let mut docs = store.find(self.collection, &self.filter)?;
        if let Some(sort) = &self.sort {
            sort.apply(&mut docs);
        }

        let skip = usize::try_from(self.skip).unwrap_or(usize::MAX);
        let take = self
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);
        let docs = docs
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|doc| match &self.projection {
                Some(projection) => projection.apply(doc),
                None => doc,
            })
            .collect();

        Ok(QueryOutput::Documents(docs))
    }
}
