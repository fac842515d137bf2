//! The document-store contract the services are written against.
//!
//! Stores guarantee single-document atomicity only: every [`Update`] applied to
//! one document is all-or-nothing and visible to later reads, but nothing spans
//! documents or collections.

use crate::query::{Filter, compare_values};
use crate::types::USERS;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Fields that must be unique within a collection, as `(collection, field)`.
pub const UNIQUE_FIELDS: &[(&str, &str)] = &[(USERS, "email")];

/// Errors raised by a document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate value for unique field `{field}` in {collection}")]
    DuplicateKey { collection: String, field: String },

    #[error("document in {collection} has no string `_id`")]
    MissingId { collection: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(#[from] refinery::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A single-document modification.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Overwrite the given top-level fields.
    Set(Map<String, Value>),
    /// Append `value` to the array at `field` unless already present.
    AddToSet { field: String, value: Value },
    /// Remove every element equal to `value` from the array at `field`.
    Pull { field: String, value: Value },
}

impl Update {
    pub fn set<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Update::Set(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn add_to_set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Update::AddToSet {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn pull(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Update::Pull {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Apply to `doc` in place; returns whether anything changed.
    pub fn apply(&self, doc: &mut Value) -> bool {
        let Some(obj) = doc.as_object_mut() else {
            return false;
        };
        match self {
            Update::Set(fields) => {
                let mut changed = false;
                for (key, value) in fields {
                    if obj.get(key) != Some(value) {
                        obj.insert(key.clone(), value.clone());
                        changed = true;
                    }
                }
                changed
            }
            Update::AddToSet { field, value } => {
                let slot = obj.entry(field.clone()).or_insert_with(|| Value::Array(Vec::new()));
                if !slot.is_array() {
                    *slot = Value::Array(Vec::new());
                }
                match slot.as_array_mut() {
                    Some(items) if !items.iter().any(|v| same(v, value)) => {
                        items.push(value.clone());
                        true
                    }
                    _ => false,
                }
            }
            Update::Pull { field, value } => match obj.get_mut(field).and_then(Value::as_array_mut) {
                Some(items) => {
                    let before = items.len();
                    items.retain(|v| !same(v, value));
                    items.len() != before
                }
                None => false,
            },
        }
    }
}

fn same(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b) && compare_values(a, b) == Ordering::Equal
}

/// Read the `_id` of a document.
pub fn document_id<'a>(collection: &str, doc: &'a Value) -> StoreResult<&'a str> {
    doc.get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::MissingId {
            collection: collection.to_string(),
        })
}

/// Persistence collaborator: collections of JSON documents keyed by `_id`.
///
/// `find` returns documents in natural (insertion) order.
pub trait DocumentStore: Send + Sync {
    fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Value>>;

    fn find_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        Ok(self.find(collection, &Filter::id(id))?.into_iter().next())
    }

    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        Ok(self.find(collection, filter)?.len() as u64)
    }

    /// Insert a document carrying its own `_id`.
    fn insert(&self, collection: &str, doc: Value) -> StoreResult<()>;

    /// Replace the document with this id; `false` if it does not exist.
    fn replace(&self, collection: &str, id: &str, doc: Value) -> StoreResult<bool>;

    /// Apply `update` to every matching document; returns the number matched.
    fn update_matching(&self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<u64>;

    /// Delete every matching document; returns the number removed.
    fn delete(&self, collection: &str, filter: &Filter) -> StoreResult<u64>;
}
