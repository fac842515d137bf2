//! In-memory document store.
//!
//! Used by tests and by `serve --memory`. Supports write-failure injection so
//! partial-failure paths can be driven deterministically.

use super::document::{DocumentStore, StoreError, StoreResult, UNIQUE_FIELDS, Update, document_id};
use crate::query::Filter;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
    failing_writes: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write to `collection` fail with
    /// [`StoreError::Unavailable`] until [`MemoryStore::heal`] is called.
    pub fn fail_writes_to(&self, collection: &str) {
        if let Ok(mut failing) = self.failing_writes.lock() {
            failing.insert(collection.to_string());
        }
    }

    pub fn heal(&self) {
        if let Ok(mut failing) = self.failing_writes.lock() {
            failing.clear();
        }
    }

    fn check_writable(&self, collection: &str) -> StoreResult<()> {
        let failing = self.failing_writes.lock().map_err(|_| StoreError::Poisoned)?;
        if failing.contains(collection) {
            return Err(StoreError::Unavailable(format!(
                "writes to {} are failing",
                collection
            )));
        }
        Ok(())
    }
}

/// Reject `doc` if it collides on a unique field with a different document.
fn check_unique(collection: &str, docs: &[Value], doc: &Value) -> StoreResult<()> {
    let id = doc.get("_id");
    for (_, field) in UNIQUE_FIELDS.iter().filter(|(c, _)| *c == collection) {
        let Some(value) = doc.get(*field).filter(|v| !v.is_null()) else {
            continue;
        };
        let clash = docs
            .iter()
            .any(|other| other.get("_id") != id && other.get(*field) == Some(value));
        if clash {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                field: field.to_string(),
            });
        }
    }
    Ok(())
}

impl DocumentStore for MemoryStore {
    fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Value>> {
        let collections = self.collections.read().map_err(|_| StoreError::Poisoned)?;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    fn insert(&self, collection: &str, doc: Value) -> StoreResult<()> {
        self.check_writable(collection)?;
        let id = document_id(collection, &doc)?.to_string();
        let mut collections = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| d.get("_id").and_then(Value::as_str) == Some(id.as_str())) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                field: "_id".to_string(),
            });
        }
        check_unique(collection, docs, &doc)?;
        docs.push(doc);
        Ok(())
    }

    fn replace(&self, collection: &str, id: &str, doc: Value) -> StoreResult<bool> {
        self.check_writable(collection)?;
        let mut collections = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let Some(pos) = docs
            .iter()
            .position(|d| d.get("_id").and_then(Value::as_str) == Some(id))
        else {
            return Ok(false);
        };
        check_unique(collection, docs, &doc)?;
        docs[pos] = doc;
        Ok(true)
    }

    fn update_matching(&self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<u64> {
        self.check_writable(collection)?;
        let mut collections = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut matched = 0u64;
        for pos in 0..docs.len() {
            if !filter.matches(&docs[pos]) {
                continue;
            }
            matched += 1;
            let mut updated = docs[pos].clone();
            if update.apply(&mut updated) {
                check_unique(collection, docs, &updated)?;
                docs[pos] = updated;
            }
        }
        Ok(matched)
    }

    fn delete(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.check_writable(collection)?;
        let mut collections = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok((before - docs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn injected_failures_block_writes_but_not_reads() {
        let store = MemoryStore::new();
        store.insert("users", json!({ "_id": "u", "email": "e" })).unwrap();

        store.fail_writes_to("users");
        let err = store
            .update_matching("users", &Filter::id("u"), &Update::add_to_set("pendingTasks", "t"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.find_by_id("users", "u").unwrap().is_some());

        store.heal();
        assert_eq!(
            store
                .update_matching("users", &Filter::id("u"), &Update::add_to_set("pendingTasks", "t"))
                .unwrap(),
            1
        );
    }

    #[test]
    fn replace_enforces_unique_fields() {
        let store = MemoryStore::new();
        store.insert("users", json!({ "_id": "a", "email": "a@x" })).unwrap();
        store.insert("users", json!({ "_id": "b", "email": "b@x" })).unwrap();

        let err = store
            .replace("users", "b", json!({ "_id": "b", "email": "a@x" }))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));

        // Re-saving a document with its own email is fine.
        assert!(store.replace("users", "a", json!({ "_id": "a", "email": "a@x" })).unwrap());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let store = MemoryStore::new();
        store.insert("tasks", json!({ "_id": "t" })).unwrap();
        assert!(store.insert("tasks", json!({ "_id": "t" })).is_err());
    }
}
