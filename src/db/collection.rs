//! Typed accessors over one collection of a [`DocumentStore`].

use super::document::{DocumentStore, StoreError, StoreResult, Update};
use crate::query::Filter;
use crate::types::{TASKS, Task, USERS, User};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;

/// Entities of type `T` stored in one named collection.
pub struct Collection<T> {
    store: Arc<dyn DocumentStore>,
    name: &'static str,
    _entity: PhantomData<fn() -> T>,
}

pub type TaskStore = Collection<Task>;
pub type UserStore = Collection<User>;

impl TaskStore {
    pub fn tasks(store: Arc<dyn DocumentStore>) -> Self {
        Collection::new(store, TASKS)
    }
}

impl UserStore {
    pub fn users(store: Arc<dyn DocumentStore>) -> Self {
        Collection::new(store, USERS)
    }
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            name: self.name,
            _entity: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> Collection<T> {
    pub fn new(store: Arc<dyn DocumentStore>, name: &'static str) -> Self {
        Self {
            store,
            name,
            _entity: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn find(&self, filter: &Filter) -> StoreResult<Vec<T>> {
        self.store
            .find(self.name, filter)?
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(StoreError::from))
            .collect()
    }

    pub fn find_by_id(&self, id: &str) -> StoreResult<Option<T>> {
        match self.store.find_by_id(self.name, id)? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub fn count(&self, filter: &Filter) -> StoreResult<u64> {
        self.store.count(self.name, filter)
    }

    pub fn insert(&self, entity: &T) -> StoreResult<()> {
        self.store.insert(self.name, serde_json::to_value(entity)?)
    }

    pub fn replace(&self, id: &str, entity: &T) -> StoreResult<bool> {
        self.store.replace(self.name, id, serde_json::to_value(entity)?)
    }

    pub fn update_matching(&self, filter: &Filter, update: &Update) -> StoreResult<u64> {
        self.store.update_matching(self.name, filter, update)
    }

    pub fn update_by_id(&self, id: &str, update: &Update) -> StoreResult<bool> {
        Ok(self.update_matching(&Filter::id(id), update)? > 0)
    }

    pub fn delete_by_id(&self, id: &str) -> StoreResult<bool> {
        Ok(self.store.delete(self.name, &Filter::id(id))? > 0)
    }
}
