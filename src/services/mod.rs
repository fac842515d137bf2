//! Task and user operations exposed to the transport layer.

mod tasks;
mod users;

pub use tasks::TaskService;
pub use users::UserService;

use crate::config::QueryConfig;
use crate::db::DocumentStore;
use crate::error::{ServiceError, ServiceResult};
use crate::sync::RelationshipSynchronizer;
use crate::types::is_valid_id;
use std::sync::Arc;

/// Both services over one shared store.
#[derive(Clone)]
pub struct Services {
    pub tasks: TaskService,
    pub users: UserService,
    sync: RelationshipSynchronizer,
}

impl Services {
    pub fn new(store: Arc<dyn DocumentStore>, config: &QueryConfig) -> Self {
        let sync = RelationshipSynchronizer::new(store);
        Self {
            tasks: TaskService::new(sync.clone(), config.task_default_limit),
            users: UserService::new(sync.clone(), config.user_default_limit),
            sync,
        }
    }

    pub fn synchronizer(&self) -> &RelationshipSynchronizer {
        &self.sync
    }
}

/// Reject ids that cannot name a document before touching the store.
fn check_id(id: &str) -> ServiceResult<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(ServiceError::malformed_id(id))
    }
}
