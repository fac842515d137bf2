//! Keeps the task → user and user → task references consistent.
//!
//! A task stores its assignee (`assignedUser`, `assignedUserName`) and a user
//! stores the reverse set (`pendingTasks`). The store has no cross-document
//! transactions, so every mutation is a primary write to the entity the caller
//! asked to change followed by corrective writes to the other side. All
//! corrective writes are set-add, set-remove or plain field overwrites and can
//! be replayed safely.
//!
//! When a corrective write fails the primary write is kept and the failure is
//! reported as [`ErrorCode::SyncFailed`](crate::error::ErrorCode::SyncFailed);
//! [`RelationshipSynchronizer::repair`] restores the invariant afterwards.

mod audit;

pub use audit::{AuditReport, Violation};

use crate::db::{DocumentStore, StoreError, TaskStore, Update, UserStore};
use crate::error::{ServiceError, ServiceResult};
use crate::query::Filter;
use crate::types::{Task, UNASSIGNED, User, fields, is_valid_id};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct RelationshipSynchronizer {
    tasks: TaskStore,
    users: UserStore,
}

impl RelationshipSynchronizer {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            tasks: TaskStore::tasks(Arc::clone(&store)),
            users: UserStore::users(store),
        }
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    // =========================================================================
    // Task side
    // =========================================================================

    /// Persist a new task and register it with its assignee.
    ///
    /// The assignee is checked before anything is written, so a dangling
    /// `assignedUser` leaves no trace.
    pub fn task_created(&self, mut task: Task) -> ServiceResult<Task> {
        if !task.is_assigned() {
            task.unassign();
            self.tasks.insert(&task)?;
            info!(task_id = %task.id, "Task created");
            return Ok(task);
        }

        let assignee = self.resolve_assignee(&task.assigned_user)?;
        task.assign_to(&assignee);
        self.tasks.insert(&task)?;
        info!(task_id = %task.id, user_id = %assignee.id, "Task created");

        self.add_pending(&assignee.id, &task.id)?;
        Ok(task)
    }

    /// Overwrite `previous` with `next` and move the task between users'
    /// pending sets as needed.
    pub fn task_replaced(&self, previous: &Task, mut next: Task) -> ServiceResult<Task> {
        let previous_assignee = previous.assigned_user.as_str();

        if !next.is_assigned() {
            next.unassign();
            self.write_task(&next)?;
            if !previous_assignee.is_empty() {
                self.remove_pending(previous_assignee, &next.id)?;
            }
            return Ok(next);
        }

        let assignee = self.resolve_assignee(&next.assigned_user)?;
        next.assign_to(&assignee);
        self.write_task(&next)?;

        if !previous_assignee.is_empty() && previous_assignee != assignee.id {
            self.remove_pending(previous_assignee, &next.id)?;
        }
        self.add_pending(&assignee.id, &next.id)?;
        Ok(next)
    }

    /// Detach the task from its assignee, then delete it.
    pub fn task_deleted(&self, task: &Task) -> ServiceResult<()> {
        if task.is_assigned() {
            self.remove_pending(&task.assigned_user, &task.id)?;
        }
        self.tasks
            .delete_by_id(&task.id)
            .map_err(|e| secondary_failure("delete task", &task.id, e))?;
        info!(task_id = %task.id, "Task deleted");
        Ok(())
    }

    // =========================================================================
    // User side
    // =========================================================================

    /// Persist a new user and claim every task listed in its pending set.
    ///
    /// Every listed task must exist; an unknown id leaves no trace.
    pub fn user_created(&self, user: User) -> ServiceResult<User> {
        let claimed = self.resolve_pending(user.pending_tasks.iter().map(String::as_str))?;
        self.users.insert(&user)?;
        info!(user_id = %user.id, "User created");

        for task in &claimed {
            self.claim_task(&user, task)?;
        }
        Ok(user)
    }

    /// Overwrite `previous` with `next`, then reconcile the tasks that left or
    /// joined the pending set. Tasks present in both sets are not touched.
    ///
    /// Ids joining the set must name existing tasks. Ids already present in
    /// `previous` are kept as they are, even if their task is gone.
    pub fn user_replaced(&self, previous: &User, next: User) -> ServiceResult<User> {
        let before: HashSet<&str> = previous.pending_tasks.iter().map(String::as_str).collect();
        let claimed = self.resolve_pending(
            next.pending_tasks
                .iter()
                .map(String::as_str)
                .filter(|id| !before.contains(id)),
        )?;

        if !self.users.replace(&next.id, &next)? {
            return Err(ServiceError::user_not_found(&next.id));
        }
        info!(user_id = %next.id, "User replaced");

        let after: HashSet<&str> = next.pending_tasks.iter().map(String::as_str).collect();

        let removed: Vec<&str> = previous
            .pending_tasks
            .iter()
            .map(String::as_str)
            .filter(|id| !after.contains(id))
            .collect();
        if !removed.is_empty() {
            // Only tasks still pointing here; others were reassigned meanwhile.
            let filter = Filter::id_in(removed.iter().copied())
                .and(Filter::eq(fields::ASSIGNED_USER, next.id.as_str()));
            let released = self
                .tasks
                .update_matching(&filter, &unassigned())
                .map_err(|e| secondary_failure("release tasks", &next.id, e))?;
            debug!(user_id = %next.id, released, "Released tasks dropped from pending set");
        }

        // Added tasks are claimed even if another user took them after they
        // were loaded; see the audit for detecting that race.
        for task in &claimed {
            self.claim_task(&next, task)?;
        }
        Ok(next)
    }

    /// Unassign every task pointing at the user, then delete it.
    pub fn user_deleted(&self, user: &User) -> ServiceResult<()> {
        let released = self
            .tasks
            .update_matching(&Filter::eq(fields::ASSIGNED_USER, user.id.as_str()), &unassigned())
            .map_err(|e| secondary_failure("release tasks", &user.id, e))?;
        debug!(user_id = %user.id, released, "Released tasks of deleted user");

        self.users
            .delete_by_id(&user.id)
            .map_err(|e| secondary_failure("delete user", &user.id, e))?;
        info!(user_id = %user.id, "User deleted");
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn resolve_assignee(&self, user_id: &str) -> ServiceResult<User> {
        if !is_valid_id(user_id) {
            return Err(ServiceError::assignee_not_found(user_id));
        }
        self.users
            .find_by_id(user_id)?
            .ok_or_else(|| ServiceError::assignee_not_found(user_id))
    }

    /// Load the tasks a pending set is about to gain, in order, once each.
    fn resolve_pending<'a>(&self, ids: impl Iterator<Item = &'a str>) -> ServiceResult<Vec<Task>> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for id in ids.filter(|id| seen.insert(*id)) {
            if !is_valid_id(id) {
                return Err(ServiceError::pending_task_not_found(id));
            }
            let task = self
                .tasks
                .find_by_id(id)?
                .ok_or_else(|| ServiceError::pending_task_not_found(id))?;
            found.push(task);
        }
        Ok(found)
    }

    fn write_task(&self, task: &Task) -> ServiceResult<()> {
        if !self.tasks.replace(&task.id, task)? {
            return Err(ServiceError::task_not_found(&task.id));
        }
        info!(task_id = %task.id, assigned_user = %task.assigned_user, "Task replaced");
        Ok(())
    }

    /// Point `task` at `user`, pulling it out of any other user's pending set
    /// first. A task deleted since it was loaded is skipped.
    fn claim_task(&self, user: &User, task: &Task) -> ServiceResult<()> {
        if task.is_assigned() && task.assigned_user != user.id {
            self.remove_pending(&task.assigned_user, &task.id)?;
        }
        let updated = self
            .tasks
            .update_by_id(&task.id, &assigned_to(user))
            .map_err(|e| secondary_failure("assign task", &task.id, e))?;
        if updated {
            debug!(user_id = %user.id, task_id = %task.id, "Task claimed by pending set");
        } else {
            debug!(user_id = %user.id, task_id = %task.id, "Skipping pending task deleted meanwhile");
        }
        Ok(())
    }

    fn add_pending(&self, user_id: &str, task_id: &str) -> ServiceResult<()> {
        self.users
            .update_by_id(user_id, &Update::add_to_set(fields::PENDING_TASKS, task_id))
            .map_err(|e| secondary_failure("add pending task", user_id, e))?;
        debug!(user_id, task_id, "Added to pending set");
        Ok(())
    }

    fn remove_pending(&self, user_id: &str, task_id: &str) -> ServiceResult<()> {
        self.users
            .update_by_id(user_id, &Update::pull(fields::PENDING_TASKS, task_id))
            .map_err(|e| secondary_failure("remove pending task", user_id, e))?;
        debug!(user_id, task_id, "Removed from pending set");
        Ok(())
    }
}

fn unassigned() -> Update {
    Update::set([
        (fields::ASSIGNED_USER, Value::from("")),
        (fields::ASSIGNED_USER_NAME, Value::from(UNASSIGNED)),
    ])
}

fn assigned_to(user: &User) -> Update {
    Update::set([
        (fields::ASSIGNED_USER, Value::from(user.id.as_str())),
        (fields::ASSIGNED_USER_NAME, Value::from(user.name.as_str())),
    ])
}

fn secondary_failure(step: &str, entity_id: &str, err: StoreError) -> ServiceError {
    warn!(step, entity_id, error = %err, "Relationship sync failed after primary write");
    ServiceError::sync_failed(step, err)
}
