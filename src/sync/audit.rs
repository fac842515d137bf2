//! Consistency audit and repair for the assignment relationship.
//!
//! Repair treats the task side as authoritative: a task's `assignedUser` is
//! the truth, and pending sets are brought in line with it.

use super::{RelationshipSynchronizer, unassigned};
use crate::db::Update;
use crate::error::ServiceResult;
use crate::query::Filter;
use crate::types::{Task, UNASSIGNED, User, fields};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// One broken edge of the assignment relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// The task names a user whose pending set lacks it.
    MissingBackReference { task_id: String, user_id: String },
    /// The task names a user that does not exist.
    DanglingAssignee { task_id: String, user_id: String },
    /// The cached assignee name differs from the user's current name.
    StaleAssigneeName {
        task_id: String,
        user_id: String,
        cached: String,
        actual: String,
    },
    /// The user lists a task that points at someone else (or nobody).
    ForeignPendingTask {
        user_id: String,
        task_id: String,
        assigned_to: String,
    },
    /// The user lists a task that no longer exists. Tolerated.
    DanglingPendingTask { user_id: String, task_id: String },
    /// The user lists the same task more than once.
    DuplicatePendingTask { user_id: String, task_id: String },
}

impl Violation {
    /// Dangling pending ids are read as already cleaned up.
    pub fn is_tolerated(&self) -> bool {
        matches!(self, Violation::DanglingPendingTask { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub tasks_scanned: usize,
    pub users_scanned: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.iter().all(Violation::is_tolerated)
    }
}

impl RelationshipSynchronizer {
    /// Scan both collections and list every violation of the invariant.
    pub fn audit(&self) -> ServiceResult<AuditReport> {
        let tasks = self.tasks.find(&Filter::All)?;
        let users = self.users.find(&Filter::All)?;

        let mut report = AuditReport {
            tasks_scanned: tasks.len(),
            users_scanned: users.len(),
            violations: Vec::new(),
        };
        let users_by_id: HashMap<&str, &User> = users.iter().map(|u| (u.id.as_str(), u)).collect();
        let tasks_by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        for task in &tasks {
            audit_task(task, &users_by_id, &mut report.violations);
        }
        for user in &users {
            audit_user(user, &tasks_by_id, &mut report.violations);
        }

        info!(
            tasks = report.tasks_scanned,
            users = report.users_scanned,
            violations = report.violations.len(),
            "Relationship audit finished"
        );
        Ok(report)
    }

    /// Re-drive the idempotent writes that fix each violation in `report`.
    /// Returns the number of documents the repair touched.
    pub fn repair(&self, report: &AuditReport) -> ServiceResult<u64> {
        let mut touched = 0u64;
        for violation in &report.violations {
            debug!(?violation, "Repairing");
            touched += match violation {
                Violation::MissingBackReference { task_id, user_id } => self
                    .users
                    .update_matching(&Filter::id(user_id), &Update::add_to_set(fields::PENDING_TASKS, task_id.as_str()))?,
                Violation::DanglingAssignee { task_id, user_id } => self
                    .tasks
                    .update_matching(&still_assigned(task_id, user_id), &unassigned())?,
                Violation::StaleAssigneeName {
                    task_id,
                    user_id,
                    actual,
                    ..
                } => self.tasks.update_matching(
                    &still_assigned(task_id, user_id),
                    &Update::set([(fields::ASSIGNED_USER_NAME, Value::from(actual.as_str()))]),
                )?,
                Violation::ForeignPendingTask { user_id, task_id, .. }
                | Violation::DanglingPendingTask { user_id, task_id } => self
                    .users
                    .update_matching(&Filter::id(user_id), &Update::pull(fields::PENDING_TASKS, task_id.as_str()))?,
                Violation::DuplicatePendingTask { user_id, task_id } => {
                    let filter = Filter::id(user_id);
                    self.users
                        .update_matching(&filter, &Update::pull(fields::PENDING_TASKS, task_id.as_str()))?;
                    self.users
                        .update_matching(&filter, &Update::add_to_set(fields::PENDING_TASKS, task_id.as_str()))?
                }
            };
        }
        info!(touched, "Relationship repair finished");
        Ok(touched)
    }
}

fn still_assigned(task_id: &str, user_id: &str) -> Filter {
    Filter::id(task_id).and(Filter::eq(fields::ASSIGNED_USER, user_id))
}

fn audit_task(task: &Task, users: &HashMap<&str, &User>, out: &mut Vec<Violation>) {
    if !task.is_assigned() {
        if task.assigned_user_name != UNASSIGNED {
            out.push(Violation::StaleAssigneeName {
                task_id: task.id.clone(),
                user_id: String::new(),
                cached: task.assigned_user_name.clone(),
                actual: UNASSIGNED.to_string(),
            });
        }
        return;
    }

    let Some(user) = users.get(task.assigned_user.as_str()) else {
        out.push(Violation::DanglingAssignee {
            task_id: task.id.clone(),
            user_id: task.assigned_user.clone(),
        });
        return;
    };
    if !user.has_pending(&task.id) {
        out.push(Violation::MissingBackReference {
            task_id: task.id.clone(),
            user_id: user.id.clone(),
        });
    }
    if task.assigned_user_name != user.name {
        out.push(Violation::StaleAssigneeName {
            task_id: task.id.clone(),
            user_id: user.id.clone(),
            cached: task.assigned_user_name.clone(),
            actual: user.name.clone(),
        });
    }
}

fn audit_user(user: &User, tasks: &HashMap<&str, &Task>, out: &mut Vec<Violation>) {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for id in &user.pending_tasks {
        *seen.entry(id.as_str()).or_default() += 1;
    }

    // First-seen order keeps reports stable.
    let mut reported = Vec::with_capacity(seen.len());
    for id in &user.pending_tasks {
        let id = id.as_str();
        if reported.contains(&id) {
            continue;
        }
        reported.push(id);

        // Anything removed outright needs no separate duplicate fix.
        match tasks.get(id) {
            None => out.push(Violation::DanglingPendingTask {
                user_id: user.id.clone(),
                task_id: id.to_string(),
            }),
            Some(task) if task.assigned_user != user.id => out.push(Violation::ForeignPendingTask {
                user_id: user.id.clone(),
                task_id: id.to_string(),
                assigned_to: task.assigned_user.clone(),
            }),
            Some(_) if seen[id] > 1 => out.push(Violation::DuplicatePendingTask {
                user_id: user.id.clone(),
                task_id: id.to_string(),
            }),
            Some(_) => {}
        }
    }
}
