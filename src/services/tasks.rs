use super::check_id;
use crate::error::{ServiceError, ServiceResult};
use crate::query::{Projection, QueryBuilder, QueryOptions, QueryOutput};
use crate::sync::RelationshipSynchronizer;
use crate::types::{TASKS, Task, TaskInput, UNASSIGNED, new_id, now, parse_timestamp};
use chrono::{DateTime, Utc};
use serde_json::Value;

const REQUIRED: &str = "Task must have name and deadline";

#[derive(Clone)]
pub struct TaskService {
    sync: RelationshipSynchronizer,
    query: QueryBuilder,
}

/// Validated task fields, ready to become a document.
struct TaskFields {
    name: String,
    description: String,
    deadline: DateTime<Utc>,
    completed: bool,
    assigned_user: String,
}

impl TaskFields {
    fn validate(input: TaskInput) -> ServiceResult<Self> {
        let name = input
            .name
            .ok_or_else(|| ServiceError::missing_fields(REQUIRED, "name"))?;
        let raw_deadline = input
            .deadline
            .ok_or_else(|| ServiceError::missing_fields(REQUIRED, "deadline"))?;
        let deadline = parse_timestamp(&raw_deadline).ok_or_else(|| {
            ServiceError::invalid_value("deadline", format!("Invalid deadline: {}", raw_deadline))
        })?;

        Ok(Self {
            name,
            description: input.description.unwrap_or_default(),
            deadline,
            completed: input.completed,
            assigned_user: input.assigned_user.unwrap_or_default(),
        })
    }

    fn into_task(self, id: String, date_created: DateTime<Utc>) -> Task {
        Task {
            id,
            name: self.name,
            description: self.description,
            deadline: self.deadline,
            completed: self.completed,
            assigned_user: self.assigned_user,
            // Derived from the assignee by the synchronizer.
            assigned_user_name: UNASSIGNED.to_string(),
            date_created,
        }
    }
}

impl TaskService {
    pub fn new(sync: RelationshipSynchronizer, default_limit: Option<u64>) -> Self {
        Self {
            sync,
            query: QueryBuilder::new(TASKS, default_limit),
        }
    }

    pub fn list(&self, options: &QueryOptions) -> ServiceResult<QueryOutput> {
        let plan = self.query.build(options);
        Ok(plan.execute(self.sync.tasks().store())?)
    }

    pub fn get(&self, id: &str, projection: Option<&Projection>) -> ServiceResult<Value> {
        check_id(id)?;
        let doc = self
            .sync
            .tasks()
            .store()
            .find_by_id(TASKS, id)?
            .ok_or_else(|| ServiceError::task_not_found(id))?;
        Ok(match projection {
            Some(p) => p.apply(doc),
            None => doc,
        })
    }

    pub fn create(&self, input: TaskInput) -> ServiceResult<Task> {
        let task = TaskFields::validate(input)?.into_task(new_id(), now());
        self.sync.task_created(task)
    }

    /// Replace every client-editable field; id and creation date are kept.
    pub fn replace(&self, id: &str, input: TaskInput) -> ServiceResult<Task> {
        let fields = TaskFields::validate(input)?;
        check_id(id)?;
        let previous = self
            .sync
            .tasks()
            .find_by_id(id)?
            .ok_or_else(|| ServiceError::task_not_found(id))?;

        let next = fields.into_task(previous.id.clone(), previous.date_created);
        self.sync.task_replaced(&previous, next)
    }

    /// Delete the task and return it as it was.
    pub fn delete(&self, id: &str) -> ServiceResult<Task> {
        check_id(id)?;
        let task = self
            .sync
            .tasks()
            .find_by_id(id)?
            .ok_or_else(|| ServiceError::task_not_found(id))?;
        self.sync.task_deleted(&task)?;
        Ok(task)
    }
}
