use super::check_id;
use crate::error::{ServiceError, ServiceResult};
use crate::query::{Projection, QueryBuilder, QueryOptions, QueryOutput};
use crate::sync::RelationshipSynchronizer;
use crate::types::{USERS, User, UserInput, new_id, now};
use serde_json::Value;

const REQUIRED: &str = "User must have name and email";

#[derive(Clone)]
pub struct UserService {
    sync: RelationshipSynchronizer,
    query: QueryBuilder,
}

fn validate(input: UserInput) -> ServiceResult<(String, String, Vec<String>)> {
    let name = input
        .name
        .ok_or_else(|| ServiceError::missing_fields(REQUIRED, "name"))?;
    let email = input
        .email
        .ok_or_else(|| ServiceError::missing_fields(REQUIRED, "email"))?;
    Ok((name, email, input.pending_tasks))
}

impl UserService {
    pub fn new(sync: RelationshipSynchronizer, default_limit: Option<u64>) -> Self {
        Self {
            sync,
            query: QueryBuilder::new(USERS, default_limit),
        }
    }

    pub fn list(&self, options: &QueryOptions) -> ServiceResult<QueryOutput> {
        let plan = self.query.build(options);
        Ok(plan.execute(self.sync.users().store())?)
    }

    pub fn get(&self, id: &str, projection: Option<&Projection>) -> ServiceResult<Value> {
        check_id(id)?;
        let doc = self
            .sync
            .users()
            .store()
            .find_by_id(USERS, id)?
            .ok_or_else(|| ServiceError::user_not_found(id))?;
        Ok(match projection {
            Some(p) => p.apply(doc),
            None => doc,
        })
    }

    /// Create a user; a duplicate email surfaces as `DuplicateEmail`.
    pub fn create(&self, input: UserInput) -> ServiceResult<User> {
        let (name, email, pending_tasks) = validate(input)?;
        let user = User {
            id: new_id(),
            name,
            email,
            pending_tasks,
            date_created: now(),
        };
        self.sync.user_created(user)
    }

    pub fn replace(&self, id: &str, input: UserInput) -> ServiceResult<User> {
        let (name, email, pending_tasks) = validate(input)?;
        check_id(id)?;
        let previous = self
            .sync
            .users()
            .find_by_id(id)?
            .ok_or_else(|| ServiceError::user_not_found(id))?;

        let next = User {
            id: previous.id.clone(),
            name,
            email,
            pending_tasks,
            date_created: previous.date_created,
        };
        self.sync.user_replaced(&previous, next)
    }

    /// Delete the user, unassigning its tasks; returns the user as it was.
    pub fn delete(&self, id: &str) -> ServiceResult<User> {
        check_id(id)?;
        let user = self
            .sync
            .users()
            .find_by_id(id)?
            .ok_or_else(|| ServiceError::user_not_found(id))?;
        self.sync.user_deleted(&user)?;
        Ok(user)
    }
}
