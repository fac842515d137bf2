//! Structured error types for service responses.

use crate::db::StoreError;
use serde::Serialize;
use std::fmt;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Rejected before any write
    ValidationError,
    ReferenceNotFound,
    DuplicateEmail,
    MalformedId,

    // Not found errors
    NotFound,

    // Internal errors
    StoreUnavailable,
    /// A cross-collection write failed after the primary write landed.
    SyncFailed,
}

/// Coarse outcome class a transport maps onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    ClientError,
    NotFound,
    ServerError,
}

impl ErrorCode {
    pub fn status_class(self) -> StatusClass {
        match self {
            ErrorCode::ValidationError
            | ErrorCode::ReferenceNotFound
            | ErrorCode::DuplicateEmail
            | ErrorCode::MalformedId => StatusClass::ClientError,
            ErrorCode::NotFound => StatusClass::NotFound,
            ErrorCode::StoreUnavailable | ErrorCode::SyncFailed => StatusClass::ServerError,
        }
    }
}

/// Structured error returned by the services.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    // Convenience constructors

    pub fn missing_fields(message: &str, field: &str) -> Self {
        Self::new(ErrorCode::ValidationError, message).with_field(field)
    }

    pub fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, reason).with_field(field)
    }

    pub fn task_not_found(task_id: &str) -> Self {
        Self::new(ErrorCode::NotFound, "Task not found").with_field(format!("_id:{}", task_id))
    }

    pub fn user_not_found(user_id: &str) -> Self {
        Self::new(ErrorCode::NotFound, "User not found").with_field(format!("_id:{}", user_id))
    }

    pub fn assignee_not_found(user_id: &str) -> Self {
        Self::new(ErrorCode::ReferenceNotFound, "Assigned user not found")
            .with_field(format!("assignedUser:{}", user_id))
    }

    pub fn pending_task_not_found(task_id: &str) -> Self {
        Self::new(ErrorCode::ReferenceNotFound, "Pending task not found")
            .with_field(format!("pendingTasks:{}", task_id))
    }

    pub fn duplicate_email() -> Self {
        Self::new(ErrorCode::DuplicateEmail, "Email already exists").with_field("email")
    }

    pub fn malformed_id(id: &str) -> Self {
        Self::new(ErrorCode::MalformedId, format!("Malformed id: {}", id)).with_field("_id")
    }

    /// Wrap a failure of a secondary write.
    pub fn sync_failed(context: &str, err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::SyncFailed, format!("{}: {}", context, err))
    }

    pub fn status_class(&self) -> StatusClass {
        self.code.status_class()
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ServiceError {}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey { ref field, .. } if field == "email" => {
                ServiceError::duplicate_email()
            }
            other => ServiceError::new(ErrorCode::StoreUnavailable, other.to_string()),
        }
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
