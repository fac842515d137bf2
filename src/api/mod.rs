//! HTTP transport for the task and user services.
//!
//! Every response is wrapped in `{ "message": ..., "data": ... }`. Service
//! errors map onto 400 (client errors), 404 or 500.

mod server;

pub use server::{ServerHandle, build_router, start_server};

use crate::error::{ServiceError, StatusClass};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

/// Response envelope shared by every route.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub message: String,
    pub data: T,
}

/// 200 with `data`.
pub(crate) fn ok<T: Serialize>(message: &str, data: T) -> Response {
    respond(StatusCode::OK, message, data)
}

/// 201 with the created entity.
pub(crate) fn created<T: Serialize>(message: &str, data: T) -> Response {
    respond(StatusCode::CREATED, message, data)
}

fn respond<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
    (
        status,
        Json(Envelope {
            message: message.to_string(),
            data,
        }),
    )
        .into_response()
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self.status_class() {
            StatusClass::ClientError => StatusCode::BAD_REQUEST,
            StatusClass::NotFound => StatusCode::NOT_FOUND,
            StatusClass::ServerError => {
                error!(code = ?self.code, message = %self.message, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        respond(status, &self.message, Value::Null)
    }
}

/// Parse a request body; anything that is not a JSON object reads as `{}`.
pub(crate) fn body_object(bytes: &[u8]) -> Value {
    serde_json::from_slice::<Value>(bytes)
        .ok()
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(Default::default()))
}
