//! Router and listener for the REST API.

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{body_object, created, ok};
use crate::error::ServiceResult;
use crate::query::QueryOptions;
use crate::services::Services;
use crate::types::{TaskInput, UserInput};

type Params = Query<HashMap<String, String>>;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// API root - returns available endpoints.
async fn api_root() -> impl IntoResponse {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/api/health",
            "tasks": "/api/tasks",
            "users": "/api/users",
        }
    }))
}

fn reply(result: ServiceResult<Response>) -> Response {
    result.unwrap_or_else(IntoResponse::into_response)
}

// =============================================================================
// Tasks
// =============================================================================

async fn list_tasks(State(services): State<Services>, Query(params): Params) -> Response {
    let options = QueryOptions::from_params(&params);
    reply(services.tasks.list(&options).map(|out| ok("OK", out)))
}

async fn create_task(State(services): State<Services>, body: Bytes) -> Response {
    let input = TaskInput::from_json(&body_object(&body));
    reply(services.tasks.create(input).map(|task| created("Task created", task)))
}

async fn get_task(
    State(services): State<Services>,
    Path(id): Path<String>,
    Query(params): Params,
) -> Response {
    let projection = QueryOptions::projection_from_params(&params);
    reply(services.tasks.get(&id, projection.as_ref()).map(|doc| ok("OK", doc)))
}

async fn replace_task(
    State(services): State<Services>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let input = TaskInput::from_json(&body_object(&body));
    reply(services.tasks.replace(&id, input).map(|task| ok("Task updated", task)))
}

async fn delete_task(State(services): State<Services>, Path(id): Path<String>) -> Response {
    reply(services.tasks.delete(&id).map(|task| ok("Task deleted", task)))
}

// =============================================================================
// Users
// =============================================================================

async fn list_users(State(services): State<Services>, Query(params): Params) -> Response {
    let options = QueryOptions::from_params(&params);
    reply(services.users.list(&options).map(|out| ok("OK", out)))
}

async fn create_user(State(services): State<Services>, body: Bytes) -> Response {
    let input = UserInput::from_json(&body_object(&body));
    reply(services.users.create(input).map(|user| created("User created", user)))
}

async fn get_user(
    State(services): State<Services>,
    Path(id): Path<String>,
    Query(params): Params,
) -> Response {
    let projection = QueryOptions::projection_from_params(&params);
    reply(services.users.get(&id, projection.as_ref()).map(|doc| ok("OK", doc)))
}

async fn replace_user(
    State(services): State<Services>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let input = UserInput::from_json(&body_object(&body));
    reply(services.users.replace(&id, input).map(|user| ok("User updated", user)))
}

async fn delete_user(State(services): State<Services>, Path(id): Path<String>) -> Response {
    reply(services.users.delete(&id).map(|user| ok("User deleted", user)))
}

/// Build the router with all routes.
pub fn build_router(services: Services) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api", get(api_root))
        .route("/api/health", get(health))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).put(replace_task).delete(delete_task),
        )
        .route("/api/users", get(list_users).post(create_user))
        .route(
            "/api/users/{id}",
            get(get_user).put(replace_user).delete(delete_user),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}

/// Handle for a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the listener actually bound (useful with port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

/// Bind `bind:port` and serve the API in a background task.
pub async fn start_server(services: Services, bind: &str, port: u16) -> anyhow::Result<ServerHandle> {
    let app = build_router(services);

    let listener = tokio::net::TcpListener::bind((bind, port)).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on http://{}", addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("API server shutting down");
            })
            .await
        {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(ServerHandle {
        addr,
        shutdown_tx,
        task,
    })
}
