//! Queue and worker endpoints.
//!
//! Workers authenticate each call with the secret of their queue entry,
//! passed as the `secret` query parameter.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use ferry_id::WorkerSecret;
use ferry_types::{MigrationStatus, WorkerResponse};
use serde::Deserialize;

use super::parse_instance_id;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::db::QueueFilter;
use crate::state::AppState;

/// `/v1/queue`
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_queue))
        .route("/{uuid}", get(get_queue_entry))
        .route("/{uuid}/worker/command", get(worker_command))
        .route("/{uuid}/worker/status", put(worker_status))
}

#[derive(Debug, Deserialize)]
pub struct ListQueueQuery {
    pub batch: Option<String>,
    pub status: Option<MigrationStatus>,
    pub window: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WorkerQuery {
    pub secret: String,
}

impl WorkerQuery {
    fn secret(&self) -> Result<WorkerSecret, ApiError> {
        WorkerSecret::parse(&self.secret)
            .map_err(|e| ApiError::bad_request("invalid_secret_format", e.to_string()))
    }
}

async fn list_queue(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ListQueueQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = QueueFilter {
        instance: None,
        batch: query.batch,
        status: query.status,
        window: query.window,
    };
    let entries = state
        .engine()
        .queue(filter)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(entries))
}

async fn get_queue_entry(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid = parse_instance_id(&uuid).map_err(|e| ctx.error(e))?;
    let entry = state
        .engine()
        .get_queue_entry(uuid)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(entry))
}

/// Next command for the worker.
async fn worker_command(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(uuid): Path<String>,
    Query(query): Query<WorkerQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid = parse_instance_id(&uuid).map_err(|e| ctx.error(e))?;
    let secret = query.secret().map_err(|e| ctx.error(e))?;
    let command = state
        .engine()
        .new_worker_command(uuid, secret)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(command))
}

/// Status report from the worker; responds with the updated queue entry.
async fn worker_status(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(uuid): Path<String>,
    Query(query): Query<WorkerQuery>,
    Json(response): Json<WorkerResponse>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid = parse_instance_id(&uuid).map_err(|e| ctx.error(e))?;
    let secret = query.secret().map_err(|e| ctx.error(e))?;
    let entry = state
        .engine()
        .process_worker_update(uuid, secret, response)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(entry))
}
