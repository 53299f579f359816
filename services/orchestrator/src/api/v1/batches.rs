//! Batch and window endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ferry_types::{Batch, BatchStatus, Window};
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

/// `/v1/batches`
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_batches).post(create_batch))
        .route(
            "/{name}",
            get(get_batch).put(update_batch).delete(delete_batch),
        )
        .route("/{name}/instances", get(batch_instances))
        .route("/{name}/start", post(start_batch))
        .route("/{name}/stop", post(stop_batch))
        .route("/{name}/windows", get(list_windows).put(replace_windows))
}

#[derive(Debug, Deserialize)]
pub struct ListBatchesQuery {
    pub status: Option<BatchStatus>,
}

async fn list_batches(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ListBatchesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let batches = state
        .engine()
        .list_batches(query.status)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(batches))
}

async fn create_batch(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(batch): Json<Batch>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state
        .engine()
        .create_batch(batch)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok((StatusCode::CREATED, Json(batch)))
}

async fn get_batch(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state
        .engine()
        .get_batch(&name)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(batch))
}

async fn update_batch(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(name): Path<String>,
    Json(batch): Json<Batch>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state
        .engine()
        .update_batch(&name, batch)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(batch))
}

async fn delete_batch(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .engine()
        .delete_batch(&name)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn batch_instances(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let instances = state
        .engine()
        .batch_instances(&name)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(instances))
}

async fn start_batch(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state
        .engine()
        .start_batch(&name)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(batch))
}

async fn stop_batch(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state
        .engine()
        .stop_batch(&name)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(batch))
}

async fn list_windows(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let windows = state
        .engine()
        .windows(&name)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(windows))
}

/// Replace the whole window set; the body is the new list.
async fn replace_windows(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(name): Path<String>,
    Json(windows): Json<Vec<Window>>,
) -> Result<impl IntoResponse, ApiError> {
    let windows = state
        .engine()
        .replace_windows(&name, windows)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(windows))
}
