//! Source endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use ferry_types::Source;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

/// `/v1/sources`
pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(list_sources).post(create_source))
}

async fn list_sources(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let sources = state
        .engine()
        .list_sources()
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(sources))
}

async fn create_source(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(source): Json<Source>,
) -> Result<impl IntoResponse, ApiError> {
    let source = state
        .engine()
        .create_source(source)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok((StatusCode::CREATED, Json(source)))
}
