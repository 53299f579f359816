//! Instance endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use ferry_id::InstanceId;
use ferry_types::{Instance, InstanceOverrides, InstanceProperties, MigrationStatus};
use serde::Deserialize;

use super::parse_instance_id;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::db::{Assignment, InstanceFilter};
use crate::state::AppState;

/// `/v1/instances`
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_instances).post(create_instance))
        .route("/{uuid}", get(get_instance).delete(delete_instance))
        .route("/{uuid}/overrides", put(update_overrides))
        .route("/{uuid}/disable", post(disable_instance))
        .route("/{uuid}/enable", post(enable_instance))
}

// =============================================================================
// Request Types
// =============================================================================

/// A discovered instance.
#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    /// Source-assigned UUID; generated when absent.
    #[serde(default)]
    pub uuid: Option<InstanceId>,
    pub source: String,
    pub properties: InstanceProperties,
    #[serde(default)]
    pub overrides: InstanceOverrides,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListInstancesQuery {
    pub batch: Option<String>,
    pub source: Option<String>,
    pub status: Option<MigrationStatus>,
    /// Only instances not assigned to any batch.
    #[serde(default)]
    pub unassigned: bool,
}

impl ListInstancesQuery {
    fn into_filter(self) -> Result<InstanceFilter, ApiError> {
        let assignment = match (self.batch, self.unassigned) {
            (Some(_), true) => {
                return Err(ApiError::bad_request(
                    "invalid_query",
                    "batch and unassigned are mutually exclusive",
                ))
            }
            (Some(batch), false) => Some(Assignment::Batch(batch)),
            (None, true) => Some(Assignment::Unassigned),
            (None, false) => None,
        };
        Ok(InstanceFilter {
            uuid: None,
            source: self.source,
            assignment,
            status: self.status,
        })
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_instances(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ListInstancesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = query.into_filter().map_err(|e| ctx.error(e))?;
    let instances = state
        .engine()
        .list_instances(filter)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(instances))
}

async fn create_instance(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateInstanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut instance = Instance::new(req.uuid.unwrap_or_default(), req.source, req.properties);
    instance.overrides = req.overrides;

    let instance = state
        .engine()
        .create_instance(instance)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok((StatusCode::CREATED, Json(instance)))
}

async fn get_instance(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid = parse_instance_id(&uuid).map_err(|e| ctx.error(e))?;
    let instance = state
        .engine()
        .get_instance(uuid)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(instance))
}

async fn delete_instance(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid = parse_instance_id(&uuid).map_err(|e| ctx.error(e))?;
    state
        .engine()
        .delete_instance(uuid)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_overrides(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(uuid): Path<String>,
    Json(overrides): Json<InstanceOverrides>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid = parse_instance_id(&uuid).map_err(|e| ctx.error(e))?;
    let instance = state
        .engine()
        .update_overrides(uuid, overrides)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(instance))
}

async fn disable_instance(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid = parse_instance_id(&uuid).map_err(|e| ctx.error(e))?;
    let instance = state
        .engine()
        .disable_instance(uuid)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(instance))
}

async fn enable_instance(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid = parse_instance_id(&uuid).map_err(|e| ctx.error(e))?;
    let instance = state
        .engine()
        .enable_instance(uuid)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(instance))
}
