//! API v1 routes.

mod batches;
mod instances;
mod queue;
mod sources;

use axum::Router;
use ferry_id::InstanceId;

use crate::api::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/sources", sources::routes())
        .nest("/batches", batches::routes())
        .nest("/instances", instances::routes())
        // Worker endpoints live under the queue: /v1/queue/{uuid}/worker/...
        .nest("/queue", queue::routes())
}

/// Parse an instance UUID path segment.
fn parse_instance_id(raw: &str) -> Result<InstanceId, ApiError> {
    InstanceId::parse(raw)
        .map_err(|e| ApiError::bad_request("invalid_instance_id", e.to_string()))
}
