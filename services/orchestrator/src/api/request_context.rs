//! Request-scoped context extracted from HTTP requests.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Request};
use ferry_id::RequestId;
use tower_http::request_id::MakeRequestId;

use crate::api::error::ApiError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

impl RequestContext {
    /// Convert an error into a problem response tagged with this request.
    pub fn error(&self, err: impl Into<ApiError>) -> ApiError {
        err.into().with_request_id(self.request_id.clone())
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| RequestId::new().to_string());

        Ok(Self { request_id })
    }
}

/// Assigns a time-ordered request id to requests that arrive without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeFerryRequestId;

impl MakeRequestId for MakeFerryRequestId {
    fn make_request_id<B>(
        &mut self,
        _request: &Request<B>,
    ) -> Option<tower_http::request_id::RequestId> {
        HeaderValue::from_str(&RequestId::new().to_string())
            .ok()
            .map(tower_http::request_id::RequestId::new)
    }
}
