//! HTTP API handlers and routing.

pub mod error;
mod formations;
mod health;
pub mod hijack;
mod jobs;
mod request_context;

use axum::Router;
use serde::de::DeserializeOwned;
use shoal_id::AppId;
use tower_http::trace::TraceLayer;
use tracing::error;

pub use formations::{FormationRequest, FormationResponse};
pub use jobs::{JobSummary, NewJobRequest};

use crate::api::error::ApiError;
use crate::state::AppState;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let apps = Router::new().merge(jobs::routes()).merge(formations::routes());

    Router::new()
        .merge(health::routes())
        .nest("/apps/{app_id}", apps)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn parse_app_id(value: &str, request_id: &str) -> Result<AppId, ApiError> {
    AppId::new(value).map_err(|e| {
        ApiError::bad_request("invalid_app_id", e.to_string()).with_request_id(request_id.to_string())
    })
}

/// Decode a JSON request body.
///
/// Malformed bodies are reported as server errors with a generic message;
/// the decode error itself is only logged.
fn decode_json<T: DeserializeOwned>(
    body: &[u8],
    code: &str,
    message: &str,
    request_id: &str,
) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        error!(error = %e, request_id = %request_id, "Failed to decode request body");
        ApiError::internal(code, message).with_request_id(request_id.to_string())
    })
}
