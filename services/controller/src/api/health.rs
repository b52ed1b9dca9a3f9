//! Health check endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status: "ok" or "degraded".
    pub status: String,
    pub service: String,
    pub version: String,
    /// Current timestamp (RFC 3339).
    pub timestamp: String,
    /// Scheduler reachability, reported by readiness checks only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<ComponentStatus>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentStatus {
    /// "ok" or "unavailable".
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Create health check routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

fn response(status: &str, scheduler: Option<ComponentStatus>) -> HealthResponse {
    HealthResponse {
        status: status.to_string(),
        service: "controller".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        scheduler,
    }
}

/// Liveness: the process is serving requests.
async fn healthz() -> impl IntoResponse {
    Json(response("ok", None))
}

/// Readiness: the scheduler answers a state query.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler().state().await {
        Ok(_) => (
            StatusCode::OK,
            Json(response(
                "ok",
                Some(ComponentStatus {
                    status: "ok".to_string(),
                    message: None,
                }),
            )),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(response(
                "degraded",
                Some(ComponentStatus {
                    status: "unavailable".to_string(),
                    message: Some(e.to_string()),
                }),
            )),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_healthz_returns_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
