//! Job endpoints.
//!
//! - `GET  /apps/{app_id}/jobs` lists an app's jobs
//! - `POST /apps/{app_id}/jobs` runs a one-shot job, optionally attached
//! - `GET  /apps/{app_id}/jobs/{job_id}/logs` streams a job's output

use std::collections::BTreeMap;

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hyper::upgrade::OnUpgrade;
use serde::{Deserialize, Serialize};
use shoal_id::JobId;
use tracing::{error, info, warn};

use super::error::ApiError;
use super::hijack;
use super::request_context::RequestContext;
use super::{decode_json, parse_app_id};
use crate::attach::StreamBridge;
use crate::cluster::HostError;
use crate::scheduler::{Launched, RunRequest};
use crate::state::AppState;

/// Largest accepted run request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs).post(run_job))
        .route("/jobs/{job_id}/logs", get(job_logs))
}

/// One entry of the job list.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
}

/// Body of a run request.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NewJobRequest {
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub attach: bool,
    pub tty: bool,
    pub tty_columns: u16,
    pub tty_lines: u16,
}

impl From<NewJobRequest> for RunRequest {
    fn from(req: NewJobRequest) -> Self {
        Self {
            cmd: req.cmd,
            env: req.env,
            attach: req.attach,
            tty: req.tty,
            tty_columns: req.tty_columns,
            tty_lines: req.tty_lines,
        }
    }
}

async fn list_jobs(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(app_id): Path<String>,
) -> Result<Json<Vec<JobSummary>>, ApiError> {
    let request_id = ctx.request_id;
    let app = parse_app_id(&app_id, &request_id)?;

    let hosts = state.scheduler().state().await.map_err(|e| {
        error!(error = %e, app_id = %app, request_id = %request_id, "Failed to read cluster state");
        ApiError::internal("list_jobs_failed", "Failed to list jobs").with_request_id(request_id.clone())
    })?;

    let jobs = hosts
        .app_jobs(&app)
        .map(|job| JobSummary {
            id: job.id.to_string(),
            job_type: job.id.kind().token().to_string(),
        })
        .collect();
    Ok(Json(jobs))
}

async fn run_job(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(app_id): Path<String>,
    mut request: Request,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id;
    let app = parse_app_id(&app_id, &request_id)?;

    let upgrade_requested = hijack::wants_attach_upgrade(request.headers());
    let on_upgrade = request.extensions_mut().remove::<OnUpgrade>();

    let body = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| {
            error!(error = %e, request_id = %request_id, "Failed to read run request body");
            ApiError::internal("run_failed", "Failed to run job").with_request_id(request_id.clone())
        })?;
    let new_job: NewJobRequest = decode_json(&body, "run_failed", "Failed to run job", &request_id)?;

    let on_upgrade = match (new_job.attach, upgrade_requested, on_upgrade) {
        (false, _, _) => None,
        (true, true, Some(on_upgrade)) => Some(on_upgrade),
        (true, _, _) => {
            return Err(ApiError::bad_request(
                "upgrade_required",
                format!("Attaching requires Connection: Upgrade and Upgrade: {}", hijack::ATTACH_PROTOCOL),
            )
            .with_request_id(request_id))
        }
    };

    let launched = state
        .launcher()
        .launch(&app, &new_job.into())
        .await
        .map_err(|e| {
            error!(error = %e, app_id = %app, request_id = %request_id, "Failed to run job");
            ApiError::internal("run_failed", "Failed to run job").with_request_id(request_id.clone())
        })?;

    match (launched, on_upgrade) {
        (Launched::Attached { job_id, host, session, pipe }, Some(on_upgrade)) => {
            info!(job_id = %job_id, host_id = %host, request_id = %request_id, "Hijacking connection for attach");
            let bridge = StreamBridge::new(session, pipe);
            tokio::spawn(hijack::serve_attached(on_upgrade, bridge, job_id, request_id));
            Ok(hijack::switching_protocols())
        }
        (Launched::Attached { job_id, session, .. }, None) => {
            // Unreachable while launch honours the attach flag.
            warn!(job_id = %job_id, "Attached launch without an upgradable connection");
            session.close().await;
            Err(ApiError::internal("run_failed", "Failed to run job").with_request_id(request_id))
        }
        (Launched::Detached { job_id, host }, _) => {
            info!(job_id = %job_id, host_id = %host, request_id = %request_id, "Job started");
            Ok(StatusCode::OK.into_response())
        }
    }
}

async fn job_logs(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((app_id, job_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id;
    let app = parse_app_id(&app_id, &request_id)?;

    let not_found = || {
        ApiError::not_found("job_not_found", format!("Job {job_id} not found"))
            .with_request_id(request_id.clone())
    };

    let id = match JobId::parse(&job_id) {
        Ok(id) if id.app() == &app => id,
        _ => return Err(not_found()),
    };

    let hosts = state.scheduler().state().await.map_err(|e| {
        error!(error = %e, job_id = %id, request_id = %request_id, "Failed to read cluster state");
        ApiError::internal("job_logs_failed", "Failed to fetch job logs").with_request_id(request_id.clone())
    })?;
    let Some((host, _)) = hosts.find_job(&id) else {
        return Err(not_found());
    };

    match state.runtime().job_logs(host, &id).await {
        Ok(stream) => {
            let mut response = Body::from_stream(stream).into_response();
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            Ok(response)
        }
        Err(HostError::Unsupported { operation }) => Err(ApiError::not_implemented(
            "not_implemented",
            format!("Fetching {operation} is not implemented"),
        )
        .with_request_id(request_id.clone())),
        Err(HostError::NotFound { .. }) => Err(not_found()),
        Err(e) => {
            error!(error = %e, job_id = %id, host_id = %host, request_id = %request_id, "Failed to fetch job logs");
            Err(ApiError::internal("job_logs_failed", "Failed to fetch job logs").with_request_id(request_id))
        }
    }
}
