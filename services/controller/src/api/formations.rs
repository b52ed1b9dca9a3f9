//! Formation endpoint.

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use shoal_id::FormationType;
use shoal_reconcile::clamp_quantity;
use tracing::{error, info};

use super::error::ApiError;
use super::request_context::RequestContext;
use super::{decode_json, parse_app_id};
use crate::scheduler::{Formation, ReconcileError};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/formations/{formation_id}", post(put_formation))
}

#[derive(Debug, Deserialize)]
pub struct FormationRequest {
    #[serde(default)]
    pub quantity: i64,
    /// Defaults to the formation ID in the path.
    #[serde(rename = "type", default)]
    pub formation_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormationResponse {
    pub quantity: u32,
    #[serde(rename = "type")]
    pub formation_type: String,
}

async fn put_formation(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((app_id, formation_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<FormationResponse>, ApiError> {
    let request_id = ctx.request_id;
    let app = parse_app_id(&app_id, &request_id)?;
    let req: FormationRequest = decode_json(
        &body,
        "formation_update_failed",
        "Failed to update formation",
        &request_id,
    )?;

    let requested_type = req.formation_type.unwrap_or_else(|| formation_id.clone());
    if requested_type != formation_id {
        return Err(ApiError::bad_request(
            "formation_type_mismatch",
            format!("Formation type {requested_type:?} does not match path {formation_id:?}"),
        )
        .with_request_id(request_id));
    }
    let formation_type = FormationType::new(formation_id).map_err(|e| {
        ApiError::bad_request("invalid_formation_type", e.to_string()).with_request_id(request_id.clone())
    })?;

    let formation = Formation {
        formation_type,
        quantity: clamp_quantity(req.quantity),
    };

    let outcome = state
        .reconciler()
        .reconcile(&app, &formation)
        .await
        .map_err(|e| {
            if let ReconcileError::QuantityTooLarge { requested, max } = &e {
                return ApiError::bad_request(
                    "invalid_quantity",
                    format!("Quantity {requested} exceeds the maximum of {max}"),
                )
                .with_request_id(request_id.clone());
            }
            error!(
                error = %e,
                app_id = %app,
                formation_type = %formation.formation_type,
                request_id = %request_id,
                "Failed to reconcile formation"
            );
            ApiError::internal("formation_update_failed", "Failed to update formation")
                .with_request_id(request_id.clone())
        })?;

    info!(
        app_id = %app,
        formation_type = %formation.formation_type,
        quantity = formation.quantity,
        scheduled = outcome.scheduled.len(),
        stopped = outcome.stopped.len(),
        already_gone = outcome.already_gone.len(),
        request_id = %request_id,
        "Formation updated"
    );

    Ok(Json(FormationResponse {
        quantity: formation.quantity,
        formation_type: formation.formation_type.into_inner(),
    }))
}
