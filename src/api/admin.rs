use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    extract::{Path, State},
    response::Response,
    Json,
};
use serde::Deserialize;

use super::{json_body, path_id, AppState};
use crate::database::adoption_repository::AdoptionOverride;
use crate::error::AppResult;
use crate::middleware::error::success_response;
use crate::services::growth::GrowthMeasurement;

#[derive(Debug, Deserialize)]
pub struct IntervalRequest {
    pub interval_minutes: u64,
}

/// POST /api/admin/payments/poll
pub async fn poll_now(State(state): State<AppState>) -> AppResult<Response> {
    let summary = state.poller.poll_pending().await?;
    Ok(success_response(summary))
}

/// GET /api/admin/scheduler
pub async fn scheduler_status(State(state): State<AppState>) -> AppResult<Response> {
    Ok(success_response(state.scheduler.status().await))
}

/// POST /api/admin/scheduler/start
pub async fn scheduler_start(State(state): State<AppState>) -> AppResult<Response> {
    Ok(success_response(state.scheduler.start().await))
}

/// POST /api/admin/scheduler/stop
pub async fn scheduler_stop(State(state): State<AppState>) -> AppResult<Response> {
    Ok(success_response(state.scheduler.stop().await))
}

/// PUT /api/admin/scheduler/interval
pub async fn scheduler_interval(
    State(state): State<AppState>,
    body: Result<Json<IntervalRequest>, JsonRejection>,
) -> AppResult<Response> {
    let request = json_body(body)?;
    let status = state.scheduler.reconfigure(request.interval_minutes).await?;
    Ok(success_response(status))
}

/// POST /api/admin/backfill/denormalized
pub async fn backfill_denormalized(State(state): State<AppState>) -> AppResult<Response> {
    Ok(success_response(state.backfill.repair_denormalized().await?))
}

/// POST /api/admin/backfill/plants
pub async fn backfill_plants(State(state): State<AppState>) -> AppResult<Response> {
    Ok(success_response(state.backfill.repair_missing_plants().await?))
}

/// GET /api/admin/backfill/orphans
pub async fn list_orphans(State(state): State<AppState>) -> AppResult<Response> {
    let orphans = state.backfill.find_orphaned_payments().await?;
    Ok(success_response(serde_json::json!({
        "count": orphans.len(),
        "payments": orphans,
    })))
}

/// POST /api/admin/backfill/orphans
pub async fn reconcile_orphans(State(state): State<AppState>) -> AppResult<Response> {
    Ok(success_response(state.backfill.reconcile_orphans().await?))
}

/// POST /api/admin/backfill/sweep
pub async fn full_sweep(State(state): State<AppState>) -> AppResult<Response> {
    Ok(success_response(state.backfill.run_full_sweep().await?))
}

/// GET /api/admin/diagnostics
pub async fn diagnostics(State(state): State<AppState>) -> AppResult<Response> {
    let reconciliation = state.backfill.diagnostics().await?;
    let scheduler = state.scheduler.status().await;
    Ok(success_response(serde_json::json!({
        "reconciliation": reconciliation,
        "scheduler": scheduler,
    })))
}

/// PATCH /api/admin/adoptions/{id}
pub async fn update_adoption(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<AdoptionOverride>, JsonRejection>,
) -> AppResult<Response> {
    let adoption_id = path_id(path)?;
    let changes = json_body(body)?;
    let updated = state.adoption_admin.apply_override(adoption_id, changes).await?;
    Ok(success_response(updated))
}

/// POST /api/admin/plants/{id}/growth
pub async fn record_growth(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<GrowthMeasurement>, JsonRejection>,
) -> AppResult<Response> {
    let plant_id = path_id(path)?;
    let measurement = json_body(body)?;
    let entry = state.growth.record(plant_id, measurement).await?;
    Ok(success_response(entry))
}
