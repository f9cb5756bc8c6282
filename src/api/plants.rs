use axum::{
    extract::rejection::PathRejection,
    extract::{Path, State},
    response::Response,
};

use super::{path_id, AppState};
use crate::error::AppResult;
use crate::middleware::error::success_response;

/// GET /api/plants/{id}/growth
pub async fn growth_history(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> AppResult<Response> {
    let plant_id = path_id(path)?;
    let history = state.growth.history(plant_id).await?;
    Ok(success_response(history))
}
