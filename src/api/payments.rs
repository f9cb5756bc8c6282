use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    response::Response,
};
use tracing::info;

use super::{reference_no, AppState};
use crate::error::AppResult;
use crate::middleware::error::success_response;

pub const SIGNATURE_HEADER: &str = "x-callback-signature";

/// POST /api/payments/callback
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    let update = state
        .callbacks
        .process(&body, content_type, signature)
        .await?;
    Ok(success_response(update))
}

/// POST /api/payments/{reference_no}/poll
pub async fn poll(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> AppResult<Response> {
    let reference_no = reference_no(&raw)?;
    info!(reference_no = %reference_no, "manual payment poll requested");
    let update = state.poller.poll_reference(reference_no).await?;
    Ok(success_response(update))
}

/// POST /api/payments/{reference_no}/reconcile
pub async fn reconcile(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> AppResult<Response> {
    let outcome = state.engine.reconcile(reference_no(&raw)?).await?;
    Ok(success_response(outcome))
}
