use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::info;
use vectorize_pipeline::JobRequest;

use crate::{api_state::ApiState, error::ApiError};

/// Every field is optional so missing values surface as 400 with a readable
/// message instead of a bare deserialization rejection.
#[derive(Debug, Default, Deserialize)]
pub struct RunParams {
    pub input_url: Option<String>,
    pub mode: Option<String>,
    pub filename: Option<String>,
}

pub async fn run_job(
    State(state): State<ApiState>,
    payload: Result<Json<RunParams>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    // Authenticated requests count as activity even when the body is rejected.
    state.idle_guard.record_activity();

    let Json(params) =
        payload.map_err(|rejection| ApiError::ValidationError(rejection.body_text()))?;
    let request = JobRequest::parse(
        params.input_url.as_deref(),
        params.mode.as_deref(),
        params.filename,
    )?;

    info!(
        input_url = %request.source.url,
        mode = %request.mode,
        "job request received"
    );

    let report = state.pipeline.submit(request).await?;

    Ok((StatusCode::OK, Json(report)))
}
