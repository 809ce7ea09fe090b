use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use common::utils::idle_guard::IdleState;
use serde_json::{json, Value};

use crate::api_state::ApiState;

/// Health probe: tool reachability, workspace root and idle status. Always 200
/// while the process can answer; callers inspect the fields.
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let work_dir = &state.pipeline.settings().work_dir;
    let work_dir_exists = tokio::fs::metadata(work_dir)
        .await
        .is_ok_and(|meta| meta.is_dir());
    let services = state.pipeline.services();

    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "timestamp": Utc::now().to_rfc3339(),
            "waifu2x_available": services.upscaler_available(),
            "vtracer_available": services.tracer_available(),
            "work_dir": work_dir.display().to_string(),
            "work_dir_exists": work_dir_exists,
            "max_concurrent_jobs": state.pipeline.settings().max_concurrent_jobs,
            "available_job_slots": state.pipeline.available_slots(),
            "idle": idle_status(state.idle_guard.state()),
        })),
    )
}

fn idle_status(state: IdleState) -> Value {
    match state {
        IdleState::Disabled => json!({ "enabled": false }),
        IdleState::Active { remaining } => json!({
            "enabled": true,
            "idle": false,
            "remaining_secs": remaining.as_secs(),
        }),
        IdleState::Idle { idle_for } => json!({
            "enabled": true,
            "idle": true,
            "idle_secs": idle_for.as_secs(),
        }),
    }
}
