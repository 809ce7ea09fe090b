use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Service banner with the available endpoints.
pub async fn index() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "service": "vectorize-runner",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "run": "POST /run",
                "health": "GET /health",
                "live": "GET /live"
            }
        })),
    )
}
