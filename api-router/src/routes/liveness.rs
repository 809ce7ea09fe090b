use axum::Json;
use serde_json::{json, Value};

/// Answers while the HTTP loop is up. Never touches tools, disk or job slots,
/// so a runner busy with a long job still reports live.
pub async fn live() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
