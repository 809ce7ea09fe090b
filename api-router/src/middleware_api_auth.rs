use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{api_state::ApiState, error::ApiError};

/// Rejects the request before any job work starts unless it carries
/// `Authorization: Bearer <runner_shared_token>`.
pub async fn api_auth(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(&request).ok_or_else(|| {
        warn!(path = %request.uri().path(), "missing or malformed authorization header");
        ApiError::Unauthorized("Missing or invalid authorization header".to_string())
    })?;

    if !tokens_match(token, &state.config.runner_shared_token) {
        warn!(path = %request.uri().path(), "rejected request with invalid token");
        return Err(ApiError::Unauthorized("Invalid token".to_string()));
    }

    Ok(next.run(request).await)
}

fn extract_bearer_token(request: &Request) -> Option<&str> {
    let header = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty()).then_some(token)
}

/// Compares digests so the time taken does not depend on where the inputs differ.
fn tokens_match(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.trim().as_bytes());
    provided
        .iter()
        .zip(expected.iter())
        .fold(0_u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
