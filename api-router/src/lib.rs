use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use middleware_api_auth::api_auth;
use routes::{health::health, index::index, liveness::live, run::run_job};

pub mod api_state;
pub mod error;
mod middleware_api_auth;
mod routes;

/// Runner endpoints. Only `/run` requires the shared token.
pub fn runner_routes<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for probes)
    let public = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/live", get(live));

    let protected = Router::new()
        .route(
            "/run",
            post(run_job).layer(DefaultBodyLimit::max(
                app_state.config.request_max_body_bytes,
            )),
        )
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    public.merge(protected)
}
