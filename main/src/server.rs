use std::sync::Arc;

use api_router::{api_state::ApiState, runner_routes};
use axum::Router;
use common::utils::{config::get_config, idle_guard::IdleGuard};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    // Get config; invalid settings stop the runner here
    let config = get_config()?;

    tokio::fs::create_dir_all(&config.work_dir).await?;
    tokio::fs::create_dir_all(&config.results_dir).await?;

    let idle_guard = Arc::new(IdleGuard::new(
        config.idle_timeout(),
        config.idle_check_interval(),
    ));
    let api_state = ApiState::new(&config, Arc::clone(&idle_guard))?;

    let services = api_state.pipeline.services();
    info!(
        work_dir = %config.work_dir.display(),
        results_dir = %config.results_dir.display(),
        upload_mode = ?config.result_upload_mode,
        max_concurrent_jobs = config.max_concurrent_jobs,
        busy_policy = ?config.busy_policy,
        waifu2x_available = services.upscaler_available(),
        vtracer_available = services.tracer_available(),
        "runner configured"
    );
    if !services.tracer_available() {
        warn!(
            vtracer_path = %config.vtracer_path.display(),
            "tracer binary not found; every job will fail until it is installed"
        );
    }

    // Create Axum router
    let app = Router::new()
        .merge(runner_routes(&api_state))
        .with_state(api_state);

    let _monitor = idle_guard.start();

    let serve_address = config.bind_address();
    info!("Starting runner listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(&serve_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&idle_guard)))
        .await?;

    info!("runner stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM and stops idle monitoring.
async fn shutdown_signal(idle_guard: Arc<IdleGuard>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown requested");
    idle_guard.stop();
}
