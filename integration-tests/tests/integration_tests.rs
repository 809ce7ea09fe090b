use std::{path::Path, sync::Arc, time::Duration};

use axum::http::StatusCode;
use common::utils::idle_guard::{IdleGuard, Terminator};
use serde_json::{json, Value};
use tokio::{sync::mpsc, time::Instant};

use test_utils::*;

#[tokio::test]
async fn test_color_job_produces_svg() {
    let runner = TestRunner::start(RunnerOptions::default()).await;

    let response = runner
        .server
        .post("/run")
        .authorization_bearer(TOKEN)
        .json(&json!({
            "input_url": runner.fixtures.url("/images/cat.png"),
            "mode": "color",
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "done");
    assert!(body["duration_ms"].is_u64());

    let job_id = body["job_id"].as_str().expect("job id");
    let local_path = body["output"]["local_path"].as_str().expect("local path");
    assert!(local_path.ends_with(".svg"));
    assert!(local_path.contains(job_id));
    assert!(Path::new(local_path).starts_with(runner.results_dir.path()));

    let svg = std::fs::read_to_string(local_path).expect("published svg");
    assert_eq!(svg, FAKE_SVG);
    assert_eq!(runner.workspace_count(), 0, "workspace removed after success");
}

#[tokio::test]
async fn test_unsupported_mode_is_bad_request() {
    let runner = TestRunner::start(RunnerOptions::default()).await;

    let response = runner
        .server
        .post("/run")
        .authorization_bearer(TOKEN)
        .json(&json!({
            "input_url": runner.fixtures.url("/images/cat.png"),
            "mode": "grayscale",
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["status"], "error");
    assert!(body["error"].as_str().is_some_and(|msg| msg.contains("mode")));
    assert_eq!(runner.workspace_count(), 0);
}

#[tokio::test]
async fn test_missing_authorization_is_unauthorized() {
    let runner = TestRunner::start(RunnerOptions::default()).await;

    let response = runner
        .server
        .post("/run")
        .json(&json!({
            "input_url": runner.fixtures.url("/images/cat.png"),
            "mode": "color",
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let response = runner
        .server
        .post("/run")
        .authorization_bearer("not-the-token")
        .json(&json!({
            "input_url": runner.fixtures.url("/images/cat.png"),
            "mode": "color",
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    assert!(!runner.jobs_dir().exists(), "no workspace is ever created");
    assert!(runner.captured_tracer_input().is_none());
}

#[tokio::test]
async fn test_absent_upscaler_falls_back_to_original_image() {
    let runner = TestRunner::start(RunnerOptions {
        upscaler: Upscaler::Absent,
        ..Default::default()
    })
    .await;

    let response = runner
        .server
        .post("/run")
        .authorization_bearer(TOKEN)
        .json(&json!({
            "input_url": runner.fixtures.url("/images/cat.png"),
            "mode": "bw",
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "done");

    let traced = runner
        .captured_tracer_input()
        .expect("tracer received an image");
    assert_eq!(traced, png_bytes(), "fallback copy is byte-identical");
    assert_eq!(runner.workspace_count(), 0);
}

#[tokio::test]
async fn test_tracer_failure_returns_error_and_cleans_up() {
    let runner = TestRunner::start(RunnerOptions {
        tracer: Tracer::Failing,
        ..Default::default()
    })
    .await;

    let response = runner
        .server
        .post("/run")
        .authorization_bearer(TOKEN)
        .json(&json!({
            "input_url": runner.fixtures.url("/images/cat.png"),
            "mode": "color",
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["status"], "error");
    assert!(body["job_id"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(body["error"]
        .as_str()
        .is_some_and(|msg| msg.contains("tracer crashed")));

    assert!(runner.jobs_dir().exists());
    assert_eq!(runner.workspace_count(), 0, "workspace destroyed on failure");
    assert_eq!(
        std::fs::read_dir(runner.results_dir.path())
            .expect("results dir")
            .count(),
        0,
        "nothing published"
    );
}

#[tokio::test]
async fn test_non_image_source_is_bad_request() {
    let runner = TestRunner::start(RunnerOptions::default()).await;

    let response = runner
        .server
        .post("/run")
        .authorization_bearer(TOKEN)
        .json(&json!({
            "input_url": runner.fixtures.url("/images/page.html"),
            "mode": "color",
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(runner.workspace_count(), 0);
}

#[tokio::test]
async fn test_signed_put_uploads_result() {
    let runner = TestRunner::start(RunnerOptions {
        delivery: Delivery::SignedPut,
        ..Default::default()
    })
    .await;

    let response = runner
        .server
        .post("/run")
        .authorization_bearer(TOKEN)
        .json(&json!({
            "input_url": runner.fixtures.url("/images/cat.png"),
            "mode": "color",
            "filename": "cat.png",
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    let job_id = body["job_id"].as_str().expect("job id");
    assert_eq!(
        body["output"]["uploaded_url"],
        runner.fixtures.url(&format!("/bucket/{job_id}.svg"))
    );

    let uploads = runner.fixtures.uploads.lock().expect("uploads lock");
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, format!("{job_id}.svg"));
    assert_eq!(uploads[0].1, "image/svg+xml");
    assert_eq!(uploads[0].2, FAKE_SVG.as_bytes());
    assert_eq!(runner.workspace_count(), 0);
}

#[tokio::test]
async fn test_health_reports_tools_and_workspace() {
    let runner = TestRunner::start(RunnerOptions {
        upscaler: Upscaler::Absent,
        ..Default::default()
    })
    .await;

    let response = runner.server.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["waifu2x_available"], false);
    assert_eq!(body["vtracer_available"], true);
    assert_eq!(body["work_dir_exists"], false, "created lazily by the first job");
    assert!(body["timestamp"].is_string());

    let response = runner.server.get("/live").await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_idle_guard_terminates_after_threshold() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let interval = Duration::from_millis(100);
    let terminator: Terminator = Arc::new(move |idle_for: Duration| {
        let _ = tx.send(idle_for);
    });
    let guard = Arc::new(
        IdleGuard::new(Some(Duration::from_secs(1)), interval).with_terminator(terminator),
    );

    let started = Instant::now();
    let _monitor = guard.start().expect("monitor started");

    let idle_for = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("terminated in time")
        .expect("terminator called");
    let elapsed = started.elapsed();

    assert!(idle_for >= Duration::from_secs(1));
    assert!(elapsed >= Duration::from_secs(1));
    assert!(
        elapsed <= Duration::from_secs(1) + interval + Duration::from_millis(250),
        "terminated within one interval of the threshold, took {elapsed:?}"
    );
}

#[tokio::test]
async fn test_accepted_requests_keep_runner_alive() {
    let runner = TestRunner::start(RunnerOptions::default()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let idle_before = runner.idle_guard.idle_for();

    let response = runner
        .server
        .post("/run")
        .authorization_bearer(TOKEN)
        .json(&json!({
            "input_url": runner.fixtures.url("/images/cat.png"),
            "mode": "color",
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    assert!(runner.idle_guard.idle_for() < idle_before);
}
