// Integration tests for the HTTP control API
//
// Requests go straight into the router with `tower::ServiceExt::oneshot`;
// the supervisor behind it runs a scripted capture that writes a small file.

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use cluck::capture::{CaptureBackend, CaptureExit, CaptureHandle};
use cluck::http::{StartRecordingRequest, StartRecordingResponse};
use cluck::{
    create_router, AppState, Config, ErrorResponse, Journal, SessionState, SessionStatus,
    Supervisor, SupervisorHandle, SupervisorSettings,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

struct InstantCapture;

#[async_trait]
impl CaptureBackend for InstantCapture {
    async fn launch(&self, output_path: &Path) -> Result<CaptureHandle> {
        tokio::fs::write(output_path, b"aac frames").await?;

        let (handle, mut controller) = CaptureHandle::new(1);
        tokio::spawn(async move {
            controller.confirm_alive(Utc::now());
            controller.stop_requested().await;
            controller.exited(CaptureExit {
                exit_code: Some(0),
                bytes_written: 10,
            });
        });
        Ok(handle)
    }

    fn name(&self) -> &str {
        "instant"
    }
}

fn app(temp_dir: &TempDir) -> (Router, SupervisorHandle) {
    let mut config = Config::default();
    config.capture.output_dir = temp_dir.path().display().to_string();
    config.devices.bluetooth_device = Some("AirPods Pro".to_string());

    let (supervisor, _task) = Supervisor::spawn(
        Arc::new(InstantCapture),
        SupervisorSettings::from(&config),
        Journal::disabled(),
    );
    let router = create_router(AppState::new(supervisor.clone(), config));
    (router, supervisor)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> Result<(StatusCode, Vec<u8>)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(serde_json::to_vec(&body)?))?,
        None => request.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, bytes.to_vec()))
}

fn parse<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

async fn start(app: &Router, output: &Path) -> Result<StartRecordingResponse> {
    let request = StartRecordingRequest {
        output_path: Some(output.to_path_buf()),
        ..Default::default()
    };
    let (status, body) = send(app, "POST", "/sessions/start", Some(serde_json::to_value(&request)?)).await?;
    assert_eq!(status, StatusCode::OK);
    parse(&body)
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (app, _supervisor) = app(&temp_dir);

    let (status, body) = send(&app, "GET", "/health", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
    Ok(())
}

#[tokio::test]
async fn test_start_stop_and_status() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (app, supervisor) = app(&temp_dir);
    let output = temp_dir.path().join("talk.m4a");

    let started = start(&app, &output).await?;
    assert_eq!(started.state, SessionState::Armed);
    assert_eq!(started.output_path, output);
    supervisor
        .wait_for_state(&started.session_id, SessionState::Recording)
        .await?;

    let (status, body) = send(&app, "GET", "/sessions/current", None).await?;
    assert_eq!(status, StatusCode::OK);
    let current: SessionStatus = parse(&body)?;
    assert_eq!(current.session_id, started.session_id);
    assert_eq!(current.state, SessionState::Recording);

    let stop_uri = format!("/sessions/{}/stop", started.session_id);
    let (status, body) = send(&app, "POST", &stop_uri, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse::<SessionStatus>(&body)?.state, SessionState::Stopped);

    supervisor.wait_until_finished(&started.session_id).await?;

    let status_uri = format!("/sessions/{}/status", started.session_id);
    let (status, body) = send(&app, "GET", &status_uri, None).await?;
    assert_eq!(status, StatusCode::OK);
    let finished: SessionStatus = parse(&body)?;
    assert_eq!(finished.state, SessionState::Archived);
    assert_eq!(finished.bytes_written, Some(10));

    let (status, body) = send(&app, "GET", "/sessions/current", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse::<ErrorResponse>(&body)?.code, "IDLE");

    // Stopping again conflicts
    let (status, body) = send(&app, "POST", &stop_uri, None).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(parse::<ErrorResponse>(&body)?.code, "NOT_ACTIVE");
    Ok(())
}

#[tokio::test]
async fn test_second_start_conflicts() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (app, _supervisor) = app(&temp_dir);

    start(&app, &temp_dir.path().join("first.m4a")).await?;

    let (status, body) = send(
        &app,
        "POST",
        "/sessions/start",
        Some(json!({ "output_path": temp_dir.path().join("second.m4a") })),
    )
    .await?;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(parse::<ErrorResponse>(&body)?.code, "ALREADY_ACTIVE");
    Ok(())
}

#[tokio::test]
async fn test_start_with_defaults_uses_configured_output_dir() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (app, _supervisor) = app(&temp_dir);

    let (status, body) = send(&app, "POST", "/sessions/start", Some(json!({}))).await?;

    assert_eq!(status, StatusCode::OK);
    let started: StartRecordingResponse = parse(&body)?;
    assert_eq!(started.output_path.parent(), Some(temp_dir.path()));
    let name = started.output_path.file_name().unwrap().to_string_lossy().into_owned();
    // One file per capture input, `{label}` filled in at launch
    assert!(name.starts_with("record-{label}-"), "unexpected name {}", name);
    assert!(name.ends_with(".m4a"));
    Ok(())
}

#[tokio::test]
async fn test_out_of_range_settling_window_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (app, _supervisor) = app(&temp_dir);
    let output = temp_dir.path().join("talk.m4a");

    for secs in [1e300, 1e15, -2.0] {
        let (status, body) = send(
            &app,
            "POST",
            "/sessions/start",
            Some(json!({ "output_path": output, "settling_window_secs": secs })),
        )
        .await?;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "settling_window_secs {}", secs);
        assert_eq!(parse::<ErrorResponse>(&body)?.code, "INVALID_REQUEST");
    }

    // Nothing was armed
    let (status, _) = send(&app, "GET", "/sessions/current", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let started = start(&app, &output).await?;
    assert_eq!(started.state, SessionState::Armed);
    Ok(())
}

#[tokio::test]
async fn test_start_into_directory_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (app, _supervisor) = app(&temp_dir);

    let (status, body) = send(
        &app,
        "POST",
        "/sessions/start",
        Some(json!({ "output_path": temp_dir.path() })),
    )
    .await?;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(parse::<ErrorResponse>(&body)?.code, "CAPTURE_LAUNCH_FAILED");
    Ok(())
}

#[tokio::test]
async fn test_unknown_session_is_not_found() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (app, _supervisor) = app(&temp_dir);

    let (status, body) = send(&app, "GET", "/sessions/session-nope/status", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse::<ErrorResponse>(&body)?.code, "NO_SUCH_SESSION");

    let (status, _) = send(&app, "POST", "/sessions/session-nope/stop", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_device_event_injection() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (app, supervisor) = app(&temp_dir);

    let started = start(&app, &temp_dir.path().join("talk.m4a")).await?;
    supervisor
        .wait_for_state(&started.session_id, SessionState::Recording)
        .await?;

    // No timestamp: stamped on arrival
    let (status, _) = send(
        &app,
        "POST",
        "/devices/events",
        Some(json!({ "device_id": "AirPods Pro", "kind": "profile_changed" })),
    )
    .await?;
    assert_eq!(status, StatusCode::ACCEPTED);

    let status = tokio::time::timeout(
        Duration::from_secs(5),
        supervisor.wait_for(&started.session_id, |s| s.degraded),
    )
    .await??;
    assert_eq!(status.state, SessionState::Settling);
    Ok(())
}
