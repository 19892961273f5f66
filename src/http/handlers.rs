use super::state::AppState;
use crate::device::DeviceEvent;
use crate::error::{ErrorResponse, SupervisorError};
use crate::session::{settling_window_from_secs, SessionConfig, SessionId, SessionState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StartRecordingRequest {
    /// Output file (default: generated name in the configured output dir)
    pub output_path: Option<PathBuf>,

    /// Bluetooth headset to watch (default: from config)
    pub bluetooth_device: Option<String>,

    /// Aggregate / multi-output devices to watch (default: from config)
    pub virtual_devices: Option<Vec<String>>,

    /// Settling window in seconds, 0 to 3600 (default: from config)
    pub settling_window_secs: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartRecordingResponse {
    pub session_id: SessionId,
    pub state: SessionState,
    pub output_path: PathBuf,
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions/start
/// Arm a new recording session
pub async fn start_recording(
    State(state): State<AppState>,
    Json(req): Json<StartRecordingRequest>,
) -> Response {
    let mut config: SessionConfig = state.config.session_config();
    if let Some(path) = req.output_path {
        config.output_path = path;
    }
    if req.bluetooth_device.is_some() {
        config.bluetooth_device = req.bluetooth_device;
    }
    if let Some(devices) = req.virtual_devices {
        config.virtual_devices = devices;
    }
    if let Some(secs) = req.settling_window_secs {
        match settling_window_from_secs(secs) {
            Ok(window) => config.settling_window = window,
            Err(e) => return error_response(&e),
        }
    }

    let output_path = config.output_path.clone();
    info!("Starting recording -> {}", output_path.display());

    match state.supervisor.start(config).await {
        Ok(session_id) => (
            StatusCode::OK,
            Json(StartRecordingResponse {
                message: format!("Recording armed for session {}", session_id),
                session_id,
                state: SessionState::Armed,
                output_path,
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /sessions/:session_id/stop
/// Stop a recording; the final classification follows asynchronously
pub async fn stop_recording(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let id = SessionId::from(session_id);
    info!("Stopping recording for session: {}", id);

    match state.supervisor.stop(&id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /sessions/:session_id/status
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.supervisor.status(&SessionId::from(session_id)).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /sessions/current
pub async fn get_current_session(State(state): State<AppState>) -> Response {
    match state.supervisor.current().await {
        Ok(Some(status)) => (StatusCode::OK, Json(status)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                code: "IDLE".to_string(),
                message: "No active session".to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /devices/events
/// Push a device notification (timestamp defaults to now)
pub async fn post_device_event(
    State(state): State<AppState>,
    Json(event): Json<DeviceEvent>,
) -> Response {
    match state.supervisor.device_event(event) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

fn error_response(e: &SupervisorError) -> Response {
    let status = match e {
        SupervisorError::AlreadyActive(_) | SupervisorError::NotActive { .. } => StatusCode::CONFLICT,
        SupervisorError::NoSuchSession(_) => StatusCode::NOT_FOUND,
        SupervisorError::CaptureLaunchFailed(_) | SupervisorError::InvalidRequest(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SupervisorError::SupervisorGone => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!("Request failed: {}", e);
    }

    (status, Json(ErrorResponse::from(e))).into_response()
}
