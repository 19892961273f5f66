//! HTTP API server for external control
//!
//! This module provides a REST API for controlling recording sessions:
//! - POST /sessions/start - Arm a new recording
//! - POST /sessions/:id/stop - Stop a recording
//! - GET /sessions/:id/status - Query session status
//! - GET /sessions/current - Status of the active session
//! - POST /devices/events - Push a device notification
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{StartRecordingRequest, StartRecordingResponse};
pub use routes::create_router;
pub use state::AppState;
