//! Supervisor error taxonomy
//!
//! Command errors (`AlreadyActive`, `NoSuchSession`, `NotActive`,
//! `CaptureLaunchFailed`, `InvalidRequest`) are returned to the caller of
//! `start`/`stop`.
//! `DegradedRecording` and the two discard variants are never returned from a
//! command; they describe a session outcome and are surfaced through
//! `SessionStatus::notice`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{SessionId, SessionState};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("a recording session is already active: {0}")]
    AlreadyActive(SessionId),

    #[error("no such session: {0}")]
    NoSuchSession(SessionId),

    #[error("session {id} is not active (state: {state})")]
    NotActive { id: SessionId, state: SessionState },

    #[error("capture launch failed: {0}")]
    CaptureLaunchFailed(String),

    /// Session parameters out of range
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("recording is degraded: a monitored device dropped during capture")]
    DegradedRecording,

    #[error("recording discarded: capture produced no output")]
    DiscardedEmptyOutput,

    #[error("recording discarded: profile not settled")]
    DiscardedUnsettledProfile,

    #[error("supervisor is not running")]
    SupervisorGone,
}

impl SupervisorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyActive(_) => "ALREADY_ACTIVE",
            Self::NoSuchSession(_) => "NO_SUCH_SESSION",
            Self::NotActive { .. } => "NOT_ACTIVE",
            Self::CaptureLaunchFailed(_) => "CAPTURE_LAUNCH_FAILED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::DegradedRecording => "DEGRADED_RECORDING",
            Self::DiscardedEmptyOutput => "DISCARDED_EMPTY_OUTPUT",
            Self::DiscardedUnsettledProfile => "DISCARDED_UNSETTLED_PROFILE",
            Self::SupervisorGone => "SUPERVISOR_GONE",
        }
    }
}

/// Error body returned by the HTTP API and decoded by the CLI client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&SupervisorError> for ErrorResponse {
    fn from(error: &SupervisorError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
