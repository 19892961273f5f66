use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::state::{DiscardReason, SessionId, SessionState};
use crate::capture::CaptureTrack;
use crate::error::SupervisorError;

/// Snapshot of a recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: SessionId,

    pub state: SessionState,

    /// A monitored device dropped or switched profile during capture
    pub degraded: bool,

    pub discard_reason: Option<DiscardReason>,

    /// Launch error when the capture never came up
    pub launch_error: Option<String>,

    /// File the capture writes to, or the template for its tracks
    pub output_path: PathBuf,

    /// One file per capture input
    #[serde(default)]
    pub tracks: Vec<CaptureTrack>,

    /// Where the files ended up after finalize (archive or `.discarded`)
    #[serde(default)]
    pub final_paths: Vec<PathBuf>,

    /// When start was issued
    pub armed_at: DateTime<Utc>,

    /// When the capture was confirmed running
    pub started_at: Option<DateTime<Utc>>,

    pub stopped_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Recorded duration in seconds (confirmation to stop, or to now)
    pub duration_secs: f64,

    pub bytes_written: Option<u64>,

    pub exit_code: Option<i32>,
}

impl SessionStatus {
    /// Outcome worth telling the operator about, if any
    pub fn notice(&self) -> Option<SupervisorError> {
        match (self.state, self.discard_reason) {
            (SessionState::Discarded, Some(DiscardReason::ProfileNotSettled)) => {
                Some(SupervisorError::DiscardedUnsettledProfile)
            }
            (SessionState::Discarded, Some(DiscardReason::EmptyOutput)) => {
                Some(SupervisorError::DiscardedEmptyOutput)
            }
            (SessionState::Discarded, Some(DiscardReason::LaunchFailed)) => {
                Some(SupervisorError::CaptureLaunchFailed(
                    self.launch_error
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                ))
            }
            (SessionState::Discarded, _) => None,
            _ if self.degraded => Some(SupervisorError::DegradedRecording),
            _ => None,
        }
    }
}
