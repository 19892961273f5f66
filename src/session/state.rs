use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque session token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(format!("session-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of a recording session
///
/// `Idle` is the supervisor having no current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    /// Start issued, capture not yet confirmed running
    Armed,
    /// Capture confirmed alive
    Recording,
    /// A monitored device dropped or switched profile; output is suspect
    Settling,
    /// Stop issued or capture exited, waiting for the final flush
    Stopped,
    /// Output kept
    Archived,
    /// Output dropped
    Discarded,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Archived | Self::Discarded)
    }

    /// Capture confirmed and not yet stopped
    pub fn is_capturing(self) -> bool {
        matches!(self, Self::Recording | Self::Settling)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Armed => "armed",
            Self::Recording => "recording",
            Self::Settling => "settling",
            Self::Stopped => "stopped",
            Self::Archived => "archived",
            Self::Discarded => "discarded",
        };
        f.write_str(s)
    }
}

/// Why a session's output was not kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscardReason {
    /// The Bluetooth headset connected before capture was confirmed
    #[serde(rename = "profile not settled")]
    ProfileNotSettled,
    #[serde(rename = "empty output")]
    EmptyOutput,
    #[serde(rename = "capture launch failed")]
    LaunchFailed,
    /// Stopped before capture was confirmed
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl DiscardReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProfileNotSettled => "profile not settled",
            Self::EmptyOutput => "empty output",
            Self::LaunchFailed => "capture launch failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to the output file of a discarded session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardPolicy {
    /// Keep it next to the output path with a `.discarded` suffix
    #[default]
    Rename,
    Delete,
}
