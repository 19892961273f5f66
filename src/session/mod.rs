//! Recording session state machine
//!
//! This module provides the `Session` abstraction that tracks:
//! - Lifecycle: armed, recording, settling, stopped, archived/discarded
//! - Device events ordered by timestamp, with duplicates collapsed
//! - The start-before-connect rule for the Bluetooth headset
//! - Degradation and the final keep/discard decision
//! - An append-only journal of transitions

mod config;
mod journal;
mod session;
mod state;
mod status;

pub use config::{
    settling_window_from_secs, SessionConfig, DEFAULT_SETTLING_WINDOW, MAX_SETTLING_WINDOW,
};
pub use journal::{Journal, JournalEntry, JournalRecord};
pub use session::{EventOutcome, Session, StopOutcome, Verdict};
pub use state::{DiscardPolicy, DiscardReason, SessionId, SessionState};
pub use status::SessionStatus;
