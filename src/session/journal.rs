use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::state::{DiscardReason, SessionId, SessionState};
use crate::device::DeviceEventKind;

/// One line of the session journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    #[serde(flatten)]
    pub record: JournalRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalRecord {
    Transition {
        from: SessionState,
        to: SessionState,
    },
    Device {
        device_id: String,
        kind: DeviceEventKind,
        observed_at: DateTime<Utc>,
    },
    Degraded,
    Classified {
        state: SessionState,
        degraded: bool,
        discard_reason: Option<DiscardReason>,
        final_paths: Vec<PathBuf>,
        bytes_written: Option<u64>,
    },
}

/// Append-only JSON-lines audit log of session transitions
///
/// Journal failures are logged and never interrupt a recording.
pub struct Journal {
    file: Option<File>,
}

impl Journal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create journal directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open session journal {}", path.display()))?;

        Ok(Self { file: Some(file) })
    }

    pub fn disabled() -> Self {
        Self { file: None }
    }

    pub fn record(&mut self, session_id: &SessionId, record: JournalRecord) {
        let Some(file) = &mut self.file else {
            return;
        };

        let entry = JournalEntry {
            timestamp: Utc::now(),
            session_id: session_id.clone(),
            record,
        };

        let result = serde_json::to_string(&entry)
            .map_err(anyhow::Error::from)
            .and_then(|line| writeln!(file, "{}", line).map_err(anyhow::Error::from));

        if let Err(e) = result {
            warn!("Failed to append to session journal: {}", e);
        }
    }

    /// Read every entry back, skipping malformed lines
    pub fn read(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>> {
        let file = File::open(path.as_ref()).context("Failed to open session journal")?;

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.context("Failed to read session journal")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping malformed journal line: {}", e),
            }
        }

        Ok(entries)
    }
}
