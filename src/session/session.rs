use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::state::{DiscardReason, SessionId, SessionState};
use super::status::SessionStatus;
use crate::capture::{CaptureExit, CaptureTrack};
use crate::device::{DeviceEvent, DeviceEventKind, MonitoredDevices};
use crate::error::{SupervisorError, SupervisorResult};

/// What `apply_event` did with a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Applied,
    /// Same device, kind and timestamp as an event already in the log
    Duplicate,
    /// Unmonitored device, stale timestamp, or session already classified
    Ignored,
}

/// What `stop` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Stopped before capture was confirmed: discarded on the spot
    Cancelled,
    /// Capture has to be terminated; finalize follows its exit
    Stopping,
}

/// Final classification of a stopped session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Archive,
    Discard(DiscardReason),
}

#[derive(Debug, Clone)]
struct LoggedEvent {
    arrival: u64,
    event: DeviceEvent,
}

/// One recording attempt and its state machine
///
/// Device events are kept ordered by `(timestamp, arrival)` and every
/// device-derived property (unsettled profile, degraded, settling) is
/// recomputed from the whole log, so late deliveries land where their
/// timestamp puts them.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    monitored: MonitoredDevices,
    state: SessionState,

    armed_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,

    degraded: bool,
    discard_reason: Option<DiscardReason>,
    launch_error: Option<String>,
    exit: Option<CaptureExit>,
    tracks: Vec<CaptureTrack>,
    verdict: Option<Verdict>,
    final_paths: Vec<PathBuf>,

    events: Vec<LoggedEvent>,
    next_arrival: u64,
}

impl Session {
    /// `Idle --start--> Armed`
    pub fn arm(id: SessionId, config: SessionConfig, now: DateTime<Utc>) -> Self {
        info!("Session {} armed -> {}", id, config.output_path.display());

        Self {
            monitored: config.monitored(),
            id,
            config,
            state: SessionState::Armed,
            armed_at: now,
            confirmed_at: None,
            stopped_at: None,
            finished_at: None,
            degraded: false,
            discard_reason: None,
            launch_error: None,
            exit: None,
            tracks: Vec::new(),
            verdict: None,
            final_paths: Vec::new(),
            events: Vec::new(),
            next_arrival: 0,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn discard_reason(&self) -> Option<DiscardReason> {
        self.discard_reason
    }

    pub fn exit(&self) -> Option<CaptureExit> {
        self.exit
    }

    /// Files the launched capture writes to
    pub fn capture_launched(&mut self, tracks: Vec<CaptureTrack>) {
        for track in &tracks {
            debug!("Session {}: {} -> {}", self.id, track.label, track.path.display());
        }
        self.tracks = tracks;
    }

    /// Every file this session may have written: one per capture track, or
    /// the configured output path when the capture reported none
    pub fn track_paths(&self) -> Vec<PathBuf> {
        if self.tracks.is_empty() {
            return vec![self.config.output_path.clone()];
        }
        self.tracks.iter().map(|t| t.path.clone()).collect()
    }

    /// `Armed --capture_confirmed--> Recording`
    pub fn capture_confirmed(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) {
        if self.state != SessionState::Armed {
            debug!("Session {}: confirmation in state {} ignored", self.id, self.state);
            return;
        }

        info!("Session {} recording (confirmed at {})", self.id, at);
        self.confirmed_at = Some(at);
        self.state = SessionState::Recording;
        self.reevaluate(now);
    }

    /// `Armed --capture_failed--> Discarded`
    pub fn capture_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        if self.state != SessionState::Armed {
            return;
        }

        let error = error.into();
        warn!("Session {}: capture launch failed: {}", self.id, error);
        self.launch_error = Some(error);
        self.discard_reason = Some(DiscardReason::LaunchFailed);
        self.state = SessionState::Discarded;
        self.finished_at = Some(now);
    }

    /// Feed a device notification into the session
    pub fn apply_event(&mut self, event: DeviceEvent, now: DateTime<Utc>) -> EventOutcome {
        if self.state.is_terminal() || self.verdict.is_some() {
            return EventOutcome::Ignored;
        }
        if !self.monitored.is_monitored(&event.device_id) {
            debug!("Ignoring event for unmonitored device {}", event.device_id);
            return EventOutcome::Ignored;
        }
        if event.timestamp < self.armed_at {
            debug!(
                "Ignoring {} {} from before the session was armed",
                event.device_id, event.kind
            );
            return EventOutcome::Ignored;
        }
        if self.events.iter().any(|e| e.event.key() == event.key()) {
            debug!("Duplicate event {} {} collapsed", event.device_id, event.kind);
            return EventOutcome::Duplicate;
        }

        // After every event with the same or an earlier timestamp: equal
        // timestamps keep arrival order.
        let pos = self
            .events
            .partition_point(|e| e.event.timestamp <= event.timestamp);
        info!("Session {}: device {} {} at {}", self.id, event.device_id, event.kind, event.timestamp);
        self.events.insert(
            pos,
            LoggedEvent {
                arrival: self.next_arrival,
                event,
            },
        );
        self.next_arrival += 1;

        self.reevaluate(now);
        EventOutcome::Applied
    }

    /// Re-check the settling window at `now`
    pub fn tick(&mut self, now: DateTime<Utc>) {
        self.reevaluate(now);
    }

    /// Earliest instant at which an open disruption expires
    pub fn settle_deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.state != SessionState::Settling {
            return None;
        }
        self.open_disruptions()
            .into_values()
            .filter_map(|at| self.expires_at(at))
            .filter(|deadline| *deadline > now)
            .min()
    }

    /// `Armed --stop--> Discarded` or `Recording|Settling --stop--> Stopped`
    pub fn stop(&mut self, now: DateTime<Utc>) -> SupervisorResult<StopOutcome> {
        match self.state {
            SessionState::Armed => {
                info!("Session {} cancelled before capture was confirmed", self.id);
                self.discard_reason = Some(DiscardReason::Cancelled);
                self.state = SessionState::Discarded;
                self.stopped_at = Some(now);
                self.finished_at = Some(now);
                Ok(StopOutcome::Cancelled)
            }
            SessionState::Recording | SessionState::Settling => {
                info!("Session {} stopping", self.id);
                self.state = SessionState::Stopped;
                self.stopped_at = Some(now);
                Ok(StopOutcome::Stopping)
            }
            state => Err(SupervisorError::NotActive {
                id: self.id.clone(),
                state,
            }),
        }
    }

    /// The capture process exited. Returns true when the session is ready to
    /// be finalized.
    pub fn capture_exited(&mut self, exit: CaptureExit, now: DateTime<Utc>) -> bool {
        match self.state {
            SessionState::Armed => {
                self.exit = Some(exit);
                self.capture_failed(
                    format!("capture exited before confirmation (code {:?})", exit.exit_code),
                    now,
                );
                false
            }
            SessionState::Recording | SessionState::Settling => {
                warn!(
                    "Session {}: capture exited unexpectedly (code {:?}, {} bytes)",
                    self.id, exit.exit_code, exit.bytes_written
                );
                self.exit = Some(exit);
                self.state = SessionState::Stopped;
                self.stopped_at = Some(now);
                true
            }
            SessionState::Stopped => {
                self.exit = Some(exit);
                true
            }
            _ => false,
        }
    }

    /// `Stopped --finalize-->` decision as things stand now
    pub fn verdict(&self) -> Verdict {
        if let Some(verdict) = self.verdict {
            return verdict;
        }
        if let Some(reason) = self.discard_reason {
            return Verdict::Discard(reason);
        }
        match self.exit {
            Some(exit) if exit.bytes_written > 0 => Verdict::Archive,
            _ => Verdict::Discard(DiscardReason::EmptyOutput),
        }
    }

    /// Fix the verdict for finalize. Device events arriving afterwards are
    /// ignored.
    pub fn take_verdict(&mut self) -> Verdict {
        let verdict = self.verdict();
        self.verdict = Some(verdict);
        verdict
    }

    /// Record the finalize result and enter the terminal state
    pub fn finish(&mut self, verdict: Verdict, final_paths: Vec<PathBuf>, now: DateTime<Utc>) {
        self.state = match verdict {
            Verdict::Archive => {
                self.discard_reason = None;
                SessionState::Archived
            }
            Verdict::Discard(reason) => {
                self.discard_reason = Some(reason);
                SessionState::Discarded
            }
        };
        self.verdict = Some(verdict);
        self.final_paths = final_paths;
        self.finished_at = Some(now);

        info!(
            "Session {} {} (degraded={}, reason={:?})",
            self.id, self.state, self.degraded, self.discard_reason
        );
    }

    pub fn status(&self) -> SessionStatus {
        let end = self.stopped_at.or(self.finished_at).unwrap_or_else(Utc::now);
        let duration_secs = self
            .confirmed_at
            .map(|start| (end - start).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStatus {
            session_id: self.id.clone(),
            state: self.state,
            degraded: self.degraded,
            discard_reason: self.discard_reason,
            launch_error: self.launch_error.clone(),
            output_path: self.config.output_path.clone(),
            tracks: self.tracks.clone(),
            final_paths: self.final_paths.clone(),
            armed_at: self.armed_at,
            started_at: self.confirmed_at,
            stopped_at: self.stopped_at,
            finished_at: self.finished_at,
            duration_secs,
            bytes_written: self.exit.map(|e| e.bytes_written),
            exit_code: self.exit.and_then(|e| e.exit_code),
        }
    }

    /// When a disruption at `at` stops counting as settling. `None` when the
    /// window does not fit a timestamp: such a disruption never expires.
    fn expires_at(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let window = ChronoDuration::from_std(self.config.settling_window).ok()?;
        at.checked_add_signed(window)
    }

    fn reevaluate(&mut self, now: DateTime<Utc>) {
        if self.profile_unsettled() && self.discard_reason.is_none() {
            warn!(
                "Session {}: Bluetooth device connected before capture was confirmed, \
                 recording will be discarded",
                self.id
            );
            self.discard_reason = Some(DiscardReason::ProfileNotSettled);
        }

        let Some(confirmed_at) = self.confirmed_at else {
            return;
        };

        let disrupted = self.events.iter().any(|e| {
            e.event.timestamp >= confirmed_at && e.event.kind != DeviceEventKind::Connected
        });
        if disrupted && !self.degraded {
            warn!("Session {} degraded: monitored device disrupted during capture", self.id);
            self.degraded = true;
        }

        if !self.state.is_capturing() {
            return;
        }

        let settling = self
            .open_disruptions()
            .values()
            .any(|at| self.expires_at(*at).map_or(true, |deadline| deadline > now));

        let next = if settling {
            SessionState::Settling
        } else {
            SessionState::Recording
        };
        if next != self.state {
            info!("Session {}: {} -> {}", self.id, self.state, next);
            self.state = next;
        }
    }

    /// A Connected event for the Bluetooth device timestamped before the
    /// capture was confirmed (or while it is still unconfirmed)
    fn profile_unsettled(&self) -> bool {
        self.events.iter().any(|e| {
            e.event.kind == DeviceEventKind::Connected
                && self.monitored.is_bluetooth(&e.event.device_id)
                && self.confirmed_at.map_or(true, |c| e.event.timestamp < c)
        })
    }

    /// Devices whose latest post-confirmation event is a disruption, mapped
    /// to the time of that disruption
    fn open_disruptions(&self) -> HashMap<&str, DateTime<Utc>> {
        let mut open = HashMap::new();
        let Some(confirmed_at) = self.confirmed_at else {
            return open;
        };

        for logged in &self.events {
            let event = &logged.event;
            if event.timestamp < confirmed_at {
                continue;
            }
            match event.kind {
                DeviceEventKind::Connected => {
                    open.remove(event.device_id.as_str());
                }
                DeviceEventKind::Disconnected | DeviceEventKind::ProfileChanged => {
                    open.insert(event.device_id.as_str(), event.timestamp);
                }
            }
        }

        open
    }

    /// Logged events in timestamp order, with their arrival sequence numbers
    pub fn event_log(&self) -> impl Iterator<Item = (u64, &DeviceEvent)> {
        self.events.iter().map(|e| (e.arrival, &e.event))
    }
}
