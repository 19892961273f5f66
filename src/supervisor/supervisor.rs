use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::finalize;
use super::handle::SupervisorHandle;
use crate::capture::{CaptureBackend, CaptureHandle, CaptureSignal};
use crate::config::Config;
use crate::device::DeviceEvent;
use crate::error::{SupervisorError, SupervisorResult};
use crate::session::{
    DiscardPolicy, EventOutcome, Journal, JournalRecord, Session, SessionConfig, SessionId,
    SessionState, SessionStatus, StopOutcome, Verdict,
};

/// Finalize behaviour and bookkeeping limits
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Archived output is moved here; left in place when unset
    pub archive_dir: Option<PathBuf>,
    pub discard_policy: DiscardPolicy,
    /// Finished sessions remembered for status queries, oldest dropped first
    pub history_limit: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            archive_dir: None,
            discard_policy: DiscardPolicy::default(),
            history_limit: 100,
        }
    }
}

impl From<&Config> for SupervisorSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            archive_dir: cfg.archive_dir(),
            discard_policy: cfg.supervisor.discard_policy,
            history_limit: cfg.supervisor.history_limit,
        }
    }
}

/// Everything the sequencing task reacts to, in one ordered queue
pub(crate) enum Input {
    Start {
        config: SessionConfig,
        reply: oneshot::Sender<SupervisorResult<SessionId>>,
    },
    Stop {
        id: SessionId,
        reply: oneshot::Sender<SupervisorResult<SessionStatus>>,
    },
    Status {
        id: SessionId,
        reply: oneshot::Sender<SupervisorResult<SessionStatus>>,
    },
    Current {
        reply: oneshot::Sender<Option<SessionStatus>>,
    },
    Device(DeviceEvent),
    Launched {
        id: SessionId,
        result: Result<CaptureHandle, String>,
    },
    Capture {
        id: SessionId,
        signal: CaptureSignal,
    },
    Finalized {
        id: SessionId,
        verdict: Verdict,
        final_paths: Vec<PathBuf>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Recording supervisor
///
/// A single task owns the current session and processes operator commands,
/// device events and capture signals from one queue, so session state is
/// never shared. Launch, terminate and finalize I/O run in spawned tasks
/// whose results come back through the same queue.
pub struct Supervisor {
    backend: Arc<dyn CaptureBackend>,
    settings: SupervisorSettings,
    journal: Journal,

    // Weak so the task ends once every SupervisorHandle is dropped
    tx: mpsc::WeakUnboundedSender<Input>,
    rx: mpsc::UnboundedReceiver<Input>,
    status_tx: broadcast::Sender<SessionStatus>,

    current: Option<Session>,
    capture: Option<CaptureHandle>,
    last_seen: Option<(SessionState, bool)>,
    history: HashMap<SessionId, SessionStatus>,
    history_order: VecDeque<SessionId>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Supervisor {
    /// Spawn the sequencing task
    pub fn spawn(
        backend: Arc<dyn CaptureBackend>,
        settings: SupervisorSettings,
        journal: Journal,
    ) -> (SupervisorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, _) = broadcast::channel(64);

        info!("Starting recording supervisor (capture backend: {})", backend.name());

        let supervisor = Self {
            backend,
            settings,
            journal,
            tx: tx.downgrade(),
            rx,
            status_tx: status_tx.clone(),
            current: None,
            capture: None,
            last_seen: None,
            history: HashMap::new(),
            history_order: VecDeque::new(),
            shutdown: None,
        };

        let task = tokio::spawn(supervisor.run());
        (SupervisorHandle::new(tx, status_tx), task)
    }

    async fn run(mut self) {
        loop {
            let settle_wait = self.settle_wait();

            tokio::select! {
                input = self.rx.recv() => {
                    let Some(input) = input else { break };
                    self.handle_input(input).await;
                }
                _ = tokio::time::sleep(settle_wait.unwrap_or_default()), if settle_wait.is_some() => {
                    if let Some(session) = &mut self.current {
                        session.tick(Utc::now());
                    }
                }
            }

            self.publish_changes();

            if self.shutdown.is_some() && self.current.is_none() {
                break;
            }
        }

        if let Some(reply) = self.shutdown.take() {
            let _ = reply.send(());
        }
        info!("Recording supervisor stopped");
    }

    fn sender(&self) -> SupervisorResult<mpsc::UnboundedSender<Input>> {
        self.tx.upgrade().ok_or(SupervisorError::SupervisorGone)
    }

    /// Time until the earliest settling deadline of the current session
    fn settle_wait(&self) -> Option<Duration> {
        let now = Utc::now();
        let deadline = self.current.as_ref()?.settle_deadline(now)?;
        Some((deadline - now).to_std().unwrap_or_default())
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::Start { config, reply } => {
                let _ = reply.send(self.start(config));
            }
            Input::Stop { id, reply } => {
                let _ = reply.send(self.stop(&id).await);
            }
            Input::Status { id, reply } => {
                let _ = reply.send(self.status(&id));
            }
            Input::Current { reply } => {
                let _ = reply.send(self.current.as_ref().map(Session::status));
            }
            Input::Device(event) => self.device_event(event),
            Input::Launched { id, result } => self.launched(id, result).await,
            Input::Capture { id, signal } => self.capture_signal(id, signal),
            Input::Finalized {
                id,
                verdict,
                final_paths,
            } => self.finalized(id, verdict, final_paths),
            Input::Shutdown { reply } => self.begin_shutdown(reply).await,
        }
    }

    fn start(&mut self, config: SessionConfig) -> SupervisorResult<SessionId> {
        if self.shutdown.is_some() {
            return Err(SupervisorError::SupervisorGone);
        }
        if let Some(active) = &self.current {
            warn!("Start rejected: session {} is {}", active.id(), active.state());
            return Err(SupervisorError::AlreadyActive(active.id().clone()));
        }
        config.validate()?;

        let path = &config.output_path;
        if path.file_name().is_none() || path.is_dir() {
            return Err(SupervisorError::CaptureLaunchFailed(format!(
                "output path is not a file: {}",
                path.display()
            )));
        }

        let tx = self.sender()?;
        let id = SessionId::generate();
        let session = Session::arm(id.clone(), config, Utc::now());
        let output_path = session.config().output_path.clone();
        self.current = Some(session);
        self.publish_changes();

        let backend = Arc::clone(&self.backend);
        let launch_id = id.clone();
        tokio::spawn(async move {
            let result = backend
                .launch(&output_path)
                .await
                .map_err(|e| format!("{:#}", e));
            let _ = tx.send(Input::Launched {
                id: launch_id,
                result,
            });
        });

        Ok(id)
    }

    async fn stop(&mut self, id: &SessionId) -> SupervisorResult<SessionStatus> {
        let Some(session) = self.current.as_mut().filter(|s| s.id() == id) else {
            return match self.history.get(id) {
                Some(status) => Err(SupervisorError::NotActive {
                    id: id.clone(),
                    state: status.state,
                }),
                None => Err(SupervisorError::NoSuchSession(id.clone())),
            };
        };

        match session.stop(Utc::now())? {
            StopOutcome::Cancelled => {
                let status = session.status();
                // A capture that already launched is torn down; one still
                // launching is torn down when its handle arrives.
                if let Some(handle) = self.capture.take() {
                    self.cleanup_orphan(handle, Some(status.output_path.clone()));
                }
                Ok(self.finish_current().unwrap_or(status))
            }
            StopOutcome::Stopping => {
                let status = session.status();
                match &self.capture {
                    Some(handle) => {
                        if let Err(e) = self.backend.terminate(handle).await {
                            error!("Failed to terminate capture for {}: {:#}", id, e);
                        }
                    }
                    None => warn!("Session {} has no capture handle to terminate", id),
                }
                Ok(status)
            }
        }
    }

    fn status(&self, id: &SessionId) -> SupervisorResult<SessionStatus> {
        if let Some(session) = self.current.as_ref().filter(|s| s.id() == id) {
            return Ok(session.status());
        }
        self.history
            .get(id)
            .cloned()
            .ok_or_else(|| SupervisorError::NoSuchSession(id.clone()))
    }

    fn device_event(&mut self, event: DeviceEvent) {
        let Some(session) = &mut self.current else {
            debug!("No active session, dropping {} {}", event.device_id, event.kind);
            return;
        };

        let record = JournalRecord::Device {
            device_id: event.device_id.clone(),
            kind: event.kind,
            observed_at: event.timestamp,
        };

        if session.apply_event(event, Utc::now()) == EventOutcome::Applied {
            self.journal.record(session.id(), record);
        }
    }

    async fn launched(&mut self, id: SessionId, result: Result<CaptureHandle, String>) {
        let is_current = self
            .current
            .as_ref()
            .is_some_and(|s| s.id() == &id && s.state() == SessionState::Armed);

        match result {
            Ok(handle) if !is_current => {
                info!("Capture for {} launched after the session ended, terminating", id);
                let output_path = self.history.get(&id).map(|s| s.output_path.clone());
                self.cleanup_orphan(handle, output_path);
            }
            Ok(mut handle) => {
                info!("Capture for {} launched (pid {})", id, handle.pid_or_handle());
                if let Some(session) = &mut self.current {
                    session.capture_launched(handle.tracks().to_vec());
                }
                if let (Some(mut signals), Ok(tx)) = (handle.take_signals(), self.sender()) {
                    let signal_id = id.clone();
                    tokio::spawn(async move {
                        while let Some(signal) = signals.recv().await {
                            let id = signal_id.clone();
                            if tx.send(Input::Capture { id, signal }).is_err() {
                                break;
                            }
                        }
                    });
                }
                self.capture = Some(handle);
            }
            Err(e) if is_current => {
                if let Some(session) = &mut self.current {
                    session.capture_failed(e, Utc::now());
                }
                self.finish_current();
            }
            Err(e) => debug!("Late launch failure for {} ignored: {}", id, e),
        }
    }

    fn capture_signal(&mut self, id: SessionId, signal: CaptureSignal) {
        let Some(session) = self.current.as_mut().filter(|s| s.id() == &id) else {
            debug!("Capture signal for inactive session {} ignored", id);
            return;
        };

        match signal {
            CaptureSignal::Alive { at } => session.capture_confirmed(at, Utc::now()),
            CaptureSignal::Exited(exit) => {
                self.capture = None;
                let ready = session.capture_exited(exit, Utc::now());

                if ready {
                    self.begin_finalize();
                } else if session.state().is_terminal() {
                    let paths = session.track_paths();
                    let policy = self.settings.discard_policy;
                    tokio::spawn(async move { finalize::discard_all(&paths, policy).await });
                    self.finish_current();
                }
            }
        }
    }

    /// Classify the stopped session and run the file I/O off the queue
    fn begin_finalize(&mut self) {
        let Ok(tx) = self.sender() else { return };
        let Some(session) = &mut self.current else { return };

        let id = session.id().clone();
        let verdict = session.take_verdict();
        let paths = session.track_paths();
        let archive_dir = self.settings.archive_dir.clone();
        let policy = self.settings.discard_policy;

        info!("Finalizing session {}: {:?}", id, verdict);

        tokio::spawn(async move {
            let final_paths = finalize::apply(verdict, &paths, archive_dir.as_deref(), policy).await;
            let _ = tx.send(Input::Finalized {
                id,
                verdict,
                final_paths,
            });
        });
    }

    fn finalized(&mut self, id: SessionId, verdict: Verdict, final_paths: Vec<PathBuf>) {
        let Some(session) = self.current.as_mut().filter(|s| s.id() == &id) else {
            return;
        };
        session.finish(verdict, final_paths, Utc::now());
        self.finish_current();
    }

    /// Move the current (terminal) session into history; back to Idle
    fn finish_current(&mut self) -> Option<SessionStatus> {
        self.publish_changes();

        let session = self.current.take()?;
        let status = session.status();

        self.journal.record(
            session.id(),
            JournalRecord::Classified {
                state: status.state,
                degraded: status.degraded,
                discard_reason: status.discard_reason,
                final_paths: status.final_paths.clone(),
                bytes_written: status.bytes_written,
            },
        );

        match status.notice() {
            Some(notice) => warn!("Session {} finished: {}", status.session_id, notice),
            None => info!("Session {} finished: {}", status.session_id, status.state),
        }

        self.capture = None;
        self.last_seen = None;
        self.remember(status.clone());
        Some(status)
    }

    fn remember(&mut self, status: SessionStatus) {
        let id = status.session_id.clone();
        if self.history.insert(id.clone(), status).is_none() {
            self.history_order.push_back(id);
        }

        while self.history_order.len() > self.settings.history_limit {
            if let Some(oldest) = self.history_order.pop_front() {
                debug!("Forgetting session {}", oldest);
                self.history.remove(&oldest);
            }
        }
    }

    /// Stop a capture whose session is gone and drop whatever it wrote: its
    /// track files, or `output_path` when it reported none
    fn cleanup_orphan(&self, mut handle: CaptureHandle, output_path: Option<PathBuf>) {
        let signals = handle.take_signals();
        handle.request_stop();
        let mut paths: Vec<PathBuf> = handle.tracks().iter().map(|t| t.path.clone()).collect();
        if paths.is_empty() {
            paths.extend(output_path);
        }
        let policy = self.settings.discard_policy;

        tokio::spawn(async move {
            if let Some(mut signals) = signals {
                while let Some(signal) = signals.recv().await {
                    if matches!(signal, CaptureSignal::Exited(_)) {
                        break;
                    }
                }
            }
            drop(handle);
            finalize::discard_all(&paths, policy).await;
        });
    }

    async fn begin_shutdown(&mut self, reply: oneshot::Sender<()>) {
        info!("Supervisor shutting down");
        self.shutdown = Some(reply);

        if let Some(id) = self.current.as_ref().map(|s| s.id().clone()) {
            if let Err(e) = self.stop(&id).await {
                debug!("Shutdown stop of {}: {}", id, e);
            }
        }
    }

    /// Journal and broadcast state / degraded changes of the current session
    fn publish_changes(&mut self) {
        let Some(session) = &self.current else { return };

        let seen = (session.state(), session.is_degraded());
        let (prev_state, prev_degraded) = self.last_seen.unwrap_or((SessionState::Idle, false));
        if self.last_seen == Some(seen) {
            return;
        }

        if prev_state != seen.0 {
            self.journal.record(
                session.id(),
                JournalRecord::Transition {
                    from: prev_state,
                    to: seen.0,
                },
            );
        }
        if seen.1 && !prev_degraded {
            self.journal.record(session.id(), JournalRecord::Degraded);
        }

        self.last_seen = Some(seen);
        let _ = self.status_tx.send(session.status());
    }
}
