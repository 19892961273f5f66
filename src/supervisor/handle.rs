use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use super::supervisor::Input;
use crate::device::DeviceEvent;
use crate::error::{SupervisorError, SupervisorResult};
use crate::session::{SessionConfig, SessionId, SessionState, SessionStatus};

/// How often `wait_for` re-checks status besides listening for updates
pub const RESYNC_INTERVAL: Duration = Duration::from_millis(500);

/// Handle for communicating with the Supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Input>,
    status_tx: broadcast::Sender<SessionStatus>,
}

impl SupervisorHandle {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<Input>,
        status_tx: broadcast::Sender<SessionStatus>,
    ) -> Self {
        Self { tx, status_tx }
    }

    /// Arm a new session and launch its capture in the background
    ///
    /// Returns once the session is `Armed`; watch `status` or `subscribe`
    /// for the confirmation.
    pub async fn start(&self, config: SessionConfig) -> SupervisorResult<SessionId> {
        self.request(|reply| Input::Start { config, reply }).await?
    }

    /// Stop a session. Returns the status right after the transition; the
    /// final classification follows once the capture has flushed.
    pub async fn stop(&self, id: &SessionId) -> SupervisorResult<SessionStatus> {
        let id = id.clone();
        self.request(|reply| Input::Stop { id, reply }).await?
    }

    pub async fn status(&self, id: &SessionId) -> SupervisorResult<SessionStatus> {
        let id = id.clone();
        self.request(|reply| Input::Status { id, reply }).await?
    }

    /// Status of the non-terminal session, if there is one
    pub async fn current(&self) -> SupervisorResult<Option<SessionStatus>> {
        self.request(|reply| Input::Current { reply }).await
    }

    /// Feed a device notification. Never blocks.
    pub fn device_event(&self, event: DeviceEvent) -> SupervisorResult<()> {
        self.tx
            .send(Input::Device(event))
            .map_err(|_| SupervisorError::SupervisorGone)
    }

    /// Every state or degraded-flag change of the current session
    pub fn subscribe(&self) -> broadcast::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Wait until session `id` satisfies `done`
    ///
    /// Status is also re-polled every [`RESYNC_INTERVAL`]; a supervisor task
    /// that died surfaces there as [`SupervisorError::SupervisorGone`].
    pub async fn wait_for<F>(&self, id: &SessionId, mut done: F) -> SupervisorResult<SessionStatus>
    where
        F: FnMut(&SessionStatus) -> bool,
    {
        // Subscribe before the first poll so no transition slips between them
        let mut updates = self.subscribe();

        let status = self.status(id).await?;
        if done(&status) {
            return Ok(status);
        }

        let mut resync = tokio::time::interval(RESYNC_INTERVAL);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        resync.reset();

        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Ok(status) if &status.session_id == id && done(&status) => return Ok(status),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let status = self.status(id).await?;
                        if done(&status) {
                            return Ok(status);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SupervisorError::SupervisorGone)
                    }
                },
                _ = resync.tick() => {
                    let status = self.status(id).await?;
                    if done(&status) {
                        return Ok(status);
                    }
                }
            }
        }
    }

    /// Wait until session `id` reaches `state`
    pub async fn wait_for_state(
        &self,
        id: &SessionId,
        state: SessionState,
    ) -> SupervisorResult<SessionStatus> {
        self.wait_for(id, |s| s.state == state).await
    }

    /// Wait for the final classification
    pub async fn wait_until_finished(&self, id: &SessionId) -> SupervisorResult<SessionStatus> {
        self.wait_for(id, |s| s.state.is_terminal()).await
    }

    /// Stop the active session (if any), wait for its finalize, then end the
    /// sequencing task
    pub async fn shutdown(&self) -> SupervisorResult<()> {
        self.request(|reply| Input::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Input,
    ) -> SupervisorResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| SupervisorError::SupervisorGone)?;
        rx.await.map_err(|_| SupervisorError::SupervisorGone)
    }
}
