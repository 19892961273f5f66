use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::track::CaptureTrack;

/// How a capture process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureExit {
    /// Process exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Total size of the output files after the capture flushed and exited
    pub bytes_written: u64,
}

/// Asynchronous notifications from a running capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSignal {
    /// The capture is running and audio is flowing into the output file
    Alive { at: DateTime<Utc> },
    /// The capture exited (requested or not). Always the last signal.
    Exited(CaptureExit),
}

/// Handle to a launched capture, owned by the supervisor
pub struct CaptureHandle {
    pid_or_handle: u32,
    alive: Arc<AtomicBool>,
    stop_tx: mpsc::UnboundedSender<()>,
    signals: Option<mpsc::UnboundedReceiver<CaptureSignal>>,
    tracks: Vec<CaptureTrack>,
}

/// Backend side of a [`CaptureHandle`]: reports signals and receives the
/// terminate request
pub struct CaptureController {
    alive: Arc<AtomicBool>,
    signal_tx: mpsc::UnboundedSender<CaptureSignal>,
    stop_rx: mpsc::UnboundedReceiver<()>,
}

impl CaptureHandle {
    pub fn new(pid_or_handle: u32) -> (Self, CaptureController) {
        let alive = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let handle = Self {
            pid_or_handle,
            alive: Arc::clone(&alive),
            stop_tx,
            signals: Some(signal_rx),
            tracks: Vec::new(),
        };
        let controller = CaptureController {
            alive,
            signal_tx,
            stop_rx,
        };

        (handle, controller)
    }

    /// Files the capture writes, one per input
    pub fn with_tracks(mut self, tracks: Vec<CaptureTrack>) -> Self {
        self.tracks = tracks;
        self
    }

    pub fn tracks(&self) -> &[CaptureTrack] {
        &self.tracks
    }

    pub fn pid_or_handle(&self) -> u32 {
        self.pid_or_handle
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Ask the backend to stop the capture. Completion arrives as
    /// [`CaptureSignal::Exited`].
    pub fn request_stop(&self) {
        // The backend task is gone when this fails, and it has already
        // reported its exit.
        let _ = self.stop_tx.send(());
    }

    /// Take the signal stream. Only the first call returns `Some`.
    pub fn take_signals(&mut self) -> Option<mpsc::UnboundedReceiver<CaptureSignal>> {
        self.signals.take()
    }
}

impl CaptureController {
    pub fn confirm_alive(&self, at: DateTime<Utc>) {
        let _ = self.signal_tx.send(CaptureSignal::Alive { at });
    }

    pub fn exited(&self, exit: CaptureExit) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.signal_tx.send(CaptureSignal::Exited(exit));
    }

    /// Resolves when a stop was requested or the handle was dropped
    pub async fn stop_requested(&mut self) {
        let _ = self.stop_rx.recv().await;
    }
}

/// Capture engine trait
///
/// Implementations:
/// - ffmpeg: avfoundation inputs encoded to AAC, one .m4a file each
/// - tests: scripted fakes driving a [`CaptureController`]
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Launch a capture writing to `output_path`
    ///
    /// Returns once the process is spawned; confirmation and exit are
    /// reported through the handle's signal stream. A backend recording
    /// several inputs treats `output_path` as a template and lists the
    /// files it writes in [`CaptureHandle::tracks`].
    async fn launch(&self, output_path: &Path) -> Result<CaptureHandle>;

    /// Request termination; the exit is reported asynchronously
    async fn terminate(&self, handle: &CaptureHandle) -> Result<()> {
        handle.request_stop();
        Ok(())
    }

    /// Get backend name for logging
    fn name(&self) -> &str;
}
