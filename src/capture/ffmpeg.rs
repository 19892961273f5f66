// ffmpeg capture backend: records each configured avfoundation audio input
// to its own AAC file

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use super::backend::{CaptureBackend, CaptureController, CaptureExit, CaptureHandle};
use super::track::{track_path, CaptureInput, CaptureTrack};
use crate::config::CaptureConfig;
use crate::device::avfoundation::{self, AvDevice};

/// Configuration for the ffmpeg backend
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_path: String,
    /// Inputs to record, one ffmpeg process and file each
    pub inputs: Vec<CaptureInput>,
    pub bitrate: String,
    /// How long every process has to stay up before the capture counts as
    /// recording
    pub confirm_after: Duration,
    /// Grace period after the quit request before a process is killed
    pub stop_timeout: Duration,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self::from(&CaptureConfig::default())
    }
}

impl From<&CaptureConfig> for FfmpegConfig {
    fn from(cfg: &CaptureConfig) -> Self {
        Self {
            ffmpeg_path: cfg.ffmpeg_path.clone(),
            inputs: cfg.inputs.clone(),
            bitrate: cfg.bitrate.clone(),
            confirm_after: Duration::from_millis(cfg.confirm_after_ms),
            stop_timeout: Duration::from_secs(cfg.stop_timeout_secs),
        }
    }
}

pub struct FfmpegCapture {
    config: FfmpegConfig,
}

impl FfmpegCapture {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    fn command(&self, index: u32, output_path: &Path) -> Command {
        let mut cmd = Command::new(&self.config.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-f", "avfoundation", "-i"])
            .arg(format!(":{}", index))
            .args(["-c:a", "aac", "-b:a", &self.config.bitrate])
            .arg(output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

/// Match configured inputs against the connected devices. Inputs whose
/// device is missing are skipped.
pub fn resolve_inputs(
    inputs: &[CaptureInput],
    devices: &[AvDevice],
    output_path: &Path,
) -> Vec<(u32, CaptureTrack)> {
    let found: Vec<(&CaptureInput, &AvDevice)> = inputs
        .iter()
        .filter_map(|input| match avfoundation::find_device(devices, &input.device) {
            Some(device) => Some((input, device)),
            None => {
                warn!("Input device '{}' not found, skipping {}", input.device, input.label);
                None
            }
        })
        .collect();

    let count = found.len();
    found
        .into_iter()
        .map(|(input, device)| {
            let track = CaptureTrack {
                label: input.label.clone(),
                device: device.name.clone(),
                path: track_path(output_path, &input.label, count),
            };
            (device.index, track)
        })
        .collect()
}

#[async_trait::async_trait]
impl CaptureBackend for FfmpegCapture {
    async fn launch(&self, output_path: &Path) -> Result<CaptureHandle> {
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
        }

        let devices = avfoundation::list_audio_devices(&self.config.ffmpeg_path).await?;
        let resolved = resolve_inputs(&self.config.inputs, &devices, output_path);
        if resolved.is_empty() {
            let wanted: Vec<&str> = self.config.inputs.iter().map(|i| i.device.as_str()).collect();
            bail!("None of the capture inputs is connected ({})", wanted.join(", "));
        }

        // Children spawned before a failure are killed when dropped
        let mut children = Vec::with_capacity(resolved.len());
        for (index, track) in &resolved {
            let child = self
                .command(*index, &track.path)
                .spawn()
                .with_context(|| format!("Failed to start ffmpeg for {}", track.device))?;
            info!(
                "Recording {} [{}] -> {} (pid {})",
                track.device,
                index,
                track.path.display(),
                child.id().unwrap_or_default()
            );
            children.push(child);
        }

        let pid = children.first().and_then(Child::id).unwrap_or_default();
        let tracks: Vec<CaptureTrack> = resolved.into_iter().map(|(_, track)| track).collect();

        let (stop_tx, _) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        for (n, (child, track)) in children.into_iter().zip(&tracks).enumerate() {
            tokio::spawn(run_track(
                n,
                child,
                track.path.clone(),
                self.config.confirm_after,
                self.config.stop_timeout,
                stop_tx.subscribe(),
                event_tx.clone(),
            ));
        }
        drop(event_tx);

        let (handle, controller) = CaptureHandle::new(pid);
        tokio::spawn(aggregate_tracks(tracks.len(), event_rx, controller, stop_tx));

        Ok(handle.with_tracks(tracks))
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Reported by each ffmpeg child to the task combining them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackEvent {
    Alive {
        track: usize,
    },
    Exited {
        track: usize,
        exit_code: Option<i32>,
        bytes_written: u64,
    },
}

/// Combine the per-input children into one capture
///
/// The capture is confirmed once every track has survived its confirmation
/// delay. A track ending before that stops the others. After confirmation a
/// track may end on its own (its device went away) while the rest keep
/// recording. The capture has exited when the last track has; the exit
/// carries the summed file sizes and the first non-zero exit code.
async fn aggregate_tracks(
    track_count: usize,
    mut events: mpsc::UnboundedReceiver<TrackEvent>,
    mut controller: CaptureController,
    stop_tx: watch::Sender<bool>,
) {
    let mut alive = vec![false; track_count];
    let mut codes = Vec::with_capacity(track_count);
    let mut bytes_written = 0;
    let mut confirmed = false;
    let mut stopping = false;

    while codes.len() < track_count {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    TrackEvent::Alive { track } => {
                        alive[track] = true;
                        if !confirmed && alive.iter().all(|a| *a) {
                            confirmed = true;
                            controller.confirm_alive(Utc::now());
                        }
                    }
                    TrackEvent::Exited { track, exit_code, bytes_written: bytes } => {
                        codes.push(exit_code);
                        bytes_written += bytes;
                        if !confirmed && !stopping {
                            warn!("Capture track {} ended before confirmation, stopping the others", track);
                            stopping = true;
                            let _ = stop_tx.send(true);
                        } else if !stopping {
                            warn!("Capture track {} ended (code {:?})", track, exit_code);
                        }
                    }
                }
            }
            _ = controller.stop_requested(), if !stopping => {
                stopping = true;
                let _ = stop_tx.send(true);
            }
        }
    }

    let exit_code = codes
        .iter()
        .copied()
        .find(|code| *code != Some(0))
        .unwrap_or(Some(0));

    controller.exited(CaptureExit {
        exit_code,
        bytes_written,
    });
}

/// Owns one child: reports it alive once it survived `confirm_after`,
/// quits it on the shared stop flag and reports its exit with the final
/// file size.
async fn run_track(
    track: usize,
    mut child: Child,
    output_path: PathBuf,
    confirm_after: Duration,
    stop_timeout: Duration,
    mut stop_rx: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<TrackEvent>,
) {
    let confirm = tokio::time::sleep(confirm_after);
    tokio::pin!(confirm);
    let mut confirmed = false;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            _ = &mut confirm, if !confirmed => {
                confirmed = true;
                let _ = events.send(TrackEvent::Alive { track });
            }
            // Only `true` is ever sent; a dropped sender also means stop
            _ = stop_rx.changed() => {
                break quit(&mut child, stop_timeout).await;
            }
        }
    };

    let exit_code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            error!("Failed to wait for ffmpeg: {}", e);
            None
        }
    };

    let bytes_written = tokio::fs::metadata(&output_path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    info!(
        "ffmpeg exited (code {:?}, {} bytes written to {})",
        exit_code,
        bytes_written,
        output_path.display()
    );

    let _ = events.send(TrackEvent::Exited {
        track,
        exit_code,
        bytes_written,
    });
}

/// `q` on stdin lets ffmpeg write the trailer; kill it if it does not exit
/// within `stop_timeout`.
async fn quit(child: &mut Child, stop_timeout: Duration) -> std::io::Result<ExitStatus> {
    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(b"q").await {
            warn!("Failed to send quit to ffmpeg: {}", e);
        }
        drop(stdin);
    }

    match tokio::time::timeout(stop_timeout, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("ffmpeg did not exit within {:?}, killing", stop_timeout);
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureSignal;

    fn devices() -> Vec<AvDevice> {
        vec![
            AvDevice { index: 0, name: "BlackHole 2ch".to_string() },
            AvDevice { index: 1, name: "MacBook Pro Microphone".to_string() },
        ]
    }

    #[test]
    fn test_resolve_skips_missing_inputs() {
        let template = Path::new("/tmp/record-{label}-2024-03-14_09-00-00.m4a");
        let resolved = resolve_inputs(&CaptureInput::defaults(), &devices(), template);

        // No Jabra connected
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].0, 0);
        assert_eq!(resolved[0].1.label, "blackhole");
        assert_eq!(resolved[0].1.device, "BlackHole 2ch");
        assert_eq!(
            resolved[0].1.path,
            PathBuf::from("/tmp/record-blackhole-2024-03-14_09-00-00.m4a")
        );
        assert_eq!(resolved[1].0, 1);
        assert_eq!(resolved[1].1.label, "mic-macbook");
    }

    #[test]
    fn test_resolve_single_input_keeps_plain_path() {
        let inputs = vec![CaptureInput::new("BlackHole", "blackhole")];
        let resolved = resolve_inputs(&inputs, &devices(), Path::new("/tmp/talk.m4a"));

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].1.path, PathBuf::from("/tmp/talk.m4a"));
    }

    #[tokio::test]
    async fn test_tracks_confirm_together_and_sum_bytes() {
        let (mut handle, controller) = CaptureHandle::new(7);
        let mut signals = handle.take_signals().unwrap();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        tokio::spawn(aggregate_tracks(2, event_rx, controller, stop_tx));

        event_tx.send(TrackEvent::Alive { track: 0 }).unwrap();
        event_tx.send(TrackEvent::Alive { track: 1 }).unwrap();
        assert!(matches!(signals.recv().await, Some(CaptureSignal::Alive { .. })));

        handle.request_stop();
        stop_rx.changed().await.unwrap();
        assert!(*stop_rx.borrow());

        event_tx
            .send(TrackEvent::Exited { track: 0, exit_code: Some(0), bytes_written: 100 })
            .unwrap();
        event_tx
            .send(TrackEvent::Exited { track: 1, exit_code: Some(255), bytes_written: 20 })
            .unwrap();

        assert_eq!(
            signals.recv().await,
            Some(CaptureSignal::Exited(CaptureExit { exit_code: Some(255), bytes_written: 120 }))
        );
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_track_failing_before_confirmation_stops_the_rest() {
        let (mut handle, controller) = CaptureHandle::new(7);
        let mut signals = handle.take_signals().unwrap();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        tokio::spawn(aggregate_tracks(2, event_rx, controller, stop_tx));

        event_tx.send(TrackEvent::Alive { track: 0 }).unwrap();
        event_tx
            .send(TrackEvent::Exited { track: 1, exit_code: Some(1), bytes_written: 0 })
            .unwrap();

        stop_rx.changed().await.unwrap();
        assert!(*stop_rx.borrow());

        event_tx
            .send(TrackEvent::Exited { track: 0, exit_code: Some(0), bytes_written: 48 })
            .unwrap();

        // Never confirmed: the only signal is the exit
        assert_eq!(
            signals.recv().await,
            Some(CaptureSignal::Exited(CaptureExit { exit_code: Some(1), bytes_written: 48 }))
        );
        assert_eq!(signals.recv().await, None);
    }
}
