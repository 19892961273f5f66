// macOS device discovery through ffmpeg's avfoundation input

use anyhow::{Context, Result};
use futures::stream;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::event::{DeviceEvent, DeviceEventKind};
use super::source::{DeviceEventSource, DeviceEventStream};

/// An avfoundation audio input as listed by ffmpeg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvDevice {
    pub index: u32,
    pub name: String,
}

/// Run `ffmpeg -f avfoundation -list_devices true -i ""` and return the audio
/// inputs. ffmpeg exits non-zero for this invocation, the listing is on stderr.
pub async fn list_audio_devices(ffmpeg_path: &str) -> Result<Vec<AvDevice>> {
    let output = Command::new(ffmpeg_path)
        .args(["-hide_banner", "-f", "avfoundation", "-list_devices", "true", "-i", ""])
        .output()
        .await
        .with_context(|| format!("Failed to run {} (is ffmpeg on PATH?)", ffmpeg_path))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout).into_owned()
    } else {
        stderr.into_owned()
    };

    Ok(parse_device_listing(&text))
}

/// First audio device whose name contains `name`
pub fn find_device<'a>(devices: &'a [AvDevice], name: &str) -> Option<&'a AvDevice> {
    devices.iter().find(|d| d.name.contains(name))
}

/// Parse the audio section of an avfoundation device listing:
///
/// ```text
/// [AVFoundation indev @ 0x7f8] AVFoundation video devices:
/// [AVFoundation indev @ 0x7f8] [0] FaceTime HD Camera
/// [AVFoundation indev @ 0x7f8] AVFoundation audio devices:
/// [AVFoundation indev @ 0x7f8] [0] BlackHole 2ch
/// ```
pub fn parse_device_listing(text: &str) -> Vec<AvDevice> {
    let mut devices = Vec::new();
    let mut in_audio = false;

    for line in text.lines() {
        let body = strip_log_prefix(line).trim();

        if body.ends_with("video devices:") {
            in_audio = false;
            continue;
        }
        if body.ends_with("audio devices:") {
            in_audio = true;
            continue;
        }
        if !in_audio {
            continue;
        }

        if let Some(device) = parse_device_line(body) {
            devices.push(device);
        }
    }

    devices
}

// "[AVFoundation indev @ 0x7f8] rest" -> "rest"
fn strip_log_prefix(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with("[AVFoundation") {
        if let Some(end) = trimmed.find(']') {
            return &trimmed[end + 1..];
        }
    }
    trimmed
}

// "[2] Jabra Evolve2 65" -> AvDevice
fn parse_device_line(body: &str) -> Option<AvDevice> {
    let rest = body.strip_prefix('[')?;
    let end = rest.find(']')?;
    let index = rest[..end].parse().ok()?;
    let name = rest[end + 1..].trim();
    if name.is_empty() {
        return None;
    }

    Some(AvDevice {
        index,
        name: name.to_string(),
    })
}

/// Turn two device snapshots into Connected / Disconnected events
pub fn diff_snapshots(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> Vec<DeviceEvent> {
    let removed = previous
        .difference(current)
        .map(|name| DeviceEvent::new(name.clone(), DeviceEventKind::Disconnected));
    let added = current
        .difference(previous)
        .map(|name| DeviceEvent::new(name.clone(), DeviceEventKind::Connected));

    removed.chain(added).collect()
}

/// Polling device source
///
/// avfoundation has no notification API reachable through ffmpeg, so the
/// listing is polled and consecutive snapshots are diffed. Device ids are the
/// device names. Profile changes are not observable this way.
pub struct AvFoundationDeviceSource {
    ffmpeg_path: String,
    interval: Duration,
}

impl AvFoundationDeviceSource {
    pub fn new(ffmpeg_path: impl Into<String>, interval: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            interval,
        }
    }
}

#[async_trait::async_trait]
impl DeviceEventSource for AvFoundationDeviceSource {
    async fn subscribe(&self) -> Result<DeviceEventStream> {
        // Baseline snapshot: devices present at subscribe time produce no events
        let baseline: BTreeSet<String> = list_audio_devices(&self.ffmpeg_path)
            .await?
            .into_iter()
            .map(|d| d.name)
            .collect();

        info!(
            "Polling avfoundation audio devices every {:?} ({} present)",
            self.interval,
            baseline.len()
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let ffmpeg_path = self.ffmpeg_path.clone();
        let interval = self.interval;

        tokio::spawn(async move {
            let mut known = baseline;
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let current: BTreeSet<String> = match list_audio_devices(&ffmpeg_path).await {
                    Ok(devices) => devices.into_iter().map(|d| d.name).collect(),
                    Err(e) => {
                        warn!("Device poll failed, ending subscription: {:#}", e);
                        break;
                    }
                };

                for event in diff_snapshots(&known, &current) {
                    debug!("Device {} {}", event.device_id, event.kind);
                    if tx.send(event).is_err() {
                        return;
                    }
                }
                known = current;
            }
        });

        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(events))
    }

    fn name(&self) -> &str {
        "avfoundation"
    }
}
