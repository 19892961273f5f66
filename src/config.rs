use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::capture::{CaptureInput, LABEL_PLACEHOLDER};
use crate::session::{
    settling_window_from_secs, DiscardPolicy, SessionConfig, DEFAULT_SETTLING_WINDOW,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub capture: CaptureConfig,
    pub devices: DevicesConfig,
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// ffmpeg binary, looked up on PATH when not absolute
    pub ffmpeg_path: String,
    /// Inputs recorded side by side, one file each; missing devices are
    /// skipped at launch
    pub inputs: Vec<CaptureInput>,
    pub bitrate: String,
    /// Directory for generated output files, `~` is expanded
    pub output_dir: String,
    pub file_prefix: String,
    pub confirm_after_ms: u64,
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// Bluetooth headset that must connect only after capture is confirmed
    pub bluetooth_device: Option<String>,
    /// Aggregate / multi-output devices whose disruptions degrade a session
    pub virtual_devices: Vec<String>,
    /// Poll the avfoundation device list for connect/disconnect events
    pub poll: bool,
    pub poll_interval_ms: u64,
    pub resubscribe_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub settling_window_secs: f64,
    pub archive_dir: Option<String>,
    pub discard_policy: DiscardPolicy,
    pub journal_path: Option<String>,
    /// Finished sessions kept for status queries
    pub history_limit: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "cluck".to_string(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 7878,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            inputs: CaptureInput::defaults(),
            bitrate: "128k".to_string(),
            output_dir: "~/Downloads".to_string(),
            file_prefix: "record".to_string(),
            confirm_after_ms: 500,
            stop_timeout_secs: 5,
        }
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            bluetooth_device: None,
            virtual_devices: Vec::new(),
            poll: true,
            poll_interval_ms: 1000,
            resubscribe_backoff_ms: 2000,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            settling_window_secs: 5.0,
            archive_dir: None,
            discard_policy: DiscardPolicy::Rename,
            journal_path: None,
            history_limit: 100,
        }
    }
}

impl Config {
    /// Load from an optional config file (any extension the `config` crate
    /// understands) layered with `CLUCK_*` environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("CLUCK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        let cfg: Self = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;

        settling_window_from_secs(cfg.supervisor.settling_window_secs)
            .map_err(|e| anyhow!("supervisor.settling_window_secs: {}", e))?;

        Ok(cfg)
    }

    pub fn output_dir(&self) -> PathBuf {
        expand_path(&self.capture.output_dir)
    }

    pub fn archive_dir(&self) -> Option<PathBuf> {
        self.supervisor.archive_dir.as_deref().map(expand_path)
    }

    pub fn journal_path(&self) -> Option<PathBuf> {
        self.supervisor.journal_path.as_deref().map(expand_path)
    }

    /// Configured settling window, or the default when it is out of range
    pub fn settling_window(&self) -> Duration {
        settling_window_from_secs(self.supervisor.settling_window_secs)
            .unwrap_or(DEFAULT_SETTLING_WINDOW)
    }

    /// `<output_dir>/<prefix>-{label}-<YYYY-MM-DD_HH-MM-SS>.m4a`, `{label}`
    /// being filled in per capture input
    pub fn default_output_path(&self) -> PathBuf {
        let ts = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        self.output_dir().join(format!(
            "{}-{}-{}.m4a",
            self.capture.file_prefix, LABEL_PLACEHOLDER, ts
        ))
    }

    /// Session parameters for a start request that did not override anything.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            output_path: self.default_output_path(),
            bluetooth_device: self.devices.bluetooth_device.clone(),
            virtual_devices: self.devices.virtual_devices.clone(),
            settling_window: self.settling_window(),
        }
    }
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
