use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::device::MonitoredDevices;
use crate::error::{SupervisorError, SupervisorResult};

/// Settling window used when none is configured
pub const DEFAULT_SETTLING_WINDOW: Duration = Duration::from_secs(5);

/// Longest disruption a session will wait out
pub const MAX_SETTLING_WINDOW: Duration = Duration::from_secs(3600);

/// Parameters of one recording attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// File the capture writes to. With several capture inputs this is a
    /// template: `{label}` is replaced by each input's label.
    pub output_path: PathBuf,

    /// Bluetooth headset that must connect only after capture is confirmed
    pub bluetooth_device: Option<String>,

    /// Aggregate / multi-output devices whose drops degrade the session
    pub virtual_devices: Vec<String>,

    /// How long a device disruption is tolerated before it auto-resolves
    /// Default: 5 seconds, at most [`MAX_SETTLING_WINDOW`]
    pub settling_window: Duration,
}

impl SessionConfig {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            bluetooth_device: None,
            virtual_devices: Vec::new(),
            settling_window: DEFAULT_SETTLING_WINDOW,
        }
    }

    pub fn monitored(&self) -> MonitoredDevices {
        MonitoredDevices::new(self.bluetooth_device.clone(), self.virtual_devices.clone())
    }

    /// Reject parameters the supervisor cannot run with
    pub fn validate(&self) -> SupervisorResult<()> {
        if self.settling_window > MAX_SETTLING_WINDOW {
            return Err(SupervisorError::InvalidRequest(format!(
                "settling window {:?} exceeds the maximum of {:?}",
                self.settling_window, MAX_SETTLING_WINDOW
            )));
        }
        Ok(())
    }
}

/// Settling window from a user-supplied number of seconds
pub fn settling_window_from_secs(secs: f64) -> SupervisorResult<Duration> {
    let max = MAX_SETTLING_WINDOW.as_secs_f64();
    if !(0.0..=max).contains(&secs) {
        return Err(SupervisorError::InvalidRequest(format!(
            "settling window must be between 0 and {} seconds, got {}",
            max, secs
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}
