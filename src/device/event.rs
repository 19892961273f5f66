use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of hardware notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEventKind {
    Connected,
    Disconnected,
    /// Format or Bluetooth profile switch (e.g. A2DP -> HFP)
    ProfileChanged,
}

impl fmt::Display for DeviceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::ProfileChanged => "profile_changed",
        };
        f.write_str(s)
    }
}

/// A single device notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub device_id: String,
    pub kind: DeviceEventKind,

    /// When the OS observed the change (not when it was delivered)
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl DeviceEvent {
    pub fn new(device_id: impl Into<String>, kind: DeviceEventKind) -> Self {
        Self::at(device_id, kind, Utc::now())
    }

    pub fn at(device_id: impl Into<String>, kind: DeviceEventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
            timestamp,
        }
    }

    /// Identity used to collapse duplicate deliveries
    pub fn key(&self) -> (&str, DeviceEventKind, DateTime<Utc>) {
        (&self.device_id, self.kind, self.timestamp)
    }
}

/// The devices a session cares about. Everything else is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredDevices {
    /// Bluetooth headset that has to connect after capture is confirmed
    pub bluetooth: Option<String>,
    /// Aggregate / multi-output virtual devices
    pub virtual_devices: Vec<String>,
}

impl MonitoredDevices {
    pub fn new(bluetooth: Option<String>, virtual_devices: Vec<String>) -> Self {
        Self {
            bluetooth,
            virtual_devices,
        }
    }

    pub fn is_bluetooth(&self, device_id: &str) -> bool {
        self.bluetooth.as_deref() == Some(device_id)
    }

    pub fn is_monitored(&self, device_id: &str) -> bool {
        self.is_bluetooth(device_id) || self.virtual_devices.iter().any(|d| d == device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitored_devices() {
        let devices = MonitoredDevices::new(
            Some("Jabra Evolve2 65".to_string()),
            vec!["Aggregate Device".to_string()],
        );

        assert!(devices.is_bluetooth("Jabra Evolve2 65"));
        assert!(!devices.is_bluetooth("Aggregate Device"));
        assert!(devices.is_monitored("Aggregate Device"));
        assert!(!devices.is_monitored("MacBook Pro Microphone"));
    }

    #[test]
    fn test_event_timestamp_defaults_to_now() {
        let before = Utc::now();
        let event: DeviceEvent =
            serde_json::from_str(r#"{"device_id": "Jabra", "kind": "profile_changed"}"#).unwrap();

        assert_eq!(event.kind, DeviceEventKind::ProfileChanged);
        assert!(event.timestamp >= before);
    }
}
