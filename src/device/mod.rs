//! Device event sources
//!
//! The supervisor consumes hardware notifications as a push-based stream of
//! [`DeviceEvent`]s. Sources:
//! - [`ChannelDeviceSource`]: in-process publisher (HTTP injection, tests)
//! - [`AvFoundationDeviceSource`]: polls the ffmpeg avfoundation device list

pub mod avfoundation;
pub mod event;
pub mod source;

pub use avfoundation::{AvDevice, AvFoundationDeviceSource};
pub use event::{DeviceEvent, DeviceEventKind, MonitoredDevices};
pub use source::{ChannelDeviceSource, DeviceEventSource, DeviceEventStream};
