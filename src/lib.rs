pub mod capture;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod http;
pub mod session;
pub mod supervisor;

pub use capture::{
    CaptureBackend, CaptureExit, CaptureHandle, CaptureInput, CaptureSignal, CaptureTrack,
    FfmpegCapture, FfmpegConfig,
};
pub use client::{ApiClient, ClientError};
pub use config::Config;
pub use device::{
    AvFoundationDeviceSource, ChannelDeviceSource, DeviceEvent, DeviceEventKind, DeviceEventSource,
};
pub use error::{ErrorResponse, SupervisorError, SupervisorResult};
pub use http::{create_router, AppState};
pub use session::{
    DiscardPolicy, DiscardReason, Journal, Session, SessionConfig, SessionId, SessionState,
    SessionStatus,
};
pub use supervisor::{attach_device_source, Supervisor, SupervisorHandle, SupervisorSettings};
