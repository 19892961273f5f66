pub mod backend;
pub mod ffmpeg;
pub mod track;

pub use backend::{CaptureBackend, CaptureController, CaptureExit, CaptureHandle, CaptureSignal};
pub use ffmpeg::{FfmpegCapture, FfmpegConfig};
pub use track::{track_path, CaptureInput, CaptureTrack, LABEL_PLACEHOLDER};
