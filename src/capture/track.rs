use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Placeholder in an output path replaced by each input's label
pub const LABEL_PLACEHOLDER: &str = "{label}";

/// One capture input: an avfoundation device and the label used in its
/// file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureInput {
    /// Substring of the avfoundation audio device name
    pub device: String,
    pub label: String,
}

impl CaptureInput {
    pub fn new(device: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            label: label.into(),
        }
    }

    /// Jabra headset mic, BlackHole loopback and the built-in mic
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("Jabra", "mic-jabra"),
            Self::new("BlackHole", "blackhole"),
            Self::new("MacBook", "mic-macbook"),
        ]
    }
}

/// A file a running capture writes to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTrack {
    pub label: String,
    /// Resolved device name
    pub device: String,
    pub path: PathBuf,
}

/// Output file for the input `label`
///
/// `{label}` in the file name is replaced. Without the placeholder a lone
/// track writes to `template` itself, and each of several tracks gets
/// `-<label>` before the extension.
pub fn track_path(template: &Path, label: &str, track_count: usize) -> PathBuf {
    let Some(name) = template.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return template.to_path_buf();
    };

    if name.contains(LABEL_PLACEHOLDER) {
        return template.with_file_name(name.replace(LABEL_PLACEHOLDER, label));
    }
    if track_count <= 1 {
        return template.to_path_buf();
    }

    let stem = template
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match template.extension() {
        Some(ext) => format!("{}-{}.{}", stem, label, ext.to_string_lossy()),
        None => format!("{}-{}", stem, label),
    };
    template.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_replaced() {
        let template = Path::new("/tmp/record-{label}-2024-03-14_09-00-00.m4a");

        assert_eq!(
            track_path(template, "mic-jabra", 3),
            PathBuf::from("/tmp/record-mic-jabra-2024-03-14_09-00-00.m4a")
        );
        assert_eq!(
            track_path(template, "blackhole", 1),
            PathBuf::from("/tmp/record-blackhole-2024-03-14_09-00-00.m4a")
        );
    }

    #[test]
    fn test_plain_path_single_and_multiple_tracks() {
        let template = Path::new("/tmp/talk.m4a");

        assert_eq!(track_path(template, "blackhole", 1), PathBuf::from("/tmp/talk.m4a"));
        assert_eq!(
            track_path(template, "blackhole", 2),
            PathBuf::from("/tmp/talk-blackhole.m4a")
        );
        assert_eq!(
            track_path(Path::new("/tmp/talk"), "mic-macbook", 2),
            PathBuf::from("/tmp/talk-mic-macbook")
        );
    }
}
