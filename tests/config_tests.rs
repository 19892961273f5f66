// Integration tests for configuration loading

use anyhow::Result;
use cluck::{CaptureInput, Config, DiscardPolicy, SupervisorSettings};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_missing_file_uses_defaults() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let cfg = Config::load(&temp_dir.path().join("nope").display().to_string())?;

    assert_eq!(cfg.service.http.port, 7878);
    assert_eq!(cfg.capture.inputs, CaptureInput::defaults());
    assert_eq!(cfg.supervisor.history_limit, 100);
    assert_eq!(cfg.settling_window(), Duration::from_secs(5));
    assert_eq!(cfg.supervisor.discard_policy, DiscardPolicy::Rename);
    assert!(cfg.devices.bluetooth_device.is_none());
    assert!(cfg.archive_dir().is_none());
    Ok(())
}

#[test]
fn test_toml_file_overrides_defaults() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("cluck.toml");
    fs::write(
        &path,
        r#"
[capture]
output_dir = "/tmp/talks"
file_prefix = "talk"

[[capture.inputs]]
device = "Loopback Audio"
label = "loopback"

[[capture.inputs]]
device = "Jabra"
label = "mic-jabra"

[devices]
bluetooth_device = "AirPods Pro"
virtual_devices = ["Multi-Output Device"]
poll = false

[supervisor]
settling_window_secs = 2.5
archive_dir = "/tmp/talks/archive"
discard_policy = "delete"
"#,
    )?;

    let cfg = Config::load(&path.display().to_string())?;

    assert_eq!(
        cfg.capture.inputs,
        vec![
            CaptureInput::new("Loopback Audio", "loopback"),
            CaptureInput::new("Jabra", "mic-jabra"),
        ]
    );
    assert_eq!(cfg.devices.bluetooth_device.as_deref(), Some("AirPods Pro"));
    assert_eq!(cfg.devices.virtual_devices, vec!["Multi-Output Device".to_string()]);
    assert!(!cfg.devices.poll);
    assert_eq!(cfg.settling_window(), Duration::from_millis(2500));

    // Untouched sections keep their defaults
    assert_eq!(cfg.capture.bitrate, "128k");
    assert_eq!(cfg.service.http.bind, "127.0.0.1");

    let settings = SupervisorSettings::from(&cfg);
    assert_eq!(settings.discard_policy, DiscardPolicy::Delete);
    assert_eq!(settings.archive_dir.as_deref(), Some(std::path::Path::new("/tmp/talks/archive")));

    let session = cfg.session_config();
    assert_eq!(session.bluetooth_device.as_deref(), Some("AirPods Pro"));
    assert_eq!(session.settling_window, Duration::from_millis(2500));
    assert_eq!(session.output_path.parent(), Some(std::path::Path::new("/tmp/talks")));

    let name = session.output_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("talk-{label}-"), "unexpected name {}", name);
    assert!(name.ends_with(".m4a"));
    // talk-{label}-YYYY-MM-DD_HH-MM-SS.m4a
    assert_eq!(name.len(), "talk-{label}-".len() + 19 + ".m4a".len());
    Ok(())
}

#[test]
fn test_environment_overrides_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("cluck.toml");
    fs::write(&path, "[devices]\npoll_interval_ms = 250\n")?;

    std::env::set_var("CLUCK_DEVICES__POLL_INTERVAL_MS", "750");
    let cfg = Config::load(&path.display().to_string());
    std::env::remove_var("CLUCK_DEVICES__POLL_INTERVAL_MS");

    assert_eq!(cfg?.devices.poll_interval_ms, 750);
    Ok(())
}

#[test]
fn test_out_of_range_settling_window_is_a_load_error() -> Result<()> {
    let temp_dir = TempDir::new()?;

    for value in ["-1.0", "1e300", "3600.5"] {
        let path = temp_dir.path().join("cluck.toml");
        fs::write(&path, format!("[supervisor]\nsettling_window_secs = {}\n", value))?;

        let err = Config::load(&path.display().to_string()).unwrap_err();
        assert!(
            format!("{:#}", err).contains("settling_window_secs"),
            "unexpected error for {}: {:#}",
            value,
            err
        );
    }
    Ok(())
}

#[test]
fn test_out_of_range_settling_window_falls_back_to_default() {
    let mut cfg = Config::default();

    cfg.supervisor.settling_window_secs = -1.0;
    assert_eq!(cfg.settling_window(), Duration::from_secs(5));

    cfg.supervisor.settling_window_secs = 1e15;
    assert_eq!(cfg.settling_window(), Duration::from_secs(5));

    cfg.supervisor.settling_window_secs = 0.0;
    assert_eq!(cfg.settling_window(), Duration::ZERO);
}

#[test]
fn test_home_is_expanded() {
    let mut cfg = Config::default();
    cfg.capture.output_dir = "~/Downloads".to_string();

    let dir = cfg.output_dir();
    assert!(!dir.to_string_lossy().starts_with('~'));
    assert!(dir.ends_with("Downloads"));
}
