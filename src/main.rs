use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cluck::device::avfoundation;
use cluck::http::StartRecordingRequest;
use cluck::{
    attach_device_source, create_router, ApiClient, AppState, AvFoundationDeviceSource, Config,
    FfmpegCapture, FfmpegConfig, Journal, SessionId, SessionState, SessionStatus, Supervisor,
    SupervisorError, SupervisorHandle, SupervisorSettings,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Record live talks without Bluetooth headsets corrupting the capture
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file, extension optional (missing file means defaults)
    #[arg(short, long, default_value = "config/cluck")]
    config: String,

    /// Daemon URL for start/stop/status (default: from config)
    #[arg(long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the supervisor daemon with its HTTP API
    Serve,

    /// Record in the foreground until Ctrl+C
    Record {
        /// Output file (default: generated in the configured output dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Arm a recording on a running daemon
    Start {
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Bluetooth headset to watch
        #[arg(long)]
        bluetooth: Option<String>,

        /// Return as soon as the session is armed
        #[arg(long)]
        no_wait: bool,
    },

    /// Stop a recording (default: the active one)
    Stop { id: Option<String> },

    /// Show a session (default: the active one)
    Status { id: Option<String> },

    /// List avfoundation audio devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    let url = cli
        .url
        .clone()
        .unwrap_or_else(|| format!("http://{}:{}", cfg.service.http.bind, cfg.service.http.port));

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Record { output } => record(cfg, output).await,
        Command::Start {
            output,
            bluetooth,
            no_wait,
        } => start(&url, output, bluetooth, no_wait).await,
        Command::Stop { id } => stop(&url, id).await,
        Command::Status { id } => status(&url, id).await,
        Command::Devices => devices(&cfg).await,
    }
}

/// Supervisor plus the device poller, as configured
fn launch_supervisor(cfg: &Config) -> Result<(SupervisorHandle, JoinHandle<()>, Option<JoinHandle<()>>)> {
    let journal = match cfg.journal_path() {
        Some(path) => Journal::open(path)?,
        None => Journal::disabled(),
    };

    let backend = Arc::new(FfmpegCapture::new(FfmpegConfig::from(&cfg.capture)));
    let (supervisor, task) = Supervisor::spawn(backend, SupervisorSettings::from(cfg), journal);

    let poller = cfg.devices.poll.then(|| {
        let source = AvFoundationDeviceSource::new(
            cfg.capture.ffmpeg_path.clone(),
            Duration::from_millis(cfg.devices.poll_interval_ms),
        );
        attach_device_source(
            supervisor.clone(),
            Arc::new(source),
            Duration::from_millis(cfg.devices.resubscribe_backoff_ms),
        )
    });

    Ok((supervisor, task, poller))
}

async fn serve(cfg: Config) -> Result<()> {
    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Output directory: {}", cfg.output_dir().display());
    if let Some(device) = &cfg.devices.bluetooth_device {
        info!("Bluetooth device: {}", device);
    }

    let (supervisor, task, poller) = launch_supervisor(&cfg)?;

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP API listening on {}", addr);

    let app = create_router(AppState::new(supervisor.clone(), cfg));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await
        .context("HTTP server failed")?;

    supervisor.shutdown().await?;
    if let Some(poller) = poller {
        poller.abort();
    }
    task.await.context("Supervisor task panicked")?;
    Ok(())
}

async fn record(cfg: Config, output: Option<PathBuf>) -> Result<()> {
    let mut session_config = cfg.session_config();
    if let Some(path) = output {
        session_config.output_path = path;
    }

    let (supervisor, task, poller) = launch_supervisor(&cfg)?;
    let id = supervisor.start(session_config).await?;

    let status = supervisor
        .wait_for(&id, |s| s.state != SessionState::Armed)
        .await?;
    if status.state.is_capturing() {
        for track in &status.tracks {
            println!("Recording {} -> {}", track.device, track.path.display());
        }
        if let Some(device) = &cfg.devices.bluetooth_device {
            println!("You can connect {} now.", device);
        }
        println!("Press Ctrl+C to stop.");
        tokio::signal::ctrl_c().await?;
        println!("Stopping...");
        supervisor.stop(&id).await?;
    }

    let status = supervisor.wait_until_finished(&id).await?;
    print_status(&status);

    supervisor.shutdown().await?;
    if let Some(poller) = poller {
        poller.abort();
    }
    task.await.context("Supervisor task panicked")?;

    match status.notice() {
        Some(e @ SupervisorError::CaptureLaunchFailed(_)) => Err(e.into()),
        _ => Ok(()),
    }
}

async fn start(url: &str, output: Option<PathBuf>, bluetooth: Option<String>, no_wait: bool) -> Result<()> {
    let client = ApiClient::new(url);
    let request = StartRecordingRequest {
        output_path: output,
        bluetooth_device: bluetooth,
        ..Default::default()
    };

    let started = client.start(&request).await?;
    println!("{} armed -> {}", started.session_id, started.output_path.display());
    if no_wait {
        return Ok(());
    }

    // Poll until the capture is confirmed or gave up
    loop {
        let status = client.status(&started.session_id).await?;
        if status.state != SessionState::Armed {
            print_status(&status);
            return match status.notice() {
                Some(e @ SupervisorError::CaptureLaunchFailed(_)) => Err(e.into()),
                _ => Ok(()),
            };
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn stop(url: &str, id: Option<String>) -> Result<()> {
    let client = ApiClient::new(url);
    let id = resolve_session(&client, id).await?;

    let mut status = client.stop(&id).await?;
    while !status.state.is_terminal() {
        tokio::time::sleep(Duration::from_millis(200)).await;
        status = client.status(&id).await?;
    }

    print_status(&status);
    Ok(())
}

async fn status(url: &str, id: Option<String>) -> Result<()> {
    let client = ApiClient::new(url);
    let id = resolve_session(&client, id).await?;

    print_status(&client.status(&id).await?);
    Ok(())
}

async fn resolve_session(client: &ApiClient, id: Option<String>) -> Result<SessionId> {
    if let Some(id) = id {
        return Ok(SessionId::from(id));
    }
    match client.current().await? {
        Some(status) => Ok(status.session_id),
        None => Err(anyhow::anyhow!("No active session")),
    }
}

async fn devices(cfg: &Config) -> Result<()> {
    let devices = avfoundation::list_audio_devices(&cfg.capture.ffmpeg_path).await?;
    if devices.is_empty() {
        println!("No audio devices found. Ensure ffmpeg is installed with avfoundation support.");
    }
    for device in &devices {
        let label = cfg
            .capture
            .inputs
            .iter()
            .find(|input| device.name.contains(&input.device))
            .map(|input| format!("  ({})", input.label))
            .unwrap_or_default();
        println!("[{}] {}{}", device.index, device.name, label);
    }
    for input in &cfg.capture.inputs {
        if avfoundation::find_device(&devices, &input.device).is_none() {
            println!("missing: {} ({} will be skipped)", input.device, input.label);
        }
    }
    Ok(())
}

fn print_status(status: &SessionStatus) {
    println!("session:  {}", status.session_id);
    println!("state:    {}", status.state);
    println!("degraded: {}", status.degraded);
    if let Some(reason) = status.discard_reason {
        println!("reason:   {}", reason);
    }
    if status.duration_secs > 0.0 {
        println!("duration: {:.1}s", status.duration_secs);
    }
    let files: Vec<&PathBuf> = if !status.final_paths.is_empty() {
        status.final_paths.iter().collect()
    } else if !status.tracks.is_empty() {
        status.tracks.iter().map(|t| &t.path).collect()
    } else {
        vec![&status.output_path]
    };
    for file in files {
        println!("file:     {}", file.display());
    }
    if let Some(notice) = status.notice() {
        println!("note:     {}", notice);
    }
}
