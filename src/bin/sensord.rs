//! Sensor Daemon - owns the sensors and serves client sessions
//!
//! This binary runs the command and event sockets, the event dispatcher and
//! the configured simulated sensor modules.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! sensord start
//!
//! # Start the daemon (background/daemonized) with a config file
//! sensord start -d --config /etc/sensord.toml
//!
//! # Stop the daemon
//! sensord stop
//!
//! # Check daemon status
//! sensord status
//! ```
//!
//! While running, `SIGUSR1` switches the delivery situation to screen-off and
//! `SIGUSR2` back to screen-on.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sensor_core::Situation;
use sensord::context::spawn_dispatcher;
use sensord::dispatcher::ingest_channel;
use sensord::module::SensorCatalog;
use sensord::permission::UidPermissionChecker;
use sensord::server::SensorServer;
use sensord::situation::SituationSource;
use sensord::{DaemonConfig, DaemonContext};

/// Sensor daemon - device sensors over local sockets
#[derive(Parser, Debug)]
#[command(name = "sensord", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Configuration file (defaults to $XDG_CONFIG_HOME/sensord/sensord.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("sensord")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("sensord.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("sensord.log")
}

fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<DaemonConfig> {
    let mut config = match path {
        Some(path) if !path.exists() => bail!("Config file {} does not exist", path.display()),
        Some(path) => DaemonConfig::load(path)?,
        None => match DaemonConfig::default_path() {
            Some(path) => DaemonConfig::load(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => DaemonConfig::default(),
        },
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
    });

    match command {
        Command::Start { daemon, config } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'sensord stop' to stop it first.");
                process::exit(1);
            }

            // Fail on a bad config before forking.
            let config = load_config(config.as_deref())?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(config);

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");

                let config = load_config(None).unwrap_or_default();
                for path in [&config.command_socket, &config.event_socket] {
                    if path.exists() {
                        println!("Socket: {}", path.display());
                    }
                }

                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sensord=info".parse()?)
                .add_directive("sensor_core=info".parse()?)
                .add_directive("sensor_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Sensor daemon starting"
    );

    let cancel_token = CancellationToken::new();
    let situation = Arc::new(SituationSource::new(Situation::ScreenOn));

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let situation_source = Arc::clone(&situation);
    let situation_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = follow_situation_signals(situation_source, situation_token).await {
            warn!(error = %e, "Situation signals unavailable");
        }
    });

    let (ingest, ingest_rx) = ingest_channel(config.ingest_capacity);
    let catalog = SensorCatalog::from_config(&config, &ingest)?;
    info!(sensors = catalog.len(), "Sensor catalog ready");

    let ctx = Arc::new(
        DaemonContext::new(
            catalog,
            Box::new(UidPermissionChecker::new(config.privileged_uids.iter().copied())),
            situation.subscribe(),
        )
        .with_listener_queue_capacity(config.listener_queue_capacity),
    );

    let dispatcher = spawn_dispatcher(Arc::clone(&ctx), ingest_rx, cancel_token.clone());
    info!("Event dispatcher started");

    let server = SensorServer::new(
        config.command_socket.clone(),
        config.event_socket.clone(),
        ctx,
        cancel_token.clone(),
    );

    info!(
        command_socket = %config.command_socket.display(),
        event_socket = %config.event_socket.display(),
        "Starting server"
    );

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        cancel_token.cancel();
        return Err(e.into());
    }

    if dispatcher.await.is_err() {
        warn!("Event dispatcher ended abnormally");
    }

    info!("Sensor daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}

/// Maps `SIGUSR1`/`SIGUSR2` to screen-off/screen-on.
async fn follow_situation_signals(
    situation: Arc<SituationSource>,
    cancel: CancellationToken,
) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut screen_off = signal(SignalKind::user_defined1())?;
    let mut screen_on = signal(SignalKind::user_defined2())?;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = screen_off.recv() => Situation::ScreenOff,
            _ = screen_on.recv() => Situation::ScreenOn,
        };
        situation.set(next);
    }
}
