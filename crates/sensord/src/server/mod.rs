//! Unix socket server for the sensor daemon.
//!
//! The server:
//! - Listens on the command socket and spawns a `CommandWorker` per connection
//! - Listens on the event socket and runs an event channel per client process
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        SensorServer          │
//! │                              │
//! │ command UnixListener         │──accept──▶ CommandWorker (per connection)
//! │ event   UnixListener         │──accept──▶ event channel (per process)
//! └──────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and allow continued operation

mod event_channel;
mod worker;

pub use event_channel::EventChannelError;
pub use worker::{CommandWorker, WorkerError};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock;
use crate::context::DaemonContext;

/// Socket server serving the command and event sockets.
pub struct SensorServer {
    command_path: PathBuf,
    event_path: PathBuf,
    ctx: Arc<DaemonContext>,
    cancel_token: CancellationToken,
    connection_counter: AtomicU64,
}

impl SensorServer {
    pub fn new(
        command_path: impl Into<PathBuf>,
        event_path: impl Into<PathBuf>,
        ctx: Arc<DaemonContext>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            command_path: command_path.into(),
            event_path: event_path.into(),
            ctx,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        }
    }

    pub fn command_path(&self) -> &Path {
        &self.command_path
    }

    pub fn event_path(&self) -> &Path {
        &self.event_path
    }

    /// Runs the server until the cancellation token is triggered.
    pub async fn run(&self) -> Result<(), ServerError> {
        clock::start();
        let command_listener = bind(&self.command_path)?;
        let event_listener = match bind(&self.event_path) {
            Ok(listener) => listener,
            Err(e) => {
                remove_socket(&self.command_path);
                return Err(e);
            }
        };

        info!(
            command_socket = %self.command_path.display(),
            event_socket = %self.event_path.display(),
            sensors = self.ctx.catalog.len(),
            "Sensor server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = command_listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => self.spawn_worker(stream),
                        Err(e) => error!(error = %e, "Failed to accept command connection"),
                    }
                }

                result = event_listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => self.spawn_event_channel(stream),
                        Err(e) => error!(error = %e, "Failed to accept event connection"),
                    }
                }
            }
        }

        self.cleanup();
        Ok(())
    }

    fn spawn_worker(&self, stream: UnixStream) {
        let connection = self.connection_counter.fetch_add(1, Ordering::Relaxed);
        let ctx = Arc::clone(&self.ctx);
        let cancel_token = self.cancel_token.clone();
        tokio::spawn(async move {
            CommandWorker::new(stream, ctx, connection, cancel_token)
                .run()
                .await;
        });
    }

    fn spawn_event_channel(&self, stream: UnixStream) {
        let ctx = Arc::clone(&self.ctx);
        let cancel_token = self.cancel_token.clone();
        tokio::spawn(async move {
            if let Err(e) = event_channel::serve(stream, ctx, cancel_token).await {
                warn!(error = %e, "Event channel closed with error");
            }
        });
    }

    fn cleanup(&self) {
        remove_socket(&self.command_path);
        remove_socket(&self.event_path);
        info!("Server cleanup complete");
    }
}

fn bind(path: &Path) -> Result<UnixListener, ServerError> {
    let setup_error = |e: std::io::Error| ServerError::SocketSetup {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    if path.exists() {
        std::fs::remove_file(path).map_err(setup_error)?;
    }
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(setup_error)?;
        }
    }
    UnixListener::bind(path).map_err(setup_error)
}

fn remove_socket(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(socket = %path.display(), error = %e, "Failed to remove socket file");
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::SocketSetup {
            path: PathBuf::from("/tmp/test.sock"),
            error: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("/tmp/test.sock"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cmd.sock");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let first = bind(&path).unwrap();
            drop(first);
            assert!(path.exists());
            assert!(bind(&path).is_ok());
        });
    }
}
