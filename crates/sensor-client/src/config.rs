//! Client session configuration.

use std::path::PathBuf;
use std::time::Duration;

use sensor_protocol::{DEFAULT_COMMAND_SOCKET, DEFAULT_EVENT_SOCKET};

/// Configuration for a `SensorSession`.
///
/// # Example
///
/// ```rust
/// use sensor_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig {
///     command_socket: "/run/sensord.sock".into(),
///     receive_timeout: Duration::from_secs(2),
///     ..Default::default()
/// };
/// assert_eq!(config.process_name, ClientConfig::default().process_name);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Path of the daemon's command socket.
    pub command_socket: PathBuf,

    /// Path of the daemon's event socket.
    pub event_socket: PathBuf,

    /// Upper bound on one request/reply round trip.
    pub receive_timeout: Duration,

    /// How long shutting down the event listener may take before it is
    /// abandoned with a warning.
    pub listener_stop_timeout: Duration,

    /// Name reported to the daemon with `GET_ID`.
    pub process_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_socket: PathBuf::from(DEFAULT_COMMAND_SOCKET),
            event_socket: PathBuf::from(DEFAULT_EVENT_SOCKET),
            receive_timeout: Duration::from_secs(5),
            listener_stop_timeout: Duration::from_secs(1),
            process_name: default_process_name(),
        }
    }
}

impl ClientConfig {
    /// Configuration pointing at sockets inside `dir`, as laid out by tests
    /// and non-default daemon instances.
    pub fn with_socket_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            command_socket: dir.join("sensord.sock"),
            event_socket: dir.join("sensord_event.sock"),
            ..Self::default()
        }
    }
}

fn default_process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_dir_layout() {
        let config = ClientConfig::with_socket_dir("/tmp/x");
        assert_eq!(config.command_socket, PathBuf::from("/tmp/x/sensord.sock"));
        assert_eq!(config.event_socket, PathBuf::from("/tmp/x/sensord_event.sock"));
        assert_eq!(config.receive_timeout, Duration::from_secs(5));
        assert!(!config.process_name.is_empty());
    }
}
