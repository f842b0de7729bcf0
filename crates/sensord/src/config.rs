//! Daemon configuration.
//!
//! Loaded from an optional TOML file (default
//! `$XDG_CONFIG_HOME/sensord/sensord.toml`). Every key has a default, so an
//! empty or missing file yields a working daemon with simulated sensors.
//!
//! ```toml
//! command_socket = "/run/sensord.sock"
//! event_socket = "/run/sensord_event.sock"
//! ingest_capacity = 1024
//! listener_queue_capacity = 256
//! privileged_uids = [0, 1000]
//! virtual_sensors = ["gravity", "auto-rotation", "orientation"]
//!
//! [[sensor]]
//! type = "accelerometer"
//! min_interval_us = 5000
//!
//! [[sensor]]
//! type = "proximity"
//! permission = "bio"
//! ```
//!
//! `SENSORD_COMMAND_SOCKET` / `SENSORD_EVENT_SOCKET` override the socket paths.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use sensor_core::{Permission, SensorType};
use sensor_protocol::{DEFAULT_COMMAND_SOCKET, DEFAULT_EVENT_SOCKET};

pub const COMMAND_SOCKET_ENV: &str = "SENSORD_COMMAND_SOCKET";
pub const EVENT_SOCKET_ENV: &str = "SENSORD_EVENT_SOCKET";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default = "default_command_socket")]
    pub command_socket: PathBuf,

    #[serde(default = "default_event_socket")]
    pub event_socket: PathBuf,

    /// Bound of the sensor → dispatcher ingestion queue.
    #[serde(default = "default_ingest_capacity")]
    pub ingest_capacity: usize,

    /// Frames buffered per client event channel before events are dropped.
    #[serde(default = "default_listener_queue_capacity")]
    pub listener_queue_capacity: usize,

    /// Peer uids granted every permission (root always is).
    #[serde(default)]
    pub privileged_uids: Vec<u32>,

    #[serde(rename = "sensor", default = "default_sensors")]
    pub sensors: Vec<SensorConfig>,

    #[serde(default = "default_virtual_sensors")]
    pub virtual_sensors: Vec<SensorType>,
}

/// One simulated physical sensor.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    #[serde(rename = "type")]
    pub sensor_type: SensorType,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub min_interval_us: Option<u32>,

    /// `none`, `standard`, `bio` or `all`.
    #[serde(default)]
    pub permission: Option<String>,
}

impl SensorConfig {
    pub fn new(sensor_type: SensorType) -> Self {
        Self {
            sensor_type,
            name: None,
            min_interval_us: None,
            permission: None,
        }
    }

    pub fn permission(&self) -> Result<Permission, ConfigError> {
        match &self.permission {
            None => Ok(Permission::STANDARD),
            Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: format!("sensor.{}.permission", self.sensor_type),
                reason: format!("{e}"),
            }),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            command_socket: default_command_socket(),
            event_socket: default_event_socket(),
            ingest_capacity: default_ingest_capacity(),
            listener_queue_capacity: default_listener_queue_capacity(),
            privileged_uids: Vec::new(),
            sensors: default_sensors(),
            virtual_sensors: default_virtual_sensors(),
        }
    }
}

impl DaemonConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sensord").join("sensord.toml"))
    }

    /// Applies socket path overrides from the environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var_os(COMMAND_SOCKET_ENV).map(PathBuf::from),
            std::env::var_os(EVENT_SOCKET_ENV).map(PathBuf::from),
        );
    }

    fn apply_overrides(&mut self, command: Option<PathBuf>, event: Option<PathBuf>) {
        if let Some(path) = command {
            self.command_socket = path;
        }
        if let Some(path) = event {
            self.event_socket = path;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ingest_capacity".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.listener_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "listener_queue_capacity".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.command_socket == self.event_socket {
            return Err(ConfigError::InvalidValue {
                key: "event_socket".to_string(),
                reason: "must differ from command_socket".to_string(),
            });
        }
        for sensor in &self.sensors {
            if sensor.sensor_type.is_virtual() {
                return Err(ConfigError::InvalidValue {
                    key: "sensor.type".to_string(),
                    reason: format!("{} is a virtual sensor", sensor.sensor_type),
                });
            }
            sensor.permission()?;
        }
        if let Some(t) = self.virtual_sensors.iter().find(|t| !t.is_virtual()) {
            return Err(ConfigError::InvalidValue {
                key: "virtual_sensors".to_string(),
                reason: format!("{t} is not a virtual sensor"),
            });
        }
        Ok(())
    }
}

// Default value functions
fn default_command_socket() -> PathBuf {
    PathBuf::from(DEFAULT_COMMAND_SOCKET)
}
fn default_event_socket() -> PathBuf {
    PathBuf::from(DEFAULT_EVENT_SOCKET)
}
fn default_ingest_capacity() -> usize {
    1024
}
fn default_listener_queue_capacity() -> usize {
    256
}
fn default_sensors() -> Vec<SensorConfig> {
    [
        SensorType::Accelerometer,
        SensorType::Geomagnetic,
        SensorType::Light,
        SensorType::Proximity,
        SensorType::Gyroscope,
    ]
    .into_iter()
    .map(SensorConfig::new)
    .collect()
}
fn default_virtual_sensors() -> Vec<SensorType> {
    vec![
        SensorType::Gravity,
        SensorType::AutoRotation,
        SensorType::Orientation,
    ]
}
