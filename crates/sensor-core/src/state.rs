//! Subscription state, delivery options and environmental gating.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery policy of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(i32)]
pub enum SensorOption {
    /// Delivery is suspended while the situation gates it (e.g. screen off).
    #[default]
    Default = 0,
    /// Delivery is never gated.
    AlwaysOn = 1,
}

impl SensorOption {
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Default),
            1 => Some(Self::AlwaysOn),
            _ => None,
        }
    }

    /// Returns true if events may be delivered under `situation`.
    pub fn permits(self, situation: Situation) -> bool {
        match self {
            Self::AlwaysOn => true,
            Self::Default => !situation.gates_default(),
        }
    }
}

/// Run state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(i32)]
pub enum SensorState {
    #[default]
    Stopped = 0,
    Started = 1,
    /// Started by the application but suspended while the system saves power.
    Paused = 2,
}

impl SensorState {
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Stopped),
            1 => Some(Self::Started),
            2 => Some(Self::Paused),
            _ => None,
        }
    }
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Started => write!(f, "started"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Environmental condition that gates delivery to `Default`-option listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Situation {
    #[default]
    ScreenOn,
    ScreenOff,
}

impl Situation {
    pub const fn gates_default(self) -> bool {
        matches!(self, Self::ScreenOff)
    }
}

impl fmt::Display for Situation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScreenOn => write!(f, "screen-on"),
            Self::ScreenOff => write!(f, "screen-off"),
        }
    }
}

/// System power state observed by client sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerState {
    #[default]
    Normal,
    PowerSaving,
}

impl PowerState {
    /// Run state a `Default`-option handle that the application started
    /// should be in under this power state.
    pub const fn desired_run_state(self) -> SensorState {
        match self {
            Self::Normal => SensorState::Started,
            Self::PowerSaving => SensorState::Paused,
        }
    }
}
