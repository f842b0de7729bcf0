//! Sensor and event type identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Permission;

// ============================================================================
// Sensor Type
// ============================================================================

/// Kind of sensor served by the daemon.
///
/// Physical sensors occupy the low range; derived ("virtual") sensors whose
/// events are synthesized from other sensors start at `0x100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(i32)]
pub enum SensorType {
    Accelerometer = 1,
    Geomagnetic = 2,
    Light = 3,
    Proximity = 4,
    Gyroscope = 5,
    Pressure = 6,
    Temperature = 7,
    Gravity = 0x100,
    Orientation = 0x101,
    AutoRotation = 0x102,
}

impl SensorType {
    /// Every known sensor type, physical first.
    pub const ALL: [SensorType; 10] = [
        SensorType::Accelerometer,
        SensorType::Geomagnetic,
        SensorType::Light,
        SensorType::Proximity,
        SensorType::Gyroscope,
        SensorType::Pressure,
        SensorType::Temperature,
        SensorType::Gravity,
        SensorType::Orientation,
        SensorType::AutoRotation,
    ];

    /// Wire representation.
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Parses the wire representation.
    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_i32() == value)
    }

    /// Returns true for sensors whose events are derived from other sensors.
    pub const fn is_virtual(self) -> bool {
        (self as i32) >= 0x100
    }

    /// Short lowercase name used in logs and configuration.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Accelerometer => "accelerometer",
            Self::Geomagnetic => "geomagnetic",
            Self::Light => "light",
            Self::Proximity => "proximity",
            Self::Gyroscope => "gyroscope",
            Self::Pressure => "pressure",
            Self::Temperature => "temperature",
            Self::Gravity => "gravity",
            Self::Orientation => "orientation",
            Self::AutoRotation => "auto-rotation",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Event Type
// ============================================================================

/// Bit marking an event kind as a discrete state change.
const STATE_EVENT_FLAG: u32 = 0x8000;

/// Identifier of one stream of events produced by a sensor.
///
/// Encoded as `(sensor_type << 16) | kind`. Kinds with the state flag set are
/// discrete-state events (e.g. proximity near/far); the daemon caches the last
/// one so late subscribers can be brought up to date on start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(u32);

impl EventType {
    pub const ACCELEROMETER_RAW_DATA: EventType = EventType::data(SensorType::Accelerometer, 1);
    pub const GEOMAGNETIC_RAW_DATA: EventType = EventType::data(SensorType::Geomagnetic, 1);
    pub const LIGHT_LUX_DATA: EventType = EventType::data(SensorType::Light, 1);
    pub const PROXIMITY_DISTANCE_DATA: EventType = EventType::data(SensorType::Proximity, 1);
    pub const PROXIMITY_CHANGE_STATE: EventType = EventType::state(SensorType::Proximity, 1);
    pub const GYROSCOPE_RAW_DATA: EventType = EventType::data(SensorType::Gyroscope, 1);
    pub const PRESSURE_RAW_DATA: EventType = EventType::data(SensorType::Pressure, 1);
    pub const TEMPERATURE_RAW_DATA: EventType = EventType::data(SensorType::Temperature, 1);
    pub const GRAVITY_RAW_DATA: EventType = EventType::data(SensorType::Gravity, 1);
    pub const ORIENTATION_RAW_DATA: EventType = EventType::data(SensorType::Orientation, 1);
    pub const AUTO_ROTATION_CHANGE_STATE: EventType =
        EventType::state(SensorType::AutoRotation, 1);

    /// Creates a continuous data event type.
    pub const fn data(sensor: SensorType, kind: u16) -> Self {
        Self(((sensor as u32) << 16) | (kind as u32 & !STATE_EVENT_FLAG))
    }

    /// Creates a discrete state-change event type.
    pub const fn state(sensor: SensorType, kind: u16) -> Self {
        Self(((sensor as u32) << 16) | kind as u32 | STATE_EVENT_FLAG)
    }

    /// Wraps a raw wire value without validation.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Wire representation.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The sensor that produces this event, if known.
    pub fn sensor_type(self) -> Option<SensorType> {
        SensorType::from_i32((self.0 >> 16) as i32)
    }

    /// Returns true if the last event of this type should be replayed to
    /// clients that start listening after it was produced.
    pub const fn is_replayable(self) -> bool {
        self.0 & STATE_EVENT_FLAG != 0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sensor_type() {
            Some(sensor) => write!(f, "{}:{:#06x}", sensor, self.0 & 0xffff),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

// ============================================================================
// Attributes
// ============================================================================

/// Attribute identifiers for `SET_ATTRIBUTE_INT` / `SET_ATTRIBUTE_STR`.
pub mod attribute {
    /// Axis orientation of reported values (device vs. display frame).
    pub const AXIS_ORIENTATION: i32 = 1;
    /// Opaque string configuration blob forwarded to the module.
    pub const CONFIG_BLOB: i32 = 2;
    /// Whether the client wants events delivered while the system sleeps.
    /// Handled by the daemon itself rather than the sensor module.
    pub const WAKEUP: i32 = 0x10;
}

// ============================================================================
// Sensor Info
// ============================================================================

/// Static description of a sensor, as returned by `GET_SENSOR_LIST`.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorInfo {
    pub sensor_type: SensorType,
    pub name: String,
    pub vendor: String,
    pub min_range: f32,
    pub max_range: f32,
    pub resolution: f32,
    /// Shortest supported sampling interval in microseconds.
    pub min_interval_us: u32,
    pub max_batch_count: u32,
    pub wakeup_supported: bool,
    pub permission: Permission,
    pub event_types: Vec<EventType>,
}

impl SensorInfo {
    /// Creates a description with neutral ranges and standard permission.
    pub fn new(sensor_type: SensorType, name: impl Into<String>) -> Self {
        Self {
            sensor_type,
            name: name.into(),
            vendor: String::new(),
            min_range: 0.0,
            max_range: 0.0,
            resolution: 0.0,
            min_interval_us: 10_000,
            max_batch_count: 0,
            wakeup_supported: false,
            permission: Permission::STANDARD,
            event_types: Vec::new(),
        }
    }

    /// Returns true if the sensor emits the given event type.
    pub fn supports_event(&self, event_type: EventType) -> bool {
        self.event_types.contains(&event_type)
    }
}
