//! Sensor samples and events.

use crate::{EventType, SensorType};

/// Maximum number of values carried by one sample.
pub const MAX_VALUE_COUNT: usize = 16;

/// One sample produced by a sensor.
///
/// A zero `timestamp` means no sample has been produced yet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorData {
    /// Module-specific accuracy level (higher is better).
    pub accuracy: i32,
    /// Monotonic timestamp in microseconds.
    pub timestamp: u64,
    pub values: Vec<f32>,
}

impl SensorData {
    /// Creates a sample, truncating `values` to [`MAX_VALUE_COUNT`].
    pub fn new(timestamp: u64, accuracy: i32, values: &[f32]) -> Self {
        let len = values.len().min(MAX_VALUE_COUNT);
        Self {
            accuracy,
            timestamp,
            values: values.get(..len).unwrap_or_default().to_vec(),
        }
    }

    /// Returns true if this sample was actually produced by a sensor.
    pub fn is_valid(&self) -> bool {
        self.timestamp != 0
    }

    /// Returns the value at `index`, or 0.0 when absent.
    pub fn value(&self, index: usize) -> f32 {
        self.values.get(index).copied().unwrap_or(0.0)
    }
}

/// A sample tagged with the event stream it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorEvent {
    pub event_type: EventType,
    pub data: SensorData,
}

impl SensorEvent {
    pub fn new(event_type: EventType, data: SensorData) -> Self {
        Self { event_type, data }
    }

    pub fn timestamp(&self) -> u64 {
        self.data.timestamp
    }

    pub fn sensor_type(&self) -> Option<SensorType> {
        self.event_type.sensor_type()
    }
}
