//! Screen auto-rotation derived from the accelerometer.
//!
//! Emits a discrete state event only when the rotation changes. The event is
//! replay-eligible, so late subscribers learn the current rotation on start.

use sensor_core::{
    EventType, ModuleError, ModuleResult, SensorData, SensorEvent, SensorInfo, SensorType,
};

use super::VirtualSensor;

const INPUTS: &[SensorType] = &[SensorType::Accelerometer];

/// Tilt (degrees from a rotation's centre) within which it is adopted.
const CAPTURE_DEGREES: f32 = 30.0;

/// Below this planar magnitude the device lies flat and rotation is kept.
const FLAT_THRESHOLD: f32 = 3.0;

/// Display rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Portrait = 0,
    LandscapeLeft = 1,
    PortraitInverted = 2,
    LandscapeRight = 3,
}

impl Rotation {
    const ALL: [Rotation; 4] = [
        Rotation::Portrait,
        Rotation::LandscapeLeft,
        Rotation::PortraitInverted,
        Rotation::LandscapeRight,
    ];

    fn centre_degrees(self) -> f32 {
        (self as i32 as f32) * 90.0
    }

    /// Rotation whose capture zone contains `x`/`y`, if any.
    fn from_planar(x: f32, y: f32) -> Option<Self> {
        if x.hypot(y) < FLAT_THRESHOLD {
            return None;
        }
        let angle = x.atan2(y).to_degrees().rem_euclid(360.0);
        Self::ALL.into_iter().find(|r| {
            let delta = (angle - r.centre_degrees()).rem_euclid(360.0);
            delta.min(360.0 - delta) <= CAPTURE_DEGREES
        })
    }
}

pub struct AutoRotationSensor {
    current: Option<Rotation>,
    latest: SensorData,
}

impl AutoRotationSensor {
    pub fn new() -> Self {
        Self {
            current: None,
            latest: SensorData::default(),
        }
    }
}

impl Default for AutoRotationSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualSensor for AutoRotationSensor {
    fn info(&self) -> SensorInfo {
        let mut info = SensorInfo::new(SensorType::AutoRotation, "auto-rotation");
        info.vendor = "sensord".to_string();
        info.max_range = 3.0;
        info.resolution = 1.0;
        info.event_types = vec![EventType::AUTO_ROTATION_CHANGE_STATE];
        info
    }

    fn inputs(&self) -> &'static [SensorType] {
        INPUTS
    }

    fn synthesize(&mut self, event: &SensorEvent) -> Vec<SensorEvent> {
        if event.event_type != EventType::ACCELEROMETER_RAW_DATA {
            return Vec::new();
        }
        let Some(rotation) = Rotation::from_planar(event.data.value(0), event.data.value(1))
        else {
            return Vec::new();
        };
        if self.current == Some(rotation) {
            return Vec::new();
        }

        self.current = Some(rotation);
        self.latest = SensorData::new(
            event.data.timestamp,
            event.data.accuracy,
            &[rotation as i32 as f32],
        );
        vec![SensorEvent::new(
            EventType::AUTO_ROTATION_CHANGE_STATE,
            self.latest.clone(),
        )]
    }

    fn sensor_data(&self, event_type: EventType) -> ModuleResult<SensorData> {
        if event_type != EventType::AUTO_ROTATION_CHANGE_STATE {
            return Err(ModuleError::Unsupported);
        }
        if !self.latest.is_valid() {
            return Err(ModuleError::NoData);
        }
        Ok(self.latest.clone())
    }

    fn reset(&mut self) {
        self.current = None;
        self.latest = SensorData::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accel(ts: u64, x: f32, y: f32) -> SensorEvent {
        SensorEvent::new(
            EventType::ACCELEROMETER_RAW_DATA,
            SensorData::new(ts, 3, &[x, y, 0.5]),
        )
    }

    #[test]
    fn test_rotation_zones() {
        assert_eq!(Rotation::from_planar(0.0, 9.8), Some(Rotation::Portrait));
        assert_eq!(Rotation::from_planar(9.8, 0.0), Some(Rotation::LandscapeLeft));
        assert_eq!(
            Rotation::from_planar(0.0, -9.8),
            Some(Rotation::PortraitInverted)
        );
        assert_eq!(Rotation::from_planar(-9.8, 0.0), Some(Rotation::LandscapeRight));
        // 45 degrees sits between zones
        assert_eq!(Rotation::from_planar(6.9, 6.9), None);
        // flat on a table
        assert_eq!(Rotation::from_planar(0.5, 0.5), None);
    }

    #[test]
    fn test_emits_only_on_change() {
        let mut sensor = AutoRotationSensor::new();
        assert_eq!(sensor.synthesize(&accel(1, 0.0, 9.8)).len(), 1);
        assert!(sensor.synthesize(&accel(2, 0.5, 9.7)).is_empty());

        let turned = sensor.synthesize(&accel(3, 9.8, 0.0));
        assert_eq!(turned.len(), 1);
        assert_eq!(turned[0].data.value(0), 1.0);
        assert!(turned[0].event_type.is_replayable());
    }

    #[test]
    fn test_ambiguous_tilt_keeps_rotation() {
        let mut sensor = AutoRotationSensor::new();
        sensor.synthesize(&accel(1, 0.0, 9.8));
        assert!(sensor.synthesize(&accel(2, 6.9, 6.9)).is_empty());
        let data = sensor
            .sensor_data(EventType::AUTO_ROTATION_CHANGE_STATE)
            .unwrap();
        assert_eq!(data.value(0), 0.0);
    }
}
