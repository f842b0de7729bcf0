//! Device orientation (azimuth, pitch, roll) from accelerometer and
//! magnetometer, using a tilt-compensated compass.

use sensor_core::{
    EventType, ModuleError, ModuleResult, SensorData, SensorEvent, SensorInfo, SensorType,
};

use super::VirtualSensor;

const INPUTS: &[SensorType] = &[SensorType::Accelerometer, SensorType::Geomagnetic];

/// Minimum |E × A| for a usable heading (free fall, or field parallel to gravity).
const MIN_HEADING_NORM: f32 = 0.1;

type Vec3 = [f32; 3];

fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(v: Vec3) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

fn scale(v: Vec3, k: f32) -> Vec3 {
    [v[0] * k, v[1] * k, v[2] * k]
}

fn vector(data: &SensorData) -> Vec3 {
    [data.value(0), data.value(1), data.value(2)]
}

/// Azimuth, pitch and roll in degrees, or `None` when undefined.
fn orientation(gravity: Vec3, field: Vec3) -> Option<Vec3> {
    let g_norm = norm(gravity);
    let east = cross(field, gravity);
    let east_norm = norm(east);
    if g_norm < f32::EPSILON || east_norm < MIN_HEADING_NORM {
        return None;
    }
    let a = scale(gravity, 1.0 / g_norm);
    let h = scale(east, 1.0 / east_norm);
    let m = cross(a, h);

    let azimuth = h[1].atan2(m[1]).to_degrees().rem_euclid(360.0);
    let pitch = (-a[1]).clamp(-1.0, 1.0).asin().to_degrees();
    let roll = (-a[0]).atan2(a[2]).to_degrees();
    Some([azimuth, pitch, roll])
}

pub struct OrientationSensor {
    accel: Option<SensorData>,
    field: Option<SensorData>,
    latest: SensorData,
}

impl OrientationSensor {
    pub fn new() -> Self {
        Self {
            accel: None,
            field: None,
            latest: SensorData::default(),
        }
    }
}

impl Default for OrientationSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualSensor for OrientationSensor {
    fn info(&self) -> SensorInfo {
        let mut info = SensorInfo::new(SensorType::Orientation, "orientation");
        info.vendor = "sensord".to_string();
        info.max_range = 360.0;
        info.resolution = 0.1;
        info.event_types = vec![EventType::ORIENTATION_RAW_DATA];
        info
    }

    fn inputs(&self) -> &'static [SensorType] {
        INPUTS
    }

    fn synthesize(&mut self, event: &SensorEvent) -> Vec<SensorEvent> {
        match event.event_type {
            EventType::ACCELEROMETER_RAW_DATA => self.accel = Some(event.data.clone()),
            EventType::GEOMAGNETIC_RAW_DATA => self.field = Some(event.data.clone()),
            _ => return Vec::new(),
        }
        let (Some(accel), Some(field)) = (&self.accel, &self.field) else {
            return Vec::new();
        };
        let Some(angles) = orientation(vector(accel), vector(field)) else {
            return Vec::new();
        };

        // the weaker input bounds the accuracy of the fused value
        let accuracy = accel.accuracy.min(field.accuracy);
        self.latest = SensorData::new(event.data.timestamp, accuracy, &angles);
        vec![SensorEvent::new(
            EventType::ORIENTATION_RAW_DATA,
            self.latest.clone(),
        )]
    }

    fn sensor_data(&self, event_type: EventType) -> ModuleResult<SensorData> {
        if event_type != EventType::ORIENTATION_RAW_DATA {
            return Err(ModuleError::Unsupported);
        }
        if !self.latest.is_valid() {
            return Err(ModuleError::NoData);
        }
        Ok(self.latest.clone())
    }

    fn reset(&mut self) {
        self.accel = None;
        self.field = None;
        self.latest = SensorData::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: EventType, ts: u64, v: Vec3) -> SensorEvent {
        SensorEvent::new(event_type, SensorData::new(ts, 3, &v))
    }

    #[test]
    fn test_flat_device_facing_north() {
        // flat on a table, field pointing north and down
        let angles = orientation([0.0, 0.0, 9.8], [0.0, 20.0, -40.0]).unwrap();
        assert!(angles[0] < 1.0 || angles[0] > 359.0, "azimuth {}", angles[0]);
        assert!(angles[1].abs() < 1.0);
        assert!(angles[2].abs() < 1.0);
    }

    #[test]
    fn test_upright_device_pitch() {
        let angles = orientation([0.0, 9.8, 0.0], [20.0, 0.0, -40.0]).unwrap();
        assert!((angles[1] + 90.0).abs() < 1.0, "pitch {}", angles[1]);
    }

    #[test]
    fn test_needs_both_inputs() {
        let mut sensor = OrientationSensor::new();
        assert!(sensor
            .synthesize(&event(EventType::ACCELEROMETER_RAW_DATA, 1, [0.0, 0.0, 9.8]))
            .is_empty());
        let derived =
            sensor.synthesize(&event(EventType::GEOMAGNETIC_RAW_DATA, 2, [0.0, 20.0, -40.0]));
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].data.timestamp, 2);
    }

    #[test]
    fn test_free_fall_has_no_heading() {
        assert!(orientation([0.0, 0.0, 0.0], [0.0, 20.0, -40.0]).is_none());
    }
}
