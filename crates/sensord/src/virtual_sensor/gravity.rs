//! Gravity derived from the accelerometer with a low-pass filter.

use sensor_core::{
    EventType, ModuleError, ModuleResult, SensorData, SensorEvent, SensorInfo, SensorType,
};

use super::VirtualSensor;

/// Weight given to the previous estimate on each update.
const ALPHA: f32 = 0.8;

const INPUTS: &[SensorType] = &[SensorType::Accelerometer];

pub struct GravitySensor {
    estimate: Option<[f32; 3]>,
    latest: SensorData,
}

impl GravitySensor {
    pub fn new() -> Self {
        Self {
            estimate: None,
            latest: SensorData::default(),
        }
    }
}

impl Default for GravitySensor {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualSensor for GravitySensor {
    fn info(&self) -> SensorInfo {
        let mut info = SensorInfo::new(SensorType::Gravity, "gravity");
        info.vendor = "sensord".to_string();
        info.min_range = -19.6;
        info.max_range = 19.6;
        info.resolution = 0.01;
        info.event_types = vec![EventType::GRAVITY_RAW_DATA];
        info
    }

    fn inputs(&self) -> &'static [SensorType] {
        INPUTS
    }

    fn synthesize(&mut self, event: &SensorEvent) -> Vec<SensorEvent> {
        if event.event_type != EventType::ACCELEROMETER_RAW_DATA {
            return Vec::new();
        }
        let sample = [event.data.value(0), event.data.value(1), event.data.value(2)];
        let next = match self.estimate {
            None => sample,
            Some(prev) => [
                ALPHA * prev[0] + (1.0 - ALPHA) * sample[0],
                ALPHA * prev[1] + (1.0 - ALPHA) * sample[1],
                ALPHA * prev[2] + (1.0 - ALPHA) * sample[2],
            ],
        };
        self.estimate = Some(next);
        self.latest = SensorData::new(event.data.timestamp, event.data.accuracy, &next);
        vec![SensorEvent::new(
            EventType::GRAVITY_RAW_DATA,
            self.latest.clone(),
        )]
    }

    fn sensor_data(&self, event_type: EventType) -> ModuleResult<SensorData> {
        if event_type != EventType::GRAVITY_RAW_DATA {
            return Err(ModuleError::Unsupported);
        }
        if !self.latest.is_valid() {
            return Err(ModuleError::NoData);
        }
        Ok(self.latest.clone())
    }

    fn reset(&mut self) {
        self.estimate = None;
        self.latest = SensorData::default();
    }
}
