//! Catalog of sensor modules served by the daemon.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use sensor_core::{SensorInfo, SensorType};

use super::{SensorModule, SimulatedSensor, Waveform};
use crate::config::{ConfigError, DaemonConfig};
use crate::dispatcher::IngestSender;
use crate::virtual_sensor::{reference_sensor, VirtualSensor, VirtualSensorModule};

/// All sensor modules, keyed by sensor type.
#[derive(Default)]
pub struct SensorCatalog {
    modules: BTreeMap<SensorType, Arc<dyn SensorModule>>,
    virtuals: Vec<Arc<VirtualSensorModule>>,
}

impl SensorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a physical module, replacing any module of the same type.
    pub fn insert(&mut self, module: Arc<dyn SensorModule>) {
        let sensor_type = module.sensor_type();
        if self.modules.insert(sensor_type, module).is_some() {
            warn!(sensor = %sensor_type, "Replaced existing sensor module");
        }
    }

    /// Adds a virtual sensor, wiring it to the already-registered inputs.
    ///
    /// Returns the missing input type if one of its inputs is not present.
    pub fn insert_virtual(&mut self, sensor: Box<dyn VirtualSensor>) -> Result<(), SensorType> {
        let mut inputs = Vec::with_capacity(sensor.inputs().len());
        for input in sensor.inputs() {
            match self.modules.get(input) {
                Some(module) => inputs.push(Arc::clone(module)),
                None => return Err(*input),
            }
        }
        let module = Arc::new(VirtualSensorModule::new(sensor, inputs));
        self.modules
            .insert(module.sensor_type(), Arc::clone(&module) as Arc<dyn SensorModule>);
        self.virtuals.push(module);
        Ok(())
    }

    pub fn get(&self, sensor_type: SensorType) -> Option<Arc<dyn SensorModule>> {
        self.modules.get(&sensor_type).cloned()
    }

    /// Virtual sensors in registration order.
    pub fn virtuals(&self) -> &[Arc<VirtualSensorModule>] {
        &self.virtuals
    }

    /// Descriptions of every served sensor, physical first.
    pub fn sensor_list(&self) -> Vec<SensorInfo> {
        self.modules.values().map(|m| m.info().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Builds simulated sensors and reference virtual sensors from config.
    pub fn from_config(config: &DaemonConfig, ingest: &IngestSender) -> Result<Self, ConfigError> {
        let mut catalog = Self::new();

        for sensor in &config.sensors {
            let sensor_type = sensor.sensor_type;
            let Some(waveform) = Waveform::for_sensor(sensor_type) else {
                return Err(ConfigError::InvalidValue {
                    key: "sensor.type".to_string(),
                    reason: format!("{sensor_type} is not a physical sensor"),
                });
            };
            let name = sensor.name.as_deref().unwrap_or(sensor_type.name());
            let mut info = Waveform::default_info(sensor_type, name);
            if let Some(min_interval) = sensor.min_interval_us {
                info.min_interval_us = min_interval;
            }
            info.permission = sensor.permission()?;
            catalog.insert(Arc::new(SimulatedSensor::new(info, waveform, ingest.clone())));
        }

        for sensor_type in &config.virtual_sensors {
            let Some(sensor) = reference_sensor(*sensor_type) else {
                return Err(ConfigError::InvalidValue {
                    key: "virtual_sensors".to_string(),
                    reason: format!("{sensor_type} is not a virtual sensor"),
                });
            };
            if let Err(missing) = catalog.insert_virtual(sensor) {
                warn!(
                    sensor = %sensor_type,
                    missing = %missing,
                    "Skipping virtual sensor with missing input"
                );
            }
        }

        info!(
            sensors = catalog.len(),
            virtual_sensors = catalog.virtuals.len(),
            "Sensor catalog ready"
        );
        Ok(catalog)
    }
}
