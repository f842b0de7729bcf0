//! Simulated sensor backends.
//!
//! Each simulated sensor runs a poller thread while started. The thread
//! produces a deterministic waveform at the module's effective interval,
//! caches the sample for `GET_DATA`, and pushes events into the ingestion
//! queue. With a non-zero batch latency, events are held in a FIFO and
//! delivered together once the oldest has waited that long, or on `flush`.
//! Stopping the last reference joins the thread.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use sensor_core::{
    attribute, EventType, ModuleError, ModuleResult, SensorData, SensorEvent, SensorInfo,
    SensorType,
};

use super::{log_undo, ModuleCore, Requester, SensorModule};
use crate::clock::monotonic_us;
use crate::dispatcher::IngestSender;

/// Sampling period used while started without any interval request.
const DEFAULT_INTERVAL_US: u32 = 200_000;

/// Accuracy reported by every simulated sample.
const SIMULATED_ACCURACY: i32 = 3;

/// Standard gravity (m/s²).
const GRAVITY: f32 = 9.806_65;

/// Ticks between proximity near/far flips.
const PROXIMITY_FLIP_TICKS: u64 = 20;

// ============================================================================
// Waveforms
// ============================================================================

/// Deterministic signal generated by a simulated sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    /// Gravity vector of a device slowly rocking around its z axis.
    Tilt,
    /// Earth magnetic field rotating with the device.
    Compass,
    Illuminance,
    /// Object alternating between near and far.
    Proximity,
    Spin,
    Pressure,
    Temperature,
}

impl Waveform {
    /// Waveform used for a physical sensor type.
    pub fn for_sensor(sensor_type: SensorType) -> Option<Self> {
        match sensor_type {
            SensorType::Accelerometer => Some(Self::Tilt),
            SensorType::Geomagnetic => Some(Self::Compass),
            SensorType::Light => Some(Self::Illuminance),
            SensorType::Proximity => Some(Self::Proximity),
            SensorType::Gyroscope => Some(Self::Spin),
            SensorType::Pressure => Some(Self::Pressure),
            SensorType::Temperature => Some(Self::Temperature),
            SensorType::Gravity | SensorType::Orientation | SensorType::AutoRotation => None,
        }
    }

    /// Values produced at `tick`.
    pub fn sample(self, tick: u64) -> Vec<f32> {
        let phase = tick as f32 * 0.05;
        match self {
            Self::Tilt => {
                let angle = 1.2 * phase.sin();
                vec![GRAVITY * angle.sin(), GRAVITY * angle.cos(), 0.3]
            }
            Self::Compass => vec![22.0 * phase.cos(), 5.0 * phase.sin(), -40.0],
            Self::Illuminance => vec![300.0 + 200.0 * phase.sin()],
            Self::Proximity => {
                let near = (tick / PROXIMITY_FLIP_TICKS) % 2 == 1;
                vec![if near { 0.0 } else { 5.0 }]
            }
            Self::Spin => vec![0.1 * phase.sin(), 0.1 * phase.cos(), 0.0],
            Self::Pressure => vec![1013.25 + 0.5 * phase.sin()],
            Self::Temperature => vec![24.0 + 0.5 * phase.sin()],
        }
    }

    /// Default static description for a simulated sensor of this type.
    pub fn default_info(sensor_type: SensorType, name: &str) -> SensorInfo {
        let mut info = SensorInfo::new(sensor_type, name);
        info.vendor = "sensord-sim".to_string();
        let (min, max, resolution, events) = match sensor_type {
            SensorType::Accelerometer => (
                -2.0 * GRAVITY,
                2.0 * GRAVITY,
                0.01,
                vec![EventType::ACCELEROMETER_RAW_DATA],
            ),
            SensorType::Geomagnetic => (-1200.0, 1200.0, 0.1, vec![EventType::GEOMAGNETIC_RAW_DATA]),
            SensorType::Light => (0.0, 65535.0, 1.0, vec![EventType::LIGHT_LUX_DATA]),
            SensorType::Proximity => (
                0.0,
                5.0,
                5.0,
                vec![
                    EventType::PROXIMITY_DISTANCE_DATA,
                    EventType::PROXIMITY_CHANGE_STATE,
                ],
            ),
            SensorType::Gyroscope => (-34.9, 34.9, 0.001, vec![EventType::GYROSCOPE_RAW_DATA]),
            SensorType::Pressure => (260.0, 1260.0, 0.01, vec![EventType::PRESSURE_RAW_DATA]),
            SensorType::Temperature => (-40.0, 85.0, 0.1, vec![EventType::TEMPERATURE_RAW_DATA]),
            SensorType::Gravity | SensorType::Orientation | SensorType::AutoRotation => {
                (0.0, 0.0, 0.0, Vec::new())
            }
        };
        info.min_range = min;
        info.max_range = max;
        info.resolution = resolution;
        info.wakeup_supported = sensor_type == SensorType::Proximity;
        info.event_types = events;
        info
    }
}

// ============================================================================
// Simulated Sensor
// ============================================================================

enum PollerCommand {
    /// Deliver the batch held so far.
    Flush,
}

struct Poller {
    /// Dropping the sender wakes and stops the thread.
    commands: mpsc::Sender<PollerCommand>,
    handle: JoinHandle<()>,
}

/// Sensor module backed by a waveform generator thread.
pub struct SimulatedSensor {
    core: Arc<ModuleCore>,
    waveform: Waveform,
    ingest: IngestSender,
    poller: Mutex<Option<Poller>>,
}

impl SimulatedSensor {
    pub fn new(info: SensorInfo, waveform: Waveform, ingest: IngestSender) -> Self {
        Self {
            core: Arc::new(ModuleCore::new(info)),
            waveform,
            ingest,
            poller: Mutex::new(None),
        }
    }

    fn spawn_poller(&self) -> ModuleResult<()> {
        let (commands, command_rx) = mpsc::channel();
        let core = Arc::clone(&self.core);
        let waveform = self.waveform;
        let ingest = self.ingest.clone();
        let name = format!("sim-{}", core.info().sensor_type);

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || poll_loop(core, waveform, ingest, command_rx))
            .map_err(|e| ModuleError::StartFailed(e.to_string()))?;

        *self.poller.lock() = Some(Poller { commands, handle });
        Ok(())
    }

    fn join_poller(&self) {
        let poller = self.poller.lock().take();
        if let Some(Poller { commands, handle }) = poller {
            drop(commands);
            if handle.join().is_err() {
                warn!(sensor = %self.core.info().sensor_type, "Poller thread panicked");
            }
        }
    }
}

impl SensorModule for SimulatedSensor {
    fn info(&self) -> &SensorInfo {
        self.core.info()
    }

    fn start(&self) -> ModuleResult<()> {
        if self.core.acquire() {
            debug!(sensor = %self.core.info().sensor_type, "Powering on simulated sensor");
            if let Err(e) = self.spawn_poller() {
                log_undo(self.core.release(), self.core.info().sensor_type, "release");
                return Err(e);
            }
        }
        Ok(())
    }

    fn stop(&self) -> ModuleResult<()> {
        if self.core.release()? {
            debug!(sensor = %self.core.info().sensor_type, "Powering off simulated sensor");
            self.join_poller();
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.core.is_started()
    }

    fn add_interval(
        &self,
        requester: Requester,
        interval_us: u32,
        _is_batch: bool,
    ) -> ModuleResult<()> {
        self.core.add_interval(requester, interval_us)
    }

    fn delete_interval(&self, requester: Requester, _is_batch: bool) -> ModuleResult<()> {
        self.core.delete_interval(requester);
        Ok(())
    }

    fn add_batch(&self, requester: Requester, latency_us: u32) -> ModuleResult<()> {
        self.core.add_batch(requester, latency_us);
        Ok(())
    }

    fn delete_batch(&self, requester: Requester) -> ModuleResult<()> {
        self.core.delete_batch(requester);
        Ok(())
    }

    fn get_data(&self) -> ModuleResult<SensorData> {
        Ok(self.core.latest())
    }

    fn set_attribute_int(&self, attribute: i32, value: i32) -> ModuleResult<()> {
        match attribute {
            attribute::AXIS_ORIENTATION if matches!(value, 0 | 1) => {
                self.core.set_attribute_int(attribute, value);
                Ok(())
            }
            attribute::AXIS_ORIENTATION => Err(ModuleError::InvalidArgument(format!(
                "axis orientation must be 0 or 1, got {value}"
            ))),
            _ => Err(ModuleError::Unsupported),
        }
    }

    fn set_attribute_str(&self, attribute: i32, value: &[u8]) -> ModuleResult<()> {
        if attribute != attribute::CONFIG_BLOB {
            return Err(ModuleError::Unsupported);
        }
        self.core.set_config_blob(value);
        Ok(())
    }

    fn flush(&self) -> ModuleResult<()> {
        if !self.core.is_started() {
            return Err(ModuleError::NotStarted);
        }
        if let Some(poller) = self.poller.lock().as_ref() {
            if poller.commands.send(PollerCommand::Flush).is_err() {
                debug!(sensor = %self.core.info().sensor_type, "Poller already gone, nothing to flush");
            }
        }
        Ok(())
    }
}

impl Drop for SimulatedSensor {
    fn drop(&mut self) {
        self.join_poller();
    }
}

/// Hardware FIFO stand-in.
#[derive(Default)]
struct Batch {
    events: Vec<SensorEvent>,
    opened: Option<Instant>,
}

impl Batch {
    fn hold(&mut self, event: SensorEvent) {
        self.opened.get_or_insert_with(Instant::now);
        self.events.push(event);
    }

    /// True once the oldest held event has waited `latency_us`.
    fn is_due(&self, latency_us: u32) -> bool {
        match self.opened {
            Some(opened) => opened.elapsed() >= Duration::from_micros(u64::from(latency_us)),
            None => false,
        }
    }

    fn deliver(&mut self, ingest: &IngestSender) {
        self.opened = None;
        for event in self.events.drain(..) {
            ingest.push(event);
        }
    }
}

fn poll_loop(
    core: Arc<ModuleCore>,
    waveform: Waveform,
    ingest: IngestSender,
    commands: mpsc::Receiver<PollerCommand>,
) {
    let sensor_type = core.info().sensor_type;
    let Some(primary) = core.info().event_types.first().copied() else {
        warn!(sensor = %sensor_type, "Simulated sensor has no event types");
        return;
    };
    let mut tick: u64 = 0;
    let mut last_near: Option<bool> = None;
    let mut batch = Batch::default();

    loop {
        let period = core.interval_us().unwrap_or(DEFAULT_INTERVAL_US);
        match commands.recv_timeout(Duration::from_micros(u64::from(period))) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(PollerCommand::Flush) => {
                batch.deliver(&ingest);
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let mut values = waveform.sample(tick);
        if core.attribute_int(attribute::AXIS_ORIENTATION) == Some(1) && values.len() >= 2 {
            values.swap(0, 1);
        }
        let data = SensorData::new(monotonic_us(), SIMULATED_ACCURACY, &values);
        core.store(data.clone());
        batch.hold(SensorEvent::new(primary, data.clone()));

        if waveform == Waveform::Proximity {
            let near = data.value(0) < 1.0;
            if last_near != Some(near) {
                last_near = Some(near);
                let state = SensorData::new(data.timestamp, SIMULATED_ACCURACY, &[f32::from(u8::from(near))]);
                batch.hold(SensorEvent::new(EventType::PROXIMITY_CHANGE_STATE, state));
            }
        }

        if batch.is_due(core.latency_us()) {
            batch.deliver(&ingest);
        }
        tick = tick.wrapping_add(1);
    }
    batch.deliver(&ingest);

    debug!(sensor = %sensor_type, ticks = tick, "Poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ingest_channel;
    use sensor_core::ClientId;

    fn accel(ingest: IngestSender) -> SimulatedSensor {
        let mut info = Waveform::default_info(SensorType::Accelerometer, "accel0");
        info.min_interval_us = 1_000;
        SimulatedSensor::new(info, Waveform::Tilt, ingest)
    }

    #[test]
    fn test_waveform_is_deterministic() {
        assert_eq!(Waveform::Tilt.sample(7), Waveform::Tilt.sample(7));
        assert_eq!(Waveform::Proximity.sample(0), vec![5.0]);
        assert_eq!(Waveform::Proximity.sample(PROXIMITY_FLIP_TICKS), vec![0.0]);
    }

    #[test]
    fn test_virtual_types_have_no_waveform() {
        assert!(Waveform::for_sensor(SensorType::Gravity).is_none());
        assert_eq!(
            Waveform::for_sensor(SensorType::Light),
            Some(Waveform::Illuminance)
        );
    }

    #[tokio::test]
    async fn test_started_sensor_produces_samples() {
        let (ingest, mut rx) = ingest_channel(64);
        let sensor = accel(ingest);
        sensor
            .add_interval(Requester::Client(ClientId::new(1)), 2_000, true)
            .unwrap();
        sensor.start().unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("sample within timeout")
            .expect("queue open");
        assert_eq!(event.event_type, EventType::ACCELEROMETER_RAW_DATA);
        assert!(event.data.is_valid());
        assert!(sensor.get_data().unwrap().is_valid());

        sensor.stop().unwrap();
        assert!(!sensor.is_started());
        assert!(!sensor.get_data().unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_batch_latency_holds_events() {
        let (ingest, mut rx) = ingest_channel(1024);
        let sensor = accel(ingest);
        let client = Requester::Client(ClientId::new(1));
        sensor.add_interval(client, 2_000, true).unwrap();
        sensor.add_batch(client, 300_000).unwrap();
        sensor.start().unwrap();

        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err(),
            "events delivered before the batch latency elapsed"
        );

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("batch within timeout")
            .expect("queue open");
        assert_eq!(first.event_type, EventType::ACCELEROMETER_RAW_DATA);
        // the rest of the batch arrives together with the first event
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_ok());

        sensor.stop().unwrap();
    }

    #[tokio::test]
    async fn test_flush_delivers_held_batch() {
        let (ingest, mut rx) = ingest_channel(1024);
        let sensor = accel(ingest);
        let client = Requester::Client(ClientId::new(1));
        sensor.add_interval(client, 2_000, true).unwrap();
        sensor.add_batch(client, 10_000_000).unwrap();
        sensor.start().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        sensor.flush().unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("flushed batch within timeout")
            .expect("queue open");
        assert!(event.data.is_valid());

        sensor.stop().unwrap();
    }

    #[test]
    fn test_flush_requires_start() {
        let (ingest, _rx) = ingest_channel(4);
        let sensor = accel(ingest);
        assert_eq!(sensor.flush(), Err(ModuleError::NotStarted));
    }

    #[test]
    fn test_stop_without_start() {
        let (ingest, _rx) = ingest_channel(4);
        let sensor = accel(ingest);
        assert_eq!(sensor.stop(), Err(ModuleError::NotStarted));
    }

    #[test]
    fn test_attributes() {
        let (ingest, _rx) = ingest_channel(4);
        let sensor = accel(ingest);
        assert!(sensor.set_attribute_int(attribute::AXIS_ORIENTATION, 1).is_ok());
        assert!(sensor.set_attribute_int(attribute::AXIS_ORIENTATION, 9).is_err());
        assert_eq!(
            sensor.set_attribute_int(999, 1),
            Err(ModuleError::Unsupported)
        );
        assert!(sensor
            .set_attribute_str(attribute::CONFIG_BLOB, b"gain=2")
            .is_ok());
    }
}
