//! Client and sensor records, and the per-client event sink.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use tokio::sync::mpsc;

use sensor_core::{EventType, SensorOption, SensorState, SensorType, Situation};

/// Server-side subscription state of one (client, sensor) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorRecord {
    pub state: SensorState,
    pub option: SensorOption,
    /// Batch interval in microseconds; zero when unset.
    pub interval_us: u32,
    pub latency_us: u32,
    pub events: BTreeSet<EventType>,
    /// Deliver while the system sleeps.
    pub wakeup: bool,
}

impl SensorRecord {
    /// True if `event_type` should currently be delivered under `situation`.
    pub fn accepts(&self, event_type: EventType, situation: Situation) -> bool {
        self.state == SensorState::Started
            && self.events.contains(&event_type)
            && self.option.permits(situation)
    }

    /// Resets to the state of a freshly opened sensor.
    pub(crate) fn clear_subscription(&mut self) {
        self.state = SensorState::Stopped;
        self.option = SensorOption::Default;
        self.events.clear();
    }
}

/// Bounded queue of encoded event frames feeding one client's event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    id: u64,
    tx: mpsc::Sender<Bytes>,
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The client is not draining its event channel fast enough.
    Full,
    /// The event channel is gone.
    Closed,
}

impl EventSink {
    pub fn new(id: u64, tx: mpsc::Sender<Bytes>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queues one frame without waiting.
    pub fn try_send(&self, frame: Bytes) -> Result<(), SinkError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Everything the daemon knows about one client process.
#[derive(Debug)]
pub struct ClientRecord {
    pub pid: i32,
    pub name: String,
    pub sensors: HashMap<SensorType, SensorRecord>,
    pub sink: Option<EventSink>,
}

impl ClientRecord {
    pub fn new(pid: i32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            sensors: HashMap::new(),
            sink: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_requires_started_registered_and_permitted() {
        let mut record = SensorRecord::default();
        let event = EventType::ACCELEROMETER_RAW_DATA;
        record.events.insert(event);
        assert!(!record.accepts(event, Situation::ScreenOn));

        record.state = SensorState::Started;
        assert!(record.accepts(event, Situation::ScreenOn));
        assert!(!record.accepts(event, Situation::ScreenOff));
        assert!(!record.accepts(EventType::LIGHT_LUX_DATA, Situation::ScreenOn));

        record.option = SensorOption::AlwaysOn;
        assert!(record.accepts(event, Situation::ScreenOff));
    }

    #[test]
    fn test_sink_full_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let sink = EventSink::new(1, tx);
        assert!(sink.try_send(Bytes::from_static(b"a")).is_ok());
        assert_eq!(sink.try_send(Bytes::from_static(b"b")), Err(SinkError::Full));
        drop(rx);
        assert_eq!(sink.try_send(Bytes::from_static(b"c")), Err(SinkError::Closed));
    }
}
