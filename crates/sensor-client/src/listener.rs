//! Process-wide event listener.
//!
//! One task per session reads the event channel and hands every event to the
//! handles entitled to it. Entitlement is decided under the session lock;
//! callbacks run after the lock is released, so a slow callback never holds up
//! a control call.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use sensor_core::{Handle, SensorEvent, SensorState};

use crate::channel::EventChannel;
use crate::handle::{AccuracyCallback, EventCallback};
use crate::session::SessionState;

/// Handle to the running listener task.
pub(crate) struct EventListener {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl EventListener {
    pub(crate) fn spawn(channel: EventChannel, state: Weak<Mutex<SessionState>>) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(channel, state, cancel.clone()));
        Self { cancel, task }
    }

    /// Cancels the task and waits up to `limit` for it to finish.
    ///
    /// A task that does not finish in time is aborted and logged; this never
    /// fails the caller.
    pub(crate) async fn stop(mut self, limit: Duration) {
        self.cancel.cancel();
        match timeout(limit, &mut self.task).await {
            Ok(Ok(())) => debug!("Event listener stopped"),
            Ok(Err(e)) => warn!(error = %e, "Event listener task failed"),
            Err(_) => {
                warn!(timeout_ms = limit.as_millis() as u64, "Event listener did not stop in time");
                self.task.abort();
            }
        }
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(mut channel: EventChannel, state: Weak<Mutex<SessionState>>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            next = channel.recv() => match next {
                Ok(Some(event)) => event,
                Ok(None) => {
                    info!("Event channel closed by daemon");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Event channel failed");
                    break;
                }
            },
        };

        let Some(state) = state.upgrade() else {
            break;
        };
        let deliveries = tokio::select! {
            _ = cancel.cancelled() => break,
            mut guard = state.lock() => collect(&mut guard, &event),
        };
        drop(state);
        deliveries.invoke(&event);
    }
    debug!("Event listener exiting");
}

/// Callbacks owed for one event.
#[derive(Default)]
struct Deliveries {
    events: Vec<(Handle, EventCallback)>,
    accuracy: Vec<(Handle, AccuracyCallback)>,
}

impl Deliveries {
    fn invoke(self, event: &SensorEvent) {
        for (handle, callback) in self.accuracy {
            callback(handle, event.data.accuracy, event.timestamp());
        }
        for (handle, callback) in self.events {
            callback(handle, event);
        }
    }
}

/// Picks the started handles registered for `event` and updates their
/// throttling and accuracy state.
fn collect(state: &mut SessionState, event: &SensorEvent) -> Deliveries {
    let mut deliveries = Deliveries::default();
    let Some(sensor) = event.sensor_type() else {
        trace!(event_type = %event.event_type, "Event for unknown sensor");
        return deliveries;
    };

    for (handle, entry) in state.handles.iter_mut() {
        if entry.sensor != sensor || entry.state != SensorState::Started {
            continue;
        }
        let Some(registration) = entry.registrations.get_mut(&event.event_type) else {
            continue;
        };
        if !registration.admit(event.timestamp()) {
            continue;
        }
        deliveries.events.push((handle, registration.callback.clone()));

        if entry.last_accuracy != Some(event.data.accuracy) {
            entry.last_accuracy = Some(event.data.accuracy);
            if let Some(callback) = &entry.accuracy_callback {
                deliveries.accuracy.push((handle, callback.clone()));
            }
        }
    }
    deliveries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Registration;
    use sensor_core::{EventType, SensorData, SensorType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> EventCallback {
        let counter = counter.clone();
        Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn lux(timestamp: u64, accuracy: i32) -> SensorEvent {
        SensorEvent::new(
            EventType::LIGHT_LUX_DATA,
            SensorData::new(timestamp, accuracy, &[120.0]),
        )
    }

    #[test]
    fn test_only_started_handles_receive() {
        let mut state = SessionState::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let started = state.handles.insert(SensorType::Light).unwrap();
        let paused = state.handles.insert(SensorType::Light).unwrap();
        for (handle, run_state) in [(started, SensorState::Started), (paused, SensorState::Paused)] {
            let entry = state.handles.get_mut(handle).unwrap();
            entry.state = run_state;
            entry
                .registrations
                .insert(EventType::LIGHT_LUX_DATA, Registration::new(0, 0, false, counting(&hits)));
        }

        let event = lux(10, 0);
        let deliveries = collect(&mut state, &event);
        assert_eq!(deliveries.events.len(), 1);
        assert_eq!(deliveries.events[0].0, started);
        deliveries.invoke(&event);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_accuracy_callback_fires_on_change() {
        let mut state = SessionState::default();
        let changes = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let handle = state.handles.insert(SensorType::Light).unwrap();
        {
            let entry = state.handles.get_mut(handle).unwrap();
            entry.state = SensorState::Started;
            entry.registrations.insert(
                EventType::LIGHT_LUX_DATA,
                Registration::new(0, 0, false, Arc::new(|_, _| {})),
            );
            let sink = changes.clone();
            entry.accuracy_callback = Some(Arc::new(move |_, accuracy, _| sink.lock().push(accuracy)));
        }

        for (ts, accuracy) in [(1, 2), (2, 2), (3, 3), (4, 3), (5, 2)] {
            let event = lux(ts, accuracy);
            collect(&mut state, &event).invoke(&event);
        }
        assert_eq!(*changes.lock(), vec![2, 3, 2]);
    }

    #[test]
    fn test_other_sensors_ignored() {
        let mut state = SessionState::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = state.handles.insert(SensorType::Accelerometer).unwrap();
        let entry = state.handles.get_mut(handle).unwrap();
        entry.state = SensorState::Started;
        entry.registrations.insert(
            EventType::ACCELEROMETER_RAW_DATA,
            Registration::new(0, 0, false, counting(&hits)),
        );

        assert!(collect(&mut state, &lux(1, 0)).events.is_empty());
    }
}
