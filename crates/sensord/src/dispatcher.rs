//! Event Dispatcher.
//!
//! One task drains the bounded ingestion queue that sensor modules push into.
//! For every batch it:
//! 1. reads the current situation once
//! 2. offers each raw event to every virtual sensor
//! 3. merges raw and derived events and stable-sorts them by timestamp
//! 4. caches the latest event of each replay-eligible type
//! 5. fans each event out to the listeners entitled to it
//!
//! # Architecture
//!
//! ```text
//!  SensorModule ──push──▶ ┌────────────┐ ──▶ synthesize ──▶ sort ──▶ fan out ──▶ EventSink
//!  (threads)     try_send │ ingest (N) │                       │
//!                         └────────────┘                       └──▶ ReplayCache
//! ```
//!
//! Producers never block: when the queue is full the newest event is dropped.
//! A slow or dead listener only loses its own frames.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Send failures are logged and never abort the dispatch loop

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use sensor_core::{ClientId, EventType, SensorEvent, Situation};
use sensor_protocol::encode_event_frame;

use crate::context::DaemonContext;
use crate::registry::SinkError;

/// Maximum raw events drained into one dispatch batch.
pub const MAX_BATCH: usize = 64;

// ============================================================================
// Ingestion queue
// ============================================================================

/// Producer side of the ingestion queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct IngestSender {
    tx: mpsc::Sender<SensorEvent>,
    dropped: Arc<AtomicU64>,
}

impl IngestSender {
    /// Queues an event without blocking.
    ///
    /// Returns false if the event was dropped because the queue is full or
    /// the dispatcher is gone.
    pub fn push(&self, event: SensorEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    event_type = %event.event_type,
                    timestamp = event.data.timestamp,
                    dropped,
                    "Ingestion queue full, dropping newest event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("Ingestion queue closed");
                false
            }
        }
    }

    /// Events dropped on overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Creates the ingestion queue with room for `capacity` events.
pub fn ingest_channel(capacity: usize) -> (IngestSender, mpsc::Receiver<SensorEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = IngestSender {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sender, rx)
}

// ============================================================================
// Replay cache
// ============================================================================

/// Last event of every replay-eligible type.
#[derive(Debug, Default)]
pub struct ReplayCache {
    events: Mutex<HashMap<EventType, SensorEvent>>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `event` if its type is replay-eligible.
    pub fn remember(&self, event: &SensorEvent) {
        if event.event_type.is_replayable() {
            self.events.lock().insert(event.event_type, event.clone());
        }
    }

    pub fn get(&self, event_type: EventType) -> Option<SensorEvent> {
        self.events.lock().get(&event_type).cloned()
    }

    /// Cached events among `event_types`, in timestamp order.
    pub fn replay_for(&self, event_types: impl IntoIterator<Item = EventType>) -> Vec<SensorEvent> {
        let events = self.events.lock();
        let mut found: Vec<SensorEvent> = event_types
            .into_iter()
            .filter_map(|t| events.get(&t).cloned())
            .collect();
        found.sort_by_key(|e| e.data.timestamp);
        found
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Outcome of dispatching one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Raw plus derived events in the batch.
    pub events: usize,
    /// Frames queued to listeners.
    pub delivered: usize,
    /// Frames lost to full or closed listener queues.
    pub failed: usize,
}

/// The global fan-out task.
pub struct Dispatcher {
    rx: mpsc::Receiver<SensorEvent>,
    ctx: Arc<DaemonContext>,
    cancel_token: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        rx: mpsc::Receiver<SensorEvent>,
        ctx: Arc<DaemonContext>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            rx,
            ctx,
            cancel_token,
        }
    }

    /// Runs until cancelled or every producer is gone.
    pub async fn run(mut self) {
        info!("Event dispatcher started");
        loop {
            let first = tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Event dispatcher shutting down");
                    break;
                }
                event = self.rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!("Ingestion queue closed");
                        break;
                    }
                },
            };

            let mut batch = Vec::with_capacity(MAX_BATCH);
            batch.push(first);
            while batch.len() < MAX_BATCH {
                match self.rx.try_recv() {
                    Ok(event) => batch.push(event),
                    Err(_) => break,
                }
            }

            let stats = dispatch_batch(&self.ctx, batch);
            trace!(
                events = stats.events,
                delivered = stats.delivered,
                failed = stats.failed,
                "Batch dispatched"
            );
        }
        info!("Event dispatcher stopped");
    }
}

/// Synthesizes, orders, caches and fans out one batch of raw events.
pub fn dispatch_batch(ctx: &DaemonContext, raw: Vec<SensorEvent>) -> DispatchStats {
    let situation = ctx.situation();

    let mut batch = Vec::with_capacity(raw.len());
    for event in raw {
        for virtual_sensor in ctx.catalog.virtuals() {
            batch.extend(virtual_sensor.feed(&event));
        }
        batch.push(event);
    }
    // stable: equal timestamps keep raw-then-derived arrival order
    batch.sort_by_key(|event| event.data.timestamp);

    let mut stats = DispatchStats {
        events: batch.len(),
        ..DispatchStats::default()
    };
    for event in &batch {
        ctx.replay.remember(event);
        let (delivered, failed) = fan_out(ctx, event, situation);
        stats.delivered += delivered;
        stats.failed += failed;
    }
    stats
}

fn fan_out(ctx: &DaemonContext, event: &SensorEvent, situation: Situation) -> (usize, usize) {
    let listeners = ctx.registry.listeners(event.event_type, situation);
    if listeners.is_empty() {
        return (0, 0);
    }

    let frame = encode_event_frame(event);
    let mut delivered = 0;
    let mut failed = 0;
    for (client_id, sink) in listeners {
        match sink.try_send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => {
                failed += 1;
                log_send_failure(client_id, event, e);
            }
        }
    }
    (delivered, failed)
}

fn log_send_failure(client_id: ClientId, event: &SensorEvent, error: SinkError) {
    match error {
        SinkError::Full => warn!(
            %client_id,
            event_type = %event.event_type,
            "Listener queue full, dropping event"
        ),
        SinkError::Closed => debug!(
            %client_id,
            event_type = %event.event_type,
            "Listener event channel closed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_core::SensorData;

    fn accel(ts: u64) -> SensorEvent {
        SensorEvent::new(
            EventType::ACCELEROMETER_RAW_DATA,
            SensorData::new(ts, 0, &[0.0, 9.8, 0.0]),
        )
    }

    #[test]
    fn test_overflow_drops_newest() {
        let (ingest, mut rx) = ingest_channel(2);
        assert!(ingest.push(accel(1)));
        assert!(ingest.push(accel(2)));
        assert!(!ingest.push(accel(3)));
        assert_eq!(ingest.dropped(), 1);

        assert_eq!(rx.try_recv().unwrap().data.timestamp, 1);
        assert_eq!(rx.try_recv().unwrap().data.timestamp, 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_push_after_close() {
        let (ingest, rx) = ingest_channel(2);
        drop(rx);
        assert!(!ingest.push(accel(1)));
        assert_eq!(ingest.dropped(), 0);
    }

    #[test]
    fn test_replay_cache_keeps_latest_state_only() {
        let cache = ReplayCache::new();
        cache.remember(&accel(1));
        assert!(cache.get(EventType::ACCELEROMETER_RAW_DATA).is_none());

        for ts in [5, 9] {
            cache.remember(&SensorEvent::new(
                EventType::PROXIMITY_CHANGE_STATE,
                SensorData::new(ts, 0, &[1.0]),
            ));
        }
        let cached = cache.get(EventType::PROXIMITY_CHANGE_STATE).unwrap();
        assert_eq!(cached.data.timestamp, 9);
        assert_eq!(
            cache
                .replay_for([EventType::PROXIMITY_CHANGE_STATE, EventType::LIGHT_LUX_DATA])
                .len(),
            1
        );
    }
}
