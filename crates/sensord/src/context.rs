//! Shared daemon state handed to workers and the dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sensor_core::{SensorEvent, Situation};

use crate::dispatcher::{Dispatcher, ReplayCache};
use crate::module::SensorCatalog;
use crate::permission::PermissionChecker;
use crate::registry::Registry;

/// Default bound of each client's event frame queue.
pub const DEFAULT_LISTENER_QUEUE_CAPACITY: usize = 256;

/// Everything a command worker, event channel or the dispatcher needs.
pub struct DaemonContext {
    pub registry: Registry,
    pub catalog: SensorCatalog,
    pub permissions: Box<dyn PermissionChecker>,
    pub replay: ReplayCache,
    situation: watch::Receiver<Situation>,
    listener_queue_capacity: usize,
    next_sink_id: AtomicU64,
}

impl DaemonContext {
    pub fn new(
        catalog: SensorCatalog,
        permissions: Box<dyn PermissionChecker>,
        situation: watch::Receiver<Situation>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            catalog,
            permissions,
            replay: ReplayCache::new(),
            situation,
            listener_queue_capacity: DEFAULT_LISTENER_QUEUE_CAPACITY,
            next_sink_id: AtomicU64::new(1),
        }
    }

    pub fn with_listener_queue_capacity(mut self, capacity: usize) -> Self {
        self.listener_queue_capacity = capacity.max(1);
        self
    }

    pub fn listener_queue_capacity(&self) -> usize {
        self.listener_queue_capacity
    }

    /// Current delivery situation.
    pub fn situation(&self) -> Situation {
        *self.situation.borrow()
    }

    pub(crate) fn next_sink_id(&self) -> u64 {
        self.next_sink_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Spawns the event dispatcher task.
pub fn spawn_dispatcher(
    ctx: Arc<DaemonContext>,
    ingest_rx: mpsc::Receiver<SensorEvent>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(Dispatcher::new(ingest_rx, ctx, cancel_token).run())
}
