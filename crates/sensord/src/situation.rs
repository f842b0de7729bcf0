//! Server-side situation source (screen on/off).
//!
//! The dispatcher reads the current situation once per batch; `Default`
//! option listeners are skipped while it gates delivery.

use tokio::sync::watch;
use tracing::info;

use sensor_core::Situation;

/// Owner of the current situation.
#[derive(Debug)]
pub struct SituationSource {
    tx: watch::Sender<Situation>,
}

impl SituationSource {
    pub fn new(initial: Situation) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Situation> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Situation {
        *self.tx.borrow()
    }

    /// Updates the situation; returns true if it changed.
    pub fn set(&self, situation: Situation) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == situation {
                false
            } else {
                *current = situation;
                true
            }
        });
        if changed {
            info!(%situation, "Situation changed");
        }
        changed
    }
}

impl Default for SituationSource {
    fn default() -> Self {
        Self::new(Situation::ScreenOn)
    }
}
