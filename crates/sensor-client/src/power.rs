//! System power-state observer.
//!
//! The observer follows a `watch` channel supplied by the embedding
//! application. Each change is applied to the session: `Default`-option handles
//! the application started are paused while the system saves power and resumed
//! afterwards, through the same Rep diff as any other call. `AlwaysOn` handles
//! are left alone.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sensor_core::PowerState;

use crate::session::SessionState;

pub(crate) struct PowerObserver {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PowerObserver {
    pub(crate) fn spawn(source: watch::Receiver<PowerState>, state: Weak<Mutex<SessionState>>) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(source, state, cancel.clone()));
        Self { cancel, task }
    }

    pub(crate) async fn stop(mut self, limit: Duration) {
        self.cancel.cancel();
        match timeout(limit, &mut self.task).await {
            Ok(Ok(())) => debug!("Power observer stopped"),
            Ok(Err(e)) => warn!(error = %e, "Power observer task failed"),
            Err(_) => {
                warn!(timeout_ms = limit.as_millis() as u64, "Power observer did not stop in time");
                self.task.abort();
            }
        }
    }
}

impl Drop for PowerObserver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    mut source: watch::Receiver<PowerState>,
    state: Weak<Mutex<SessionState>>,
    cancel: CancellationToken,
) {
    let mut power = *source.borrow_and_update();
    loop {
        let Some(session) = state.upgrade() else {
            break;
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            mut guard = session.lock() => guard.apply_power(power).await,
        }
        drop(session);

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = source.changed() => {
                if changed.is_err() {
                    debug!("Power state source closed");
                    break;
                }
            }
        }
        power = *source.borrow_and_update();
    }
}
