//! Shared bookkeeping for module implementations.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use sensor_core::{ModuleError, ModuleResult, SensorData, SensorInfo};

use super::Requester;

#[derive(Debug, Default)]
struct CoreState {
    start_count: usize,
    intervals: HashMap<Requester, u32>,
    latencies: HashMap<Requester, u32>,
    attributes: HashMap<i32, i32>,
    config_blob: Vec<u8>,
    latest: SensorData,
}

/// Start reference counting and interval/latency aggregation.
///
/// Module implementations embed a `ModuleCore` and layer device control on
/// top of the transitions it reports.
#[derive(Debug)]
pub struct ModuleCore {
    info: SensorInfo,
    state: Mutex<CoreState>,
}

impl ModuleCore {
    pub fn new(info: SensorInfo) -> Self {
        Self {
            info,
            state: Mutex::new(CoreState::default()),
        }
    }

    pub fn info(&self) -> &SensorInfo {
        &self.info
    }

    /// Adds a start reference. Returns true on the stopped → started edge.
    pub fn acquire(&self) -> bool {
        let mut state = self.state.lock();
        state.start_count += 1;
        state.start_count == 1
    }

    /// Drops a start reference. Returns true on the started → stopped edge.
    pub fn release(&self) -> ModuleResult<bool> {
        let mut state = self.state.lock();
        if state.start_count == 0 {
            return Err(ModuleError::NotStarted);
        }
        state.start_count -= 1;
        if state.start_count == 0 {
            // A restarted sensor must not serve a stale sample.
            state.latest = SensorData::default();
            return Ok(true);
        }
        Ok(false)
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().start_count > 0
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().start_count
    }

    pub fn add_interval(&self, requester: Requester, interval_us: u32) -> ModuleResult<()> {
        if interval_us == 0 {
            return Err(ModuleError::InvalidArgument(
                "interval must be positive".to_string(),
            ));
        }
        self.state.lock().intervals.insert(requester, interval_us);
        debug!(
            sensor = %self.info.sensor_type,
            ?requester,
            interval_us,
            effective = ?self.interval_us(),
            "Interval requested"
        );
        Ok(())
    }

    pub fn delete_interval(&self, requester: Requester) {
        self.state.lock().intervals.remove(&requester);
    }

    /// Effective sampling interval: the smallest request, never below the
    /// sensor's minimum. `None` when nobody asked for an interval.
    pub fn interval_us(&self) -> Option<u32> {
        let state = self.state.lock();
        state
            .intervals
            .values()
            .min()
            .map(|interval| (*interval).max(self.info.min_interval_us))
    }

    pub fn add_batch(&self, requester: Requester, latency_us: u32) {
        self.state.lock().latencies.insert(requester, latency_us);
    }

    pub fn delete_batch(&self, requester: Requester) {
        self.state.lock().latencies.remove(&requester);
    }

    /// Effective batch latency: the largest delay every requester tolerates.
    pub fn latency_us(&self) -> u32 {
        let state = self.state.lock();
        state.latencies.values().max().copied().unwrap_or(0)
    }

    pub fn store(&self, data: SensorData) {
        self.state.lock().latest = data;
    }

    pub fn latest(&self) -> SensorData {
        self.state.lock().latest.clone()
    }

    pub fn set_attribute_int(&self, attribute: i32, value: i32) {
        self.state.lock().attributes.insert(attribute, value);
    }

    pub fn attribute_int(&self, attribute: i32) -> Option<i32> {
        self.state.lock().attributes.get(&attribute).copied()
    }

    pub fn set_config_blob(&self, blob: &[u8]) {
        self.state.lock().config_blob = blob.to_vec();
    }

    pub fn config_blob(&self) -> Vec<u8> {
        self.state.lock().config_blob.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_core::{ClientId, SensorType};

    fn core() -> ModuleCore {
        let mut info = SensorInfo::new(SensorType::Accelerometer, "accel");
        info.min_interval_us = 5_000;
        ModuleCore::new(info)
    }

    #[test]
    fn test_start_refcount() {
        let core = core();
        assert!(core.acquire());
        assert!(!core.acquire());
        assert_eq!(core.release(), Ok(false));
        assert_eq!(core.release(), Ok(true));
        assert_eq!(core.release(), Err(ModuleError::NotStarted));
    }

    #[test]
    fn test_interval_is_minimum_and_clamped() {
        let core = core();
        let a = Requester::Client(ClientId::new(1));
        let b = Requester::Client(ClientId::new(2));
        assert_eq!(core.interval_us(), None);

        core.add_interval(a, 100_000).unwrap();
        core.add_interval(b, 20_000).unwrap();
        assert_eq!(core.interval_us(), Some(20_000));

        core.add_interval(Requester::WarmUp(ClientId::new(1)), 1_000).unwrap();
        assert_eq!(core.interval_us(), Some(5_000));

        core.delete_interval(Requester::WarmUp(ClientId::new(1)));
        core.delete_interval(b);
        assert_eq!(core.interval_us(), Some(100_000));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let core = core();
        assert!(core
            .add_interval(Requester::Client(ClientId::new(1)), 0)
            .is_err());
    }

    #[test]
    fn test_latency_is_largest_tolerated() {
        let core = core();
        assert_eq!(core.latency_us(), 0);
        core.add_batch(Requester::Client(ClientId::new(1)), 500_000);
        core.add_batch(Requester::Client(ClientId::new(2)), 200_000);
        assert_eq!(core.latency_us(), 500_000);
        core.delete_batch(Requester::Client(ClientId::new(1)));
        assert_eq!(core.latency_us(), 200_000);
        core.delete_batch(Requester::Client(ClientId::new(2)));
        assert_eq!(core.latency_us(), 0);
    }

    #[test]
    fn test_last_release_clears_sample() {
        let core = core();
        core.acquire();
        core.store(SensorData::new(10, 0, &[1.0]));
        assert!(core.latest().is_valid());
        core.release().unwrap();
        assert!(!core.latest().is_valid());
    }
}
