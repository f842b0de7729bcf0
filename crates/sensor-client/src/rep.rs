//! Subscription snapshots and the diff that turns them into wire commands.
//!
//! A [`Rep`] summarizes what the daemon should currently believe about one
//! sensor of this process. Every mutating call compares the last acknowledged
//! `Rep` with the one implied by the handle table and sends only the difference.
//!
//! Command order for a diff:
//!
//! ```text
//! target active:   SET_OPTION? → REG(added)* → SET_BATCH|UNSET_BATCH? → START? → UNREG(removed)*
//! target inactive: UNSET_BATCH → STOP            (only when it was active)
//! ```

use std::collections::BTreeSet;

use sensor_core::{EventType, SensorOption, SensorState};
use sensor_protocol::Request;

use crate::handle::HandleState;

/// Derived subscription snapshot of one sensor.
///
/// An inactive `Rep` is always [`Rep::inactive`]; the daemon forgets options
/// and registrations on `STOP`, so nothing else is worth tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rep {
    pub active: bool,
    pub option: SensorOption,
    pub interval_us: u32,
    pub latency_us: u32,
    pub event_types: BTreeSet<EventType>,
}

impl Default for Rep {
    fn default() -> Self {
        Self::inactive()
    }
}

impl Rep {
    pub fn inactive() -> Self {
        Self {
            active: false,
            option: SensorOption::Default,
            interval_us: 0,
            latency_us: 0,
            event_types: BTreeSet::new(),
        }
    }

    /// Aggregates the started handles of one sensor.
    ///
    /// The option is `AlwaysOn` if any started handle asks for it; interval
    /// and latency are the smallest non-zero values any registration asks for.
    pub fn from_handles<'a>(handles: impl IntoIterator<Item = &'a HandleState>) -> Self {
        let mut rep = Self::inactive();
        let mut interval: Option<u32> = None;
        let mut latency: Option<u32> = None;

        for handle in handles {
            if handle.state != SensorState::Started {
                continue;
            }
            rep.active = true;
            if handle.option == SensorOption::AlwaysOn {
                rep.option = SensorOption::AlwaysOn;
            }
            for (event_type, registration) in &handle.registrations {
                rep.event_types.insert(*event_type);
                interval = min_nonzero(interval, registration.interval_us);
                latency = min_nonzero(latency, registration.latency_us);
            }
        }

        if rep.active {
            rep.interval_us = interval.unwrap_or(0);
            rep.latency_us = latency.unwrap_or(0);
        }
        rep
    }

    fn batch(&self) -> (u32, u32) {
        (self.interval_us, self.latency_us)
    }
}

fn min_nonzero(current: Option<u32>, candidate: u32) -> Option<u32> {
    if candidate == 0 {
        return current;
    }
    Some(current.map_or(candidate, |c| c.min(candidate)))
}

/// One command implied by a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireOp {
    SetOption(SensorOption),
    Reg(EventType),
    Unreg(EventType),
    SetBatch { interval_us: u32, latency_us: u32 },
    UnsetBatch,
    Start,
    Stop,
}

impl WireOp {
    pub fn to_request(self) -> Request {
        match self {
            Self::SetOption(option) => Request::SetOption { option },
            Self::Reg(event_type) => Request::Reg { event_type },
            Self::Unreg(event_type) => Request::Unreg { event_type },
            Self::SetBatch {
                interval_us,
                latency_us,
            } => Request::SetBatch {
                interval_us,
                latency_us,
            },
            Self::UnsetBatch => Request::UnsetBatch,
            Self::Start => Request::Start,
            Self::Stop => Request::Stop,
        }
    }

    /// Command that undoes this one, given the `Rep` the daemon held before.
    pub fn inverse(self, before: &Rep) -> Option<WireOp> {
        let restore_batch = || {
            (before.interval_us > 0).then_some(WireOp::SetBatch {
                interval_us: before.interval_us,
                latency_us: before.latency_us,
            })
        };
        match self {
            Self::SetOption(_) => Some(Self::SetOption(before.option)),
            Self::Reg(event_type) => Some(Self::Unreg(event_type)),
            Self::Unreg(event_type) => Some(Self::Reg(event_type)),
            Self::SetBatch { .. } => Some(restore_batch().unwrap_or(Self::UnsetBatch)),
            Self::UnsetBatch => restore_batch(),
            Self::Start => Some(Self::Stop),
            Self::Stop => Some(Self::Start),
        }
    }
}

/// Commands that move the daemon from `old` to `new`.
pub fn diff(old: &Rep, new: &Rep) -> Vec<WireOp> {
    let mut ops = Vec::new();

    if !new.active {
        if old.active {
            ops.push(WireOp::UnsetBatch);
            ops.push(WireOp::Stop);
        }
        return ops;
    }

    if old.option != new.option {
        ops.push(WireOp::SetOption(new.option));
    }
    ops.extend(
        new.event_types
            .difference(&old.event_types)
            .map(|event_type| WireOp::Reg(*event_type)),
    );
    if old.batch() != new.batch() {
        ops.push(if new.interval_us > 0 {
            WireOp::SetBatch {
                interval_us: new.interval_us,
                latency_us: new.latency_us,
            }
        } else {
            WireOp::UnsetBatch
        });
    }
    if !old.active {
        ops.push(WireOp::Start);
    }
    ops.extend(
        old.event_types
            .difference(&new.event_types)
            .map(|event_type| WireOp::Unreg(*event_type)),
    );
    ops
}
