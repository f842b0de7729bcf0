//! Monotonic timestamps for sensor samples.
//!
//! Timestamps count microseconds from a process-wide anchor taken the first
//! time the clock is read, so they only compare within one daemon run.

use std::sync::OnceLock;
use std::time::Instant;

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Pins the anchor; later timestamps are measured from here.
pub fn start() {
    ANCHOR.get_or_init(Instant::now);
}

/// Monotonic time in microseconds since the anchor.
///
/// Never returns zero, since a zero timestamp means "no sample yet".
pub fn monotonic_us() -> u64 {
    let elapsed = ANCHOR.get_or_init(Instant::now).elapsed();
    u64::try_from(elapsed.as_micros())
        .unwrap_or(u64::MAX)
        .saturating_add(1)
}
