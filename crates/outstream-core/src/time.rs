//! Process-wide monotonic clock
//!
//! `Instant` has no absolute value, so timestamps are measured from a fixed
//! epoch captured the first time the clock is read. Sinks and the standby
//! fallback both read this clock, which keeps their timestamps comparable.

use std::sync::OnceLock;
use std::time::Instant;

use crate::types::TimeSpec;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Current monotonic time
pub fn monotonic_now() -> TimeSpec {
    let epoch = *EPOCH.get_or_init(Instant::now);
    TimeSpec::from(epoch.elapsed())
}
