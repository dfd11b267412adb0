//! Injectable time source for event timestamps
//!
//! Only event timestamps come from the clock. Flush cadence is measured
//! with `std::time::Instant` so it stays on wall-clock time even when a
//! simulated clock is injected.

use chrono::{DateTime, Utc};

/// Time source for event timestamps
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time source
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
