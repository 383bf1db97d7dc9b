//! Time source for every timestamp the routing core records
//!
//! Cooldowns, delayed commits, recovery windows and score timestamps all read
//! the same `Clock`. `TokioClock` derives wall-clock time from
//! `tokio::time::Instant`, so tests running with paused tokio time move every
//! timestamp in the system forward together with `tokio::time::advance`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Source of "now" for the routing core
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock anchored to the tokio timer
///
/// Captures `Utc::now()` and `tokio::time::Instant::now()` once; later
/// readings add the elapsed tokio time to the UTC anchor.
#[derive(Debug, Clone)]
pub struct TokioClock {
    anchor_utc: DateTime<Utc>,
    anchor_instant: tokio::time::Instant,
}

impl TokioClock {
    /// Create a clock anchored at the current time
    pub fn new() -> Self {
        Self {
            anchor_utc: Utc::now(),
            anchor_instant: tokio::time::Instant::now(),
        }
    }

    /// Create a clock anchored at a fixed UTC timestamp (useful in tests)
    pub fn starting_at(anchor_utc: DateTime<Utc>) -> Self {
        Self {
            anchor_utc,
            anchor_instant: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.anchor_instant.elapsed();
        // Saturates after ~292k years of uptime
        let elapsed = ChronoDuration::from_std(elapsed).unwrap_or(ChronoDuration::MAX);
        self.anchor_utc + elapsed
    }
}

/// Manually driven clock for synchronous tests
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `seconds`
    pub fn advance_secs(&self, seconds: i64) {
        let mut now = self.now.lock();
        *now += ChronoDuration::seconds(seconds);
    }

    /// Jump to an absolute time
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
