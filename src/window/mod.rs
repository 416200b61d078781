//! Fixed-window clock arithmetic.
//!
//! All windows are aligned to UTC wall-clock boundaries: a minute window is
//! `[hh:mm:00, hh:mm+1:00)`, an hour window `[hh:00:00, hh+1:00:00)`, a day
//! window `[00:00:00, 24:00:00)`. Boundary alignment (rather than sliding
//! windows relative to the first request) is a deliberate tradeoff: a caller
//! can burst across a boundary, but counters reset at predictable times and
//! a single atomic increment per tier is all the bookkeeping needed.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counting granularity - one independent fixed-window horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

/// All granularities, in the order the enforcement engine checks them
pub const ALL_GRANULARITIES: [Granularity; 3] =
    [Granularity::Minute, Granularity::Hour, Granularity::Day];

impl Granularity {
    /// Window length in seconds
    pub fn secs(&self) -> u64 {
        match self {
            Granularity::Minute => 60,
            Granularity::Hour => 3600,
            Granularity::Day => 86400,
        }
    }

    /// Short name used in counter keys and headers
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Floor a timestamp to the start of its window
pub fn window_start(now: u64, granularity: Granularity) -> u64 {
    now - now % granularity.secs()
}

/// Timestamp at which the current window rolls over
pub fn window_reset(now: u64, granularity: Granularity) -> u64 {
    window_start(now, granularity) + granularity.secs()
}

/// Seconds remaining until the current window rolls over
pub fn retry_after(now: u64, granularity: Granularity) -> u64 {
    window_reset(now, granularity) - now
}
