//! Clock abstraction
//!
//! All timestamps in the engine are Unix seconds (UTC) except global
//! variable update times which are Unix milliseconds. Elapsed-time
//! deltas (`dt`) are derived from the monotonic reading so that wall
//! clock jumps never corrupt integrators.

use chrono::{DateTime, TimeZone, Utc};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Abstract time source, injected so tests can drive a manual clock
pub trait Clock: Send + Sync {
    /// Current Unix time in whole seconds
    fn now_unix(&self) -> i64;

    /// Current Unix time in milliseconds
    fn now_unix_ms(&self) -> i64;

    /// Monotonic elapsed time since an arbitrary epoch
    fn monotonic(&self) -> Duration;

    /// Current UTC datetime
    fn now_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.now_unix(), 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// System clock
pub struct SysClock {
    origin: Instant,
}

impl SysClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SysClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SysClock {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn now_unix_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced clock for deterministic tests
pub struct ManualClock {
    now_ms: parking_lot::Mutex<i64>,
}

impl ManualClock {
    /// Create a manual clock starting at the given Unix second
    pub fn starting_at(unix: i64) -> Self {
        Self {
            now_ms: parking_lot::Mutex::new(unix * 1000),
        }
    }

    /// Advance by whole seconds
    pub fn advance(&self, seconds: i64) {
        *self.now_ms.lock() += seconds * 1000;
    }

    /// Advance by milliseconds
    pub fn advance_ms(&self, ms: i64) {
        *self.now_ms.lock() += ms;
    }

    /// Jump to an absolute Unix second
    pub fn set(&self, unix: i64) {
        *self.now_ms.lock() = unix * 1000;
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        *self.now_ms.lock() / 1000
    }

    fn now_unix_ms(&self) -> i64 {
        *self.now_ms.lock()
    }

    fn monotonic(&self) -> Duration {
        Duration::from_millis((*self.now_ms.lock()).max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::starting_at(1_700_000_000);
        assert_eq!(clock.now_unix(), 1_700_000_000);
        clock.advance(5);
        assert_eq!(clock.now_unix(), 1_700_000_005);
        clock.advance_ms(500);
        assert_eq!(clock.now_unix_ms(), 1_700_000_005_500);
        // whole-second reading truncates
        assert_eq!(clock.now_unix(), 1_700_000_005);
    }

    #[test]
    fn manual_clock_utc_matches_unix() {
        let clock = ManualClock::starting_at(0);
        clock.set(86_400);
        assert_eq!(clock.now_utc().timestamp(), 86_400);
    }
}
