// crates/lineage-core/src/runtime/clock.rs
// ============================================================================
// Module: Lineage Clocks
// Description: System and manually driven clock implementations.
// Purpose: Supply row creation times and window bounds to the engine.
// Dependencies: crate::{interfaces, model}, time
// ============================================================================

//! ## Overview
//! [`SystemClock`] reads UTC wall-clock time for production. [`ManualClock`]
//! only moves when advanced or set, so tests can step across the matching
//! window or move time backwards deterministically.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use time::OffsetDateTime;

use crate::interfaces::Clock;
use crate::model::Timestamp;

// ============================================================================
// SECTION: System Clock
// ============================================================================

/// Wall-clock time in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        Timestamp::from_unix_millis(i64::try_from(millis).unwrap_or(i64::MAX))
    }
}

// ============================================================================
// SECTION: Manual Clock
// ============================================================================

/// Clock that only moves when told to; clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    /// Current time in unix epoch milliseconds.
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock fixed at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start.as_unix_millis())),
        }
    }

    /// Moves the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let step = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        let _ = self.millis.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
            Some(current.saturating_add(step))
        });
    }

    /// Sets the clock to `value`, which may be earlier than the current time.
    pub fn set(&self, value: Timestamp) {
        self.millis.store(value.as_unix_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_millis(self.millis.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ManualClock;
    use super::SystemClock;
    use crate::interfaces::Clock;
    use crate::model::Timestamp;

    #[test]
    fn manual_clock_clones_share_time_and_can_step_back() {
        let clock = ManualClock::new(Timestamp::from_unix_millis(1_000));
        let shared = clock.clone();
        clock.advance(Duration::from_secs(3 * 60 * 60));
        assert_eq!(shared.now(), Timestamp::from_unix_millis(1_000 + 3 * 60 * 60 * 1_000));

        shared.set(Timestamp::from_unix_millis(500));
        assert_eq!(clock.now(), Timestamp::from_unix_millis(500));
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now() > Timestamp::from_unix_millis(1_577_836_800_000));
    }
}
