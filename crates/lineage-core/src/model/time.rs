// crates/lineage-core/src/model/time.rs
// ============================================================================
// Module: Lineage Time Model
// Description: Canonical timestamp representation for identity rows.
// Purpose: Provide ordered, serializable creation times with window math.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Identity rows carry a creation time in unix epoch milliseconds. The engine
//! never reads wall-clock time directly; it asks an injected
//! [`crate::interfaces::Clock`], which keeps window expiry testable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Creation timestamp in unix epoch milliseconds.
///
/// # Invariants
/// - Ordering matches chronological order.
/// - Arithmetic saturates instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(value: i64) -> Self {
        Self(value)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the timestamp moved back by `duration`, saturating at the minimum.
    #[must_use]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration_millis(duration)))
    }

    /// Returns the timestamp moved forward by `duration`, saturating at the maximum.
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration_millis(duration)))
    }

    /// Formats the timestamp as RFC 3339 in UTC.
    ///
    /// Returns `None` when the value is outside the representable calendar range.
    #[must_use]
    pub fn to_rfc3339(self) -> Option<String> {
        let nanos = i128::from(self.0).checked_mul(1_000_000)?;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?.format(&Rfc3339).ok()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_rfc3339() {
            Some(text) => f.write_str(&text),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Converts a duration to whole milliseconds, clamped to `i64`.
fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use std::time::Duration;

    use super::Timestamp;

    #[test]
    fn window_math_saturates() {
        let start = Timestamp::from_unix_millis(i64::MIN + 5);
        assert_eq!(
            start.saturating_sub(Duration::from_secs(60)),
            Timestamp::from_unix_millis(i64::MIN)
        );
        let end = Timestamp::from_unix_millis(i64::MAX - 5);
        assert_eq!(
            end.saturating_add(Duration::from_secs(60)),
            Timestamp::from_unix_millis(i64::MAX)
        );
    }

    #[test]
    fn rfc3339_formats_epoch() {
        let epoch = Timestamp::from_unix_millis(0);
        assert_eq!(epoch.to_rfc3339().unwrap(), "1970-01-01T00:00:00Z");
        assert_eq!(Timestamp::from_unix_millis(i64::MAX).to_rfc3339(), None);
    }
}
