//! Time and duration conversion utilities.
//!
//! Wire positions travel as fractional seconds, internal positions are
//! [`Duration`]s. Conversions here saturate instead of panicking on
//! out-of-range or non-finite input.

use std::time::Duration;

/// Extension trait for safe Duration conversions.
pub trait DurationExt {
    /// Convert duration to fractional seconds for the wire.
    fn as_secs_lossy(&self) -> f64;
}

impl DurationExt for Duration {
    fn as_secs_lossy(&self) -> f64 {
        self.as_secs_f64()
    }
}

/// Convert wire seconds to a [`Duration`], clamping negative or non-finite
/// values to zero.
///
/// `Duration::from_secs_f64` panics on negative, NaN, or overflowing input;
/// wire payloads are untrusted, so every inbound position goes through here.
#[must_use]
pub fn duration_from_secs_lossy(secs: f64) -> Duration {
    if !secs.is_finite() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Absolute difference between two durations.
#[must_use]
pub fn abs_diff(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}
