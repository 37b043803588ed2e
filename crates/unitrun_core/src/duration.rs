//! Human readable rendering of test durations.

use std::time::Duration;

/// Durations from this many milliseconds on are rendered in whole seconds.
pub const SECONDS_THRESHOLD_MS: u128 = 10_000;

/// Render a test duration the way it is stored on unit test records.
///
/// - `>= 10000 ms`: rounded whole seconds (`"10 seconds"`)
/// - `0 ms`: `"<1 millisecond"`
/// - otherwise: `"<n> milliseconds"`
pub fn readable_duration(duration: Duration) -> String {
    readable_millis(duration.as_millis())
}

/// Same as [`readable_duration`] for a raw millisecond count.
pub fn readable_millis(ms: u128) -> String {
    if ms >= SECONDS_THRESHOLD_MS {
        format!("{} seconds", (ms + 500) / 1000)
    } else if ms == 0 {
        "<1 millisecond".to_string()
    } else {
        format!("{ms} milliseconds")
    }
}
