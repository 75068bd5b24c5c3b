use crate::error::{self, Result};
use std::time::Duration;

/// Smallest step of every backoff schedule the engine uses.
const SMALLEST_UNIT: Duration = Duration::from_secs(60);

/// Exponential backoff with a 3-tries-per-doubling plateau: the same interval is returned three
/// times before it doubles, clamping at `max_interval`; three more tries at the clamp surface
/// `MaxRetriesExceeded`.
///
/// If `max_interval` is smaller than the smallest unit (one minute), every attempt returns the
/// smallest unit -- there's no room to back off further.
pub fn interval_for_attempt(attempt: u32, max_interval: Duration) -> Result<Duration> {
    if max_interval < SMALLEST_UNIT {
        return Ok(SMALLEST_UNIT);
    }

    let mut interval = SMALLEST_UNIT;
    let mut remaining = attempt;
    loop {
        if interval >= max_interval {
            // At the clamp: three more tries are allowed before giving up.
            return if remaining < 3 {
                Ok(max_interval)
            } else {
                error::MaxRetriesExceededSnafu.fail()
            };
        }
        if remaining < 3 {
            return Ok(interval);
        }
        remaining -= 3;
        interval *= 2;
    }
}
