//! Utility functions for the queue tracking service

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Clamp a signed chrono delta to a non-negative std duration
pub fn non_negative(delta: TimeDelta) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}

/// Convert a std duration into a chrono delta, saturating on overflow
pub fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Break a duration into whole days, hours, minutes and seconds
pub fn split_duration(duration: Duration) -> (u64, u64, u64, u64) {
    let total = duration.as_secs();
    let (mins, secs) = (total / 60, total % 60);
    let (hours, mins) = (mins / 60, mins % 60);
    let (days, hours) = (hours / 24, hours % 24);
    (days, hours, mins, secs)
}

/// `1d 2h 3m 4s`
pub fn format_dhms(duration: Duration) -> String {
    let (days, hours, mins, secs) = split_duration(duration);
    format!("{}d {}h {}m {}s", days, hours, mins, secs)
}

/// `2h 3m 4s`, days folded into hours
pub fn format_hms(duration: Duration) -> String {
    let (days, hours, mins, secs) = split_duration(duration);
    format!("{}h {}m {}s", days * 24 + hours, mins, secs)
}

/// `2h 3m`, used for session countdowns
pub fn format_hm(duration: Duration) -> String {
    let (days, hours, mins, _) = split_duration(duration);
    format!("{}h {}m", days * 24 + hours, mins)
}
