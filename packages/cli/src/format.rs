// ABOUTME: Display helpers for token timestamps and expiry
// ABOUTME: Renders absolute UTC times and short relative durations

use chrono::DateTime;

pub fn format_timestamp(timestamp: i64) -> String {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "Invalid date".to_string(),
    }
}

/// Compact duration such as `2h 5m` or `45s`
pub fn format_duration(secs: i64) -> String {
    let secs = secs.abs();
    let (days, hours, minutes) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", secs)
    }
}

pub fn describe_expiry(expires_at: Option<i64>, now: i64) -> String {
    match expires_at {
        Some(expires_at) if expires_at > now => {
            format!("in {}", format_duration(expires_at - now))
        }
        Some(expires_at) => format!("expired {} ago", format_duration(now - expires_at)),
        None => "no expiry reported".to_string(),
    }
}
