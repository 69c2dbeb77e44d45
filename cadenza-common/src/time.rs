//! Timestamp and duration formatting utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format seconds as `m:ss` (or `h:mm:ss` past one hour) for display
///
/// Negative and non-finite inputs format as `0:00`.
pub fn format_secs(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs.floor() as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // After 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_format_minutes() {
        assert_eq!(format_secs(0.0), "0:00");
        assert_eq!(format_secs(9.99), "0:09");
        assert_eq!(format_secs(75.0), "1:15");
    }

    #[test]
    fn test_format_hours() {
        assert_eq!(format_secs(3600.0), "1:00:00");
        assert_eq!(format_secs(3725.5), "1:02:05");
    }

    #[test]
    fn test_format_invalid_inputs() {
        assert_eq!(format_secs(-3.0), "0:00");
        assert_eq!(format_secs(f64::NAN), "0:00");
    }
}
