use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// Epoch values above this are microseconds (Instagram item timestamps)
const MICROS_THRESHOLD: i64 = 100_000_000_000_000;

/// Epoch values above this (and below the micros threshold) are milliseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Human-readable format for display: "2024-01-20 15:30:00"
pub const DISPLAY_FULL: &str = "%Y-%m-%d %H:%M:%S";

/// Parse an RFC3339/ISO 8601 datetime string
pub fn parse_rfc3339(date_str: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse RFC3339 date: {date_str}"))
}

/// Convert an epoch value of unknown unit to a UTC datetime.
///
/// The unit is inferred from magnitude: microseconds, milliseconds or seconds.
pub fn from_epoch_auto(value: i64) -> Option<DateTime<Utc>> {
    if value >= MICROS_THRESHOLD {
        DateTime::from_timestamp_micros(value)
    } else if value >= MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

/// Format a datetime for human-readable display
pub fn format_for_display(datetime: &DateTime<Utc>) -> String {
    datetime.format(DISPLAY_FULL).to_string()
}

/// Get current UTC timestamp
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a `std::time::Duration` setting to a chrono duration, saturating on overflow
pub fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339() {
        let parsed = parse_rfc3339("2024-01-20T15:30:00Z").unwrap();
        assert_eq!(parsed.timestamp(), 1705764600);

        let parsed_tz = parse_rfc3339("2024-01-20T16:30:00+01:00").unwrap();
        assert_eq!(parsed_tz.timestamp(), 1705764600);

        assert!(parse_rfc3339("yesterday").is_err());
    }

    #[test]
    fn test_from_epoch_auto_units() {
        let seconds = from_epoch_auto(1705764600).unwrap();
        let millis = from_epoch_auto(1705764600_000).unwrap();
        let micros = from_epoch_auto(1705764600_000_000).unwrap();

        assert_eq!(seconds, millis);
        assert_eq!(millis, micros);
        assert_eq!(format_for_display(&seconds), "2024-01-20 15:30:00");
    }

    #[test]
    fn test_to_chrono_saturates() {
        assert_eq!(
            to_chrono(std::time::Duration::from_secs(300)),
            chrono::Duration::minutes(5)
        );
        assert_eq!(
            to_chrono(std::time::Duration::from_secs(u64::MAX)),
            chrono::Duration::MAX
        );
    }
}
