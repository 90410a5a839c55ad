//! Timestamp helpers.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// # Examples
///
/// ```
/// use stagewise::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Adds a std duration to a timestamp, saturating at the chrono range.
#[must_use]
pub fn add_duration(at: Timestamp, delay: Duration) -> Timestamp {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_duration() {
        let start = now();
        let later = add_duration(start, Duration::from_secs(90));
        assert_eq!((later - start).num_seconds(), 90);
    }

    #[test]
    fn test_add_duration_saturates() {
        let at = add_duration(now(), Duration::from_secs(u64::MAX));
        assert_eq!(at, DateTime::<Utc>::MAX_UTC);
    }
}
