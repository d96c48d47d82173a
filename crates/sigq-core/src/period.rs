//! Candle period bucketing.
//!
//! A candle period is the fixed-length bucket (length = signal timeframe)
//! that separates a duplicate resubmission from a legitimate replacement.
//! Buckets are aligned to the Unix epoch.

use chrono::{DateTime, Utc};

/// Start of the candle period containing `timestamp`.
///
/// A zero timeframe degenerates to one bucket per distinct second.
pub fn period_start(timestamp: DateTime<Utc>, timeframe_minutes: u32) -> DateTime<Utc> {
    let period_secs = match timeframe_minutes {
        0 => 1,
        minutes => i64::from(minutes) * 60,
    };
    let start = timestamp.timestamp().div_euclid(period_secs) * period_secs;
    DateTime::from_timestamp(start, 0).unwrap_or(timestamp)
}

/// Whether `a` and `b` fall into the same candle period.
pub fn same_period(a: DateTime<Utc>, b: DateTime<Utc>, timeframe_minutes: u32) -> bool {
    period_start(a, timeframe_minutes) == period_start(b, timeframe_minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_period_start_aligns_to_timeframe() {
        assert_eq!(period_start(at(10, 7, 31), 15), at(10, 0, 0));
        assert_eq!(period_start(at(10, 15, 0), 15), at(10, 15, 0));
        assert_eq!(period_start(at(10, 59, 59), 60), at(10, 0, 0));
    }

    #[test]
    fn test_period_start_daily() {
        assert_eq!(period_start(at(23, 59, 0), 1440), at(0, 0, 0));
    }

    #[test]
    fn test_same_period() {
        assert!(same_period(at(10, 1, 0), at(10, 14, 59), 15));
        assert!(!same_period(at(10, 14, 59), at(10, 15, 0), 15));
    }

    #[test]
    fn test_zero_timeframe_buckets_by_second() {
        assert_eq!(period_start(at(10, 1, 2), 0), at(10, 1, 2));
        assert!(!same_period(at(10, 1, 2), at(10, 1, 3), 0));
    }
}
