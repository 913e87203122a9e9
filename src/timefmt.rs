//! Display normalization for stored creation times
//!
//! Archive rows carry timestamps from several producers, in seconds,
//! milliseconds, microseconds or nanoseconds since the epoch. The unit is
//! inferred from the number of decimal digits.

use chrono::{DateTime, Local, Utc};

/// Unit a stored timestamp is counted in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Millis,
    Micros,
    Nanos,
}

impl TimeUnit {
    /// Infer the unit from the digit count of `value`
    pub fn detect(value: i64) -> Self {
        match digit_count(value) {
            d if d > 18 => Self::Nanos,
            d if d > 15 => Self::Micros,
            d if d > 12 => Self::Millis,
            _ => Self::Seconds,
        }
    }

    fn per_second(self) -> i64 {
        match self {
            Self::Seconds => 1,
            Self::Millis => 1_000,
            Self::Micros => 1_000_000,
            Self::Nanos => 1_000_000_000,
        }
    }
}

fn digit_count(value: i64) -> u32 {
    value.unsigned_abs().checked_ilog10().map_or(1, |d| d + 1)
}

/// Convert a stored timestamp of any unit into an instant
pub fn normalize(value: i64) -> Option<DateTime<Utc>> {
    let per_second = TimeUnit::detect(value).per_second();
    let secs = value.div_euclid(per_second);
    let nanos = value.rem_euclid(per_second) * (1_000_000_000 / per_second);
    DateTime::from_timestamp(secs, nanos as u32)
}

/// Integer form of a timestamp stored as REAL. Fractional epoch seconds
/// become nanoseconds; larger magnitudes are already in a finer unit and
/// are only rounded.
pub fn from_real(value: f64) -> i64 {
    if value.abs() < 1e12 {
        (value * 1e9).round() as i64
    } else {
        value.round() as i64
    }
}

/// Human-readable local time for a stored timestamp
pub fn display(value: i64) -> String {
    match normalize(value) {
        Some(t) => t
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S%.6f")
            .to_string(),
        None => format!("<invalid time {}>", value),
    }
}

/// Current time in microseconds, the unit local records and file rows use
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// Current time in nanoseconds, the unit of the archive info row
pub fn now_nanos() -> i64 {
    Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros() * 1_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_detection() {
        assert_eq!(TimeUnit::detect(1_700_000_000), TimeUnit::Seconds);
        assert_eq!(TimeUnit::detect(1_700_000_000_000), TimeUnit::Millis);
        assert_eq!(TimeUnit::detect(1_700_000_000_000_000), TimeUnit::Micros);
        assert_eq!(TimeUnit::detect(1_700_000_000_000_000_000), TimeUnit::Nanos);
        assert_eq!(TimeUnit::detect(0), TimeUnit::Seconds);
    }

    #[test]
    fn test_boundaries() {
        assert_eq!(TimeUnit::detect(999_999_999_999), TimeUnit::Seconds); // 12 digits
        assert_eq!(TimeUnit::detect(1_000_000_000_000), TimeUnit::Millis); // 13
        assert_eq!(TimeUnit::detect(999_999_999_999_999), TimeUnit::Millis); // 15
        assert_eq!(TimeUnit::detect(1_000_000_000_000_000), TimeUnit::Micros); // 16
        assert_eq!(TimeUnit::detect(999_999_999_999_999_999), TimeUnit::Micros); // 18
    }

    #[test]
    fn test_all_units_same_instant() {
        let expected = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        for value in [
            1_700_000_000,
            1_700_000_000_000,
            1_700_000_000_000_000,
            1_700_000_000_000_000_000,
        ] {
            assert_eq!(normalize(value), Some(expected), "value {}", value);
        }
    }

    #[test]
    fn test_sub_second_precision_kept() {
        let t = normalize(1_700_000_000_123_456).unwrap();
        assert_eq!(t.timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn test_real_seconds_become_nanos() {
        let v = from_real(1_700_000_000.123456);
        assert_eq!(TimeUnit::detect(v), TimeUnit::Nanos);
        assert_eq!(v / 1_000_000_000, 1_700_000_000);
        assert!((v % 1_000_000_000 - 123_456_000).abs() < 1_000);
        assert_eq!(from_real(1_700_000_000_123_456.0), 1_700_000_000_123_456);
    }

    #[test]
    fn test_now_units() {
        assert_eq!(TimeUnit::detect(now_micros()), TimeUnit::Micros);
        assert_eq!(TimeUnit::detect(now_nanos()), TimeUnit::Nanos);
    }
}
