use std::fmt::{Display, Formatter};

/// Timestamp rounded to two decimal places, stored as centiseconds.
///
/// This is the frame cache key: two sample times that print the same with two
/// decimals share one cache entry.
///
/// # Example
/// ```
/// use seek_grid::QuantizedTimestamp;
///
/// let key = QuantizedTimestamp::from_seconds(7.499);
/// assert_eq!(key.centis(), 750);
/// assert_eq!(key.to_string(), "7.50");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuantizedTimestamp(i64);

impl QuantizedTimestamp {
    /// Centiseconds per second.
    pub const SCALE: i64 = 100;

    /// Quantizes `seconds` with half-away-from-zero rounding.
    ///
    /// Non-finite input maps to zero.
    pub fn from_seconds(seconds: f64) -> Self {
        if !seconds.is_finite() {
            return Self(0);
        }
        let scaled = seconds * Self::SCALE as f64;
        Self(scaled.round() as i64)
    }

    pub fn centis(self) -> i64 {
        self.0
    }

    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }
}

impl Display for QuantizedTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = Self::SCALE.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / scale, abs % scale)
    }
}

/// Formats a cell label as `m:ss`, truncating fractional seconds.
///
/// # Example
/// ```
/// use seek_grid::time::format_clock;
///
/// assert_eq!(format_clock(75.9), "1:15");
/// assert_eq!(format_clock(3_600.0), "60:00");
/// ```
pub fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() {
        seconds.max(0.0).floor() as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}
