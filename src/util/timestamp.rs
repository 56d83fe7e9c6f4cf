//! Timestamp handling and timescale conversion
//!
//! All timecodes that cross a component boundary in this crate are in
//! nanoseconds. Container-local tick values are converted on the way in
//! with [`Timescale::ticks_to_nsecs`].

use std::fmt;

/// Number of nanoseconds per second
pub const NSECS_PER_SEC: i64 = 1_000_000_000;

/// A presentation timecode in nanoseconds, or "unset"
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timecode {
    value: i64,
}

impl Timecode {
    /// Create a timecode from a nanosecond value
    pub fn from_nsecs(value: i64) -> Self {
        Timecode { value }
    }

    /// Timecode zero
    pub fn zero() -> Self {
        Timecode { value: 0 }
    }

    /// Unset / unknown timecode
    pub fn unset() -> Self {
        Timecode { value: i64::MIN }
    }

    /// Check whether the timecode carries a value
    pub fn is_set(&self) -> bool {
        self.value != i64::MIN
    }

    /// Nanosecond value; zero when unset
    pub fn nsecs(&self) -> i64 {
        if self.is_set() {
            self.value
        } else {
            0
        }
    }

    /// Shift by a signed nanosecond delta
    pub fn shifted(&self, delta: i64) -> Self {
        if !self.is_set() {
            return *self;
        }
        Timecode {
            value: self.value + delta,
        }
    }

    /// Seconds as floating point, for diagnostics
    pub fn to_seconds(&self) -> f64 {
        self.nsecs() as f64 / NSECS_PER_SEC as f64
    }
}

impl Default for Timecode {
    fn default() -> Self {
        Timecode::unset()
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_set() {
            write!(f, "{}ns", self.value)
        } else {
            write!(f, "unset")
        }
    }
}

/// A container time scale (ticks per second)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timescale(pub u32);

impl Timescale {
    /// Convert a tick count in this time scale to nanoseconds.
    ///
    /// Uses a widened intermediate so `ticks * 1e9` cannot overflow for
    /// any 64-bit tick count and 32-bit scale.
    pub fn ticks_to_nsecs(&self, ticks: i64) -> i64 {
        if self.0 == 0 {
            return 0;
        }
        let wide = ticks as i128 * NSECS_PER_SEC as i128 / self.0 as i128;
        wide as i64
    }

    /// Convert nanoseconds back to ticks in this time scale
    pub fn nsecs_to_ticks(&self, nsecs: i64) -> i64 {
        let wide = nsecs as i128 * self.0 as i128 / NSECS_PER_SEC as i128;
        wide as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timecode_unset() {
        let tc = Timecode::unset();
        assert!(!tc.is_set());
        assert_eq!(tc.nsecs(), 0);
    }

    #[test]
    fn test_timecode_shift() {
        let tc = Timecode::from_nsecs(1_000);
        assert_eq!(tc.shifted(-250).nsecs(), 750);
        assert!(!Timecode::unset().shifted(100).is_set());
    }

    #[test]
    fn test_ticks_to_nsecs_exact() {
        let ts = Timescale(1000);
        assert_eq!(ts.ticks_to_nsecs(5), 5_000_000);
        assert_eq!(ts.ticks_to_nsecs(-3), -3_000_000);
    }

    #[test]
    fn test_ticks_to_nsecs_large_no_overflow() {
        // Values that would overflow a plain i64 multiply
        let ts = Timescale(90_000);
        let ticks = 4_000_000_000_000i64;
        let expected = (ticks as i128 * 1_000_000_000 / 90_000) as i64;
        assert_eq!(ts.ticks_to_nsecs(ticks), expected);
    }

    #[test]
    fn test_nsecs_to_ticks_round_trip() {
        let ts = Timescale(48_000);
        let nsecs = 21_333_333;
        let ticks = ts.nsecs_to_ticks(nsecs);
        assert_eq!(ticks, 1024);
    }
}
