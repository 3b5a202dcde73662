//! Rational timebases and timestamp rescaling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit fraction a timestamp integer is measured in (e.g. 1/90000).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBase {
    num: i32,
    den: i32,
}

impl TimeBase {
    pub const MICROSECONDS: TimeBase = TimeBase::new(1, 1_000_000);

    /// Create a timebase. The denominator must not be zero.
    pub const fn new(num: i32, den: i32) -> Self {
        assert!(den != 0, "timebase denominator must not be zero");
        if den < 0 {
            Self {
                num: -num,
                den: -den,
            }
        } else {
            Self { num, den }
        }
    }

    /// Timebase of one tick per audio sample.
    pub fn from_sample_rate(sample_rate: u32) -> Self {
        Self::new(1, sample_rate.max(1) as i32)
    }

    /// Timebase of one tick per video frame.
    ///
    /// NTSC-style rates (29.97, 59.94, ...) map to `1001/N`.
    pub fn from_frame_rate(fps: f64) -> Self {
        if !fps.is_finite() || fps <= 0.0 {
            return Self::new(1, 30);
        }
        let rounded = fps.round();
        if (fps - rounded).abs() < 1e-3 {
            Self::new(1, rounded as i32)
        } else {
            Self::new(1001, (fps * 1001.0).round() as i32)
        }
    }

    pub fn num(&self) -> i32 {
        self.num
    }

    pub fn den(&self) -> i32 {
        self.den
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Reciprocal as a rate (frames or samples per second).
    pub fn rate(&self) -> f64 {
        self.den as f64 / self.num as f64
    }

    /// Convert a tick count into seconds.
    pub fn to_seconds(&self, ticks: i64) -> f64 {
        ticks as f64 * self.as_f64()
    }

    /// Convert seconds into the nearest tick count.
    pub fn from_seconds(&self, seconds: f64) -> i64 {
        (seconds / self.as_f64()).round() as i64
    }

    /// Rescale `value` from this timebase into `target`.
    ///
    /// Uses 128-bit intermediates and rounds half away from zero, so rescaling
    /// into a finer timebase and back reproduces the original value.
    pub fn rescale(&self, value: i64, target: TimeBase) -> i64 {
        if *self == target {
            return value;
        }
        let mut num = value as i128 * self.num as i128 * target.den as i128;
        let mut den = self.den as i128 * target.num as i128;
        if den == 0 {
            return value;
        }
        if den < 0 {
            num = -num;
            den = -den;
        }
        let quotient = num / den;
        let remainder = num % den;
        let rounded = if remainder.abs() * 2 >= den {
            quotient + num.signum()
        } else {
            quotient
        };
        rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::MICROSECONDS
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_to_finer_and_back() {
        let frames = TimeBase::new(1, 30);
        let container = TimeBase::new(1, 90_000);
        for pts in [0i64, 1, 2, 29, 30, 12345, -7] {
            let fine = frames.rescale(pts, container);
            assert_eq!(fine, pts * 3000);
            assert_eq!(container.rescale(fine, frames), pts);
        }
    }

    #[test]
    fn test_rescale_round_trip_within_one_tick() {
        let a = TimeBase::new(1, 1000);
        let b = TimeBase::new(1, 90_000);
        for value in (0..5000).step_by(7) {
            let there = a.rescale(value, b);
            let back = b.rescale(there, a);
            assert!((back - value).abs() <= 1, "{value} -> {there} -> {back}");
        }

        let ntsc = TimeBase::new(1001, 30_000);
        for value in 0..600 {
            let back = b.rescale(ntsc.rescale(value, b), ntsc);
            assert!((back - value).abs() <= 1);
        }
    }

    #[test]
    fn test_rescale_rounds_half_away_from_zero() {
        let tb = TimeBase::new(1, 2);
        let target = TimeBase::new(1, 1);
        assert_eq!(tb.rescale(1, target), 1);
        assert_eq!(tb.rescale(-1, target), -1);
        assert_eq!(tb.rescale(3, target), 2);
        assert_eq!(TimeBase::new(1, 3).rescale(1, target), 0);
    }

    #[test]
    fn test_frame_rate_timebase() {
        assert_eq!(TimeBase::from_frame_rate(30.0), TimeBase::new(1, 30));
        assert_eq!(TimeBase::from_frame_rate(29.97), TimeBase::new(1001, 30_000));
        assert_eq!(TimeBase::from_frame_rate(0.0), TimeBase::new(1, 30));
        assert_eq!(TimeBase::from_sample_rate(48_000).den(), 48_000);
    }

    #[test]
    fn test_seconds_conversion() {
        let tb = TimeBase::new(1, 90_000);
        assert_eq!(tb.from_seconds(1.5), 135_000);
        assert!((tb.to_seconds(45_000) - 0.5).abs() < 1e-9);
        assert_eq!(TimeBase::new(1, -25), TimeBase::new(-1, 25));
    }
}
