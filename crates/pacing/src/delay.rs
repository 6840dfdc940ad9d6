//! Randomized delays and cancellable sleeping

use std::time::Duration;

use rand::RngExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// Inclusive range of durations a randomized wait is drawn from.
///
/// Deserializes from either a single number of seconds (fixed delay) or a
/// two-element array `[min, max]`:
///
/// ```toml
/// account_spacing_secs = 1.0
/// pick_delay_secs = [1.0, 3.0]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RangeRepr")]
pub struct DelayRange {
    min: Duration,
    max: Duration,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RangeRepr {
    Fixed(f64),
    Pair([f64; 2]),
}

impl TryFrom<RangeRepr> for DelayRange {
    type Error = String;

    fn try_from(repr: RangeRepr) -> Result<Self, Self::Error> {
        match repr {
            RangeRepr::Fixed(secs) => DelayRange::from_secs(secs, secs),
            RangeRepr::Pair([min, max]) => DelayRange::from_secs(min, max),
        }
    }
}

impl DelayRange {
    /// No delay at all.
    pub const ZERO: DelayRange = DelayRange {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    /// Range with `min > max` is rejected.
    pub fn new(min: Duration, max: Duration) -> Result<Self, String> {
        if min > max {
            return Err(format!(
                "delay range min ({}s) exceeds max ({}s)",
                min.as_secs_f64(),
                max.as_secs_f64()
            ));
        }
        Ok(Self { min, max })
    }

    pub const fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    /// Build from fractional seconds, rejecting negative, non-finite and inverted values.
    pub fn from_secs(min: f64, max: f64) -> Result<Self, String> {
        if !min.is_finite() || !max.is_finite() || min < 0.0 || max < 0.0 {
            return Err(format!("delay range [{min}, {max}] must be finite and non-negative"));
        }
        let secs = |value: f64| {
            Duration::try_from_secs_f64(value).map_err(|_| format!("delay of {value}s is out of range"))
        };
        Self::new(secs(min)?, secs(max)?)
    }

    /// `base` scaled by a uniform factor in `[low, high]`, saturating at `Duration::MAX`.
    pub fn scaled(base: Duration, low: f64, high: f64) -> Self {
        let scale = |factor: f64| {
            Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
        };
        Self {
            min: scale(low),
            max: scale(high),
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn is_zero(&self) -> bool {
        self.max.is_zero()
    }

    /// Draw a delay uniformly from the range.
    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let secs = rand::rng().random_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Sleep for `duration` unless `cancel` fires first.
///
/// Returns `true` when the full duration elapsed and `false` when the sleep
/// was cut short by cancellation. A zero duration still reports an already
/// cancelled token.
pub async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Knobs {
        fixed: DelayRange,
        pair: DelayRange,
    }

    #[test]
    fn deserializes_fixed_and_pair_forms() {
        let knobs: Knobs = toml::from_str("fixed = 1.5\npair = [1.0, 3.0]").unwrap();
        assert_eq!(knobs.fixed, DelayRange::fixed(Duration::from_millis(1500)));
        assert_eq!(knobs.pair.min(), Duration::from_secs(1));
        assert_eq!(knobs.pair.max(), Duration::from_secs(3));
    }

    #[test]
    fn rejects_inverted_range() {
        let result: Result<Knobs, _> = toml::from_str("fixed = 1.0\npair = [3.0, 1.0]");
        let err = result.err().expect("inverted range must be rejected").to_string();
        assert!(err.contains("exceeds max"), "got: {err}");
    }

    #[test]
    fn rejects_negative_seconds() {
        assert!(DelayRange::from_secs(-1.0, 2.0).is_err());
        assert!(DelayRange::from_secs(0.0, f64::NAN).is_err());
    }

    #[test]
    fn sample_stays_within_bounds() {
        let range = DelayRange::from_secs(0.1, 0.3).unwrap();
        for _ in 0..200 {
            let d = range.sample();
            assert!(d >= range.min() && d <= range.max(), "sampled {d:?}");
        }
    }

    #[test]
    fn scaled_range_brackets_base() {
        let range = DelayRange::scaled(Duration::from_secs(30), 0.8, 1.2);
        assert_eq!(range.min(), Duration::from_secs(24));
        assert_eq!(range.max(), Duration::from_secs(36));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(DelayRange::from_secs(0.0, 1e300).unwrap_err().contains("out of range"));
        let range = DelayRange::scaled(Duration::MAX, 0.8, 1.2);
        assert_eq!(range.max(), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_cancel() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        assert!(sleep_or_cancel(&cancel, Duration::from_secs(20)).await);
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_returns_early_on_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        assert!(!sleep_or_cancel(&cancel, Duration::from_secs(60)).await);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn zero_sleep_reports_cancelled_token() {
        let cancel = CancellationToken::new();
        assert!(sleep_or_cancel(&cancel, Duration::ZERO).await);
        cancel.cancel();
        assert!(!sleep_or_cancel(&cancel, Duration::ZERO).await);
    }
}
