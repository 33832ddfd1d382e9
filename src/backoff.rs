//! Reconnect delay computation.

use std::time::Duration;

use rand::Rng as _;

use crate::config::ReconnectConfig;

/// Upper bound (exclusive) of the random jitter added to every delay.
pub const MAX_JITTER: Duration = Duration::from_secs(1);

/// Delay before the next attempt, without jitter.
///
/// With a zero factor the base delay is used as is. Otherwise the delay grows as
/// `delay * factor^retry_count` and is capped at `max_delay`.
#[must_use]
#[expect(
    clippy::float_arithmetic,
    reason = "Exponential growth is defined over a fractional factor"
)]
pub fn base_delay(config: &ReconnectConfig, retry_count: u32) -> Duration {
    if config.exponential_factor == 0.0 {
        return config.delay;
    }

    let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
    let seconds = config.delay.as_secs_f64() * config.exponential_factor.powi(exponent);

    // NaN and infinity fall through to the cap as well.
    if seconds.is_finite() && seconds < config.max_delay.as_secs_f64() {
        Duration::from_secs_f64(seconds)
    } else {
        config.max_delay
    }
}

/// Delay before the next attempt, with uniform jitter in `[0, 1s)`.
#[must_use]
pub fn retry_delay(config: &ReconnectConfig, retry_count: u32) -> Duration {
    base_delay(config, retry_count) + jitter()
}

fn jitter() -> Duration {
    let max = u64::try_from(MAX_JITTER.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::rng().random_range(0..max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(delay_ms: u64, factor: f64, max_ms: u64) -> ReconnectConfig {
        ReconnectConfig::builder()
            .delay(Duration::from_millis(delay_ms))
            .exponential_factor(factor)
            .max_delay(Duration::from_millis(max_ms))
            .build()
    }

    #[test]
    fn zero_factor_is_constant() {
        let config = config(10_000, 0.0, 30_000);

        for retry_count in 0..20 {
            assert_eq!(base_delay(&config, retry_count), Duration::from_secs(10));
        }
    }

    #[test]
    fn zero_factor_ignores_max_delay() {
        let config = config(50_000, 0.0, 30_000);
        assert_eq!(base_delay(&config, 3), Duration::from_secs(50));
    }

    #[test]
    fn exponential_sequence() {
        let config = config(100, 2.0, 30_000);

        assert_eq!(base_delay(&config, 0), Duration::from_millis(100));
        assert_eq!(base_delay(&config, 1), Duration::from_millis(200));
        assert_eq!(base_delay(&config, 2), Duration::from_millis(400));
        assert_eq!(base_delay(&config, 3), Duration::from_millis(800));
    }

    #[test]
    fn non_decreasing_and_capped() {
        let config = config(1_000, 1.5, 30_000);

        let mut previous = Duration::ZERO;
        for retry_count in 0..200 {
            let delay = base_delay(&config, retry_count);
            assert!(delay >= previous, "delay shrank at attempt {retry_count}");
            assert!(delay <= config.max_delay);
            previous = delay;
        }
        assert_eq!(previous, Duration::from_secs(30));
    }

    #[test]
    fn huge_exponent_saturates_to_max() {
        let config = config(10_000, 10.0, 30_000);
        assert_eq!(base_delay(&config, u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let config = config(1_000, 3.0, 5_000);

        for retry_count in 0..50 {
            let base = base_delay(&config, retry_count);
            let delay = retry_delay(&config, retry_count);
            assert!(delay >= base);
            assert!(delay < base + MAX_JITTER);
            assert!(delay < config.max_delay + MAX_JITTER);
        }
    }
}
