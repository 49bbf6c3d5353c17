// Local crates
use crate::helpers::load_config::DeliveryConfig;

// External crates
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with multiplicative jitter.
///
/// Policy:
/// - Start with `initial`.
/// - Multiply the delay by `factor` after each attempt, capping at `max`.
/// - Scale each returned delay by a random factor in `[1 - jitter, 1 + jitter)`.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
}

impl Backoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration, factor: f64, jitter: f64) -> Self {
        Self {
            delay: initial.min(max),
            max,
            factor: factor.max(1.0),
            jitter: jitter.clamp(0.0, 0.99),
        }
    }

    #[must_use]
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_retry_delay_ms),
            Duration::from_millis(config.max_retry_delay_ms),
            config.backoff_factor,
            config.retry_jitter,
        )
    }

    /// The delay to sleep before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.delay;

        self.delay = Duration::from_secs_f64(
            (base.as_secs_f64() * self.factor).min(self.max.as_secs_f64()),
        );

        if self.jitter > 0.0 {
            let jitter_factor: f64 = rand::rng().random_range(1.0 - self.jitter..1.0 + self.jitter);
            base.mul_f64(jitter_factor)
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_by_factor_and_caps() {
        let mut backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
            2.0,
            0.0,
        );

        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(
            Duration::from_millis(1000),
            Duration::from_millis(1000),
            1.0,
            0.2,
        );

        for _ in 0..100 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(799));
            assert!(delay <= Duration::from_millis(1200));
        }
    }
}
