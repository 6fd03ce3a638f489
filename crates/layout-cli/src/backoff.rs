//! Exponential backoff with jitter for retrying timed-out jobs.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    jitter_ratio: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
            jitter_ratio: 0.2,
        }
    }

    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Delay before the next attempt. The first failure waits `base`.
    pub fn fail(&mut self) -> Duration {
        let delay = add_jitter(self.current, self.jitter_ratio);
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

fn add_jitter(delay: Duration, ratio: f64) -> Duration {
    if !(0.0..=1.0).contains(&ratio) {
        return delay;
    }
    let delay_ms = delay.as_millis() as u64;
    let jitter_ms_max = ((delay_ms as f64) * ratio) as u64;
    if jitter_ms_max == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=jitter_ms_max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_doubles_until_max() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(35)).with_jitter(0.0);
        assert_eq!(backoff.fail(), Duration::from_millis(10));
        assert_eq!(backoff.fail(), Duration::from_millis(20));
        assert_eq!(backoff.fail(), Duration::from_millis(35));
        assert_eq!(backoff.fail(), Duration::from_millis(35));
        backoff.reset();
        assert_eq!(backoff.fail(), Duration::from_millis(10));
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        let delay = backoff.fail();
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(120));
    }
}
