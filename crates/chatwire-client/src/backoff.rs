//! Exponential backoff with jitter for the reconnect supervisor.

use std::time::Duration;

use chatwire_core::config::ReconnectConfig;

#[derive(Clone, Debug)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    /// 0 = unlimited.
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Backoff {
            initial_ms: config.initial_delay_ms,
            max_ms: config.max_delay_ms.max(config.initial_delay_ms),
            max_attempts: config.max_attempts,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts != 0 && self.attempt >= self.max_attempts {
            return None;
        }
        let base = self.base_delay(self.attempt);
        self.attempt += 1;
        Some(with_jitter(base, rand_jitter()))
    }

    /// Un-jittered delay for a zero-based attempt number.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.initial_ms.saturating_mul(factor).min(self.max_ms))
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Stretch `base` by up to 50%; `fraction` is in `[0, 1)`.
fn with_jitter(base: Duration, fraction: f64) -> Duration {
    base + base.mul_f64(0.5 * fraction.clamp(0.0, 1.0))
}

/// Cheap jitter source: sub-second clock nanos as a fraction.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos as f64) / 1_000_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial: u64, max: u64, attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            enabled: true,
            initial_delay_ms: initial,
            max_delay_ms: max,
            max_attempts: attempts,
        }
    }

    #[test]
    fn test_base_delay_doubles_and_caps() {
        let backoff = Backoff::new(&config(1000, 30_000, 10));
        assert_eq!(backoff.base_delay(0), Duration::from_millis(1000));
        assert_eq!(backoff.base_delay(1), Duration::from_millis(2000));
        assert_eq!(backoff.base_delay(4), Duration::from_millis(16_000));
        assert_eq!(backoff.base_delay(5), Duration::from_millis(30_000));
        assert_eq!(backoff.base_delay(200), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_millis(1000);
        assert_eq!(with_jitter(base, 0.0), base);
        assert_eq!(with_jitter(base, 1.0), Duration::from_millis(1500));
        for _ in 0..100 {
            let d = with_jitter(base, rand_jitter());
            assert!(d >= base && d <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut backoff = Backoff::new(&config(10, 100, 3));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_zero_attempts_is_unlimited() {
        let mut backoff = Backoff::new(&config(10, 100, 0));
        for _ in 0..1000 {
            assert!(backoff.next_delay().is_some());
        }
    }

    #[test]
    fn test_reset_starts_over() {
        let mut backoff = Backoff::new(&config(100, 10_000, 2));
        backoff.next_delay();
        backoff.next_delay();
        assert!(backoff.next_delay().is_none());

        backoff.reset();
        let delay = backoff.next_delay().unwrap();
        assert!(delay < Duration::from_millis(151));
    }
}
