//! Retry back-off and inter-row pacing.
//!
//! Back-off schedule with `base = 2s`, `cap = 60s`, `jitter = 0.3`:
//!
//! | Failed attempt | Sleep before next attempt |
//! |----------------|---------------------------|
//! | 1              | 2s × 2⁰ ± 30 %            |
//! | 2              | 2s × 2¹ ± 30 %            |
//! | 3              | 2s × 2² ± 30 %            |
//!
//! A `Retry-After` hint from the service replaces the computed delay
//! (plus one second of slack). Every delay is capped.

use std::time::Duration;

/// Extra cooldown per consecutive rate-limit error, applied after the row.
const COOLDOWN_PER_RATE_LIMIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
    /// Relative jitter, 0.0 – 1.0. Zero gives a deterministic schedule.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
            jitter: 0.3,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let cap = self.cap.as_secs_f64();
        if let Some(hint) = retry_after {
            return Duration::from_secs_f64((hint.as_secs_f64() + 1.0).min(cap));
        }

        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let computed = self.base.as_secs_f64() * 2f64.powi(exponent);
        let jittered = if self.jitter > 0.0 {
            let spread = self.jitter.min(1.0);
            computed * (1.0 + spread * (rand::random::<f64>() * 2.0 - 1.0))
        } else {
            computed
        };
        Duration::from_secs_f64(jittered.clamp(0.0, cap))
    }
}

/// Inter-row pacing. The only state shared between rows.
#[derive(Debug, Clone)]
pub struct Pacer {
    delay: Duration,
    increase_factor: f64,
    cap: Duration,
    consecutive_rate_limits: u32,
}

impl Pacer {
    pub fn new(delay: Duration, increase_factor: f64, cap: Duration) -> Self {
        Self {
            delay,
            increase_factor: increase_factor.max(1.0),
            cap,
            consecutive_rate_limits: 0,
        }
    }

    /// Each rate-limit error makes the whole batch gentler.
    pub fn record_rate_limit(&mut self) {
        self.consecutive_rate_limits += 1;
        let grown = self.delay.as_secs_f64() * self.increase_factor;
        self.delay = Duration::from_secs_f64(grown.min(self.cap.as_secs_f64()));
    }

    pub fn record_success(&mut self) {
        self.consecutive_rate_limits = 0;
    }

    pub fn consecutive_rate_limits(&self) -> u32 {
        self.consecutive_rate_limits
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cooldown after a row that hit rate limits: 5s per consecutive 429, capped.
    pub fn cooldown(&self) -> Duration {
        if self.consecutive_rate_limits == 0 {
            return Duration::ZERO;
        }
        (COOLDOWN_PER_RATE_LIMIT * self.consecutive_rate_limits).min(self.cap)
    }

    /// Total pause before starting the next row.
    pub fn pause_after_row(&self) -> Duration {
        self.delay + self.cooldown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deterministic(base_ms: u64, cap_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            base: Duration::from_millis(base_ms),
            cap: Duration::from_millis(cap_ms),
            jitter: 0.0,
        }
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = deterministic(1_000, 60_000);
        assert_eq!(policy.delay_for(1, None), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2, None), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3, None), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = deterministic(1_000, 5_000);
        assert_eq!(policy.delay_for(10, None), Duration::from_secs(5));
        assert_eq!(policy.delay_for(u32::MAX, None), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_after_hint_wins_but_is_capped() {
        let policy = deterministic(1_000, 10_000);
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(3))),
            Duration::from_secs(4)
        );
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(120))),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: 0.3,
            ..deterministic(1_000, 60_000)
        };
        for _ in 0..100 {
            let d = policy.delay_for(2, None).as_secs_f64();
            assert!((1.4..=2.6).contains(&d), "delay {d} outside ±30% of 2s");
        }
    }

    #[test]
    fn test_max_attempts_counts_first_try() {
        assert_eq!(deterministic(1, 1).max_attempts(), 6);
    }

    #[test]
    fn test_pacer_grows_delay_and_cooldown_on_rate_limits() {
        let mut pacer = Pacer::new(Duration::from_secs(1), 1.5, Duration::from_secs(60));
        pacer.record_rate_limit();
        pacer.record_rate_limit();

        assert_eq!(pacer.consecutive_rate_limits(), 2);
        assert_eq!(pacer.delay(), Duration::from_secs_f64(2.25));
        assert_eq!(pacer.cooldown(), Duration::from_secs(10));
        assert_eq!(pacer.pause_after_row(), Duration::from_secs_f64(12.25));

        pacer.record_success();
        assert_eq!(pacer.cooldown(), Duration::ZERO);
        // the gentler delay survives a success
        assert_eq!(pacer.delay(), Duration::from_secs_f64(2.25));
    }

    #[test]
    fn test_pacer_cooldown_is_capped() {
        let mut pacer = Pacer::new(Duration::ZERO, 1.0, Duration::from_secs(12));
        for _ in 0..10 {
            pacer.record_rate_limit();
        }
        assert_eq!(pacer.cooldown(), Duration::from_secs(12));
    }
}
