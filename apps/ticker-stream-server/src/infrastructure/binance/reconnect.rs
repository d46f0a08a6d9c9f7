//! Upstream Reconnect Policy
//!
//! Exponential backoff with jitter between attempts to re-establish the
//! exchange connection. Delay for attempt `n` (1-based) is
//! `initial * multiplier^(n-1)`, capped at `max_delay`, then shifted by a
//! random ±`jitter_factor` fraction so many servers restarting together do
//! not reconnect in lockstep.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::UpstreamSettings;

/// Backoff tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect.
    pub initial_delay: Duration,
    /// Delay ceiling.
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Random spread as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = never give up).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl From<&UpstreamSettings> for ReconnectConfig {
    fn from(settings: &UpstreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            max_attempts: settings.max_reconnect_attempts,
            ..Self::default()
        }
    }
}

/// Stateful backoff sequence for one connection lifetime.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    /// Create a policy at attempt zero.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Advance to the next attempt and return how long to wait before it.
    ///
    /// Returns `None` once `max_attempts` is reached.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempt += 1;
        Some(self.jittered(self.base_delay(self.attempt)))
    }

    /// Forget previous failures once a connection has delivered data.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the attempt budget is used up.
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.config.max_attempts > 0 && self.attempt >= self.config.max_attempts
    }

    /// Un-jittered delay for a 1-based attempt number.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.config.multiplier.max(1.0).powi(exponent);
        let max_secs = self.config.max_delay.as_secs_f64();
        let secs = (self.config.initial_delay.as_secs_f64() * factor).min(max_secs);
        if secs.is_finite() {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            self.config.max_delay
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }
        let base = delay.as_secs_f64();
        let spread = base * self.config.jitter_factor;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((base + offset).max(0.001))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            jitter_factor: 0.0,
            max_attempts,
            ..ReconnectConfig::default()
        }
    }

    #[test]
    fn defaults_match_documented_policy() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 0);
    }

    #[test]
    fn delay_doubles_until_cap() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));
        let delays: Vec<_> = (0..9).map(|_| policy.next_delay().unwrap()).collect();

        assert_eq!(delays[0], Duration::from_millis(500));
        assert_eq!(delays[1], Duration::from_secs(1));
        assert_eq!(delays[2], Duration::from_secs(2));
        assert_eq!(delays[5], Duration::from_secs(16));
        assert_eq!(delays[6], Duration::from_secs(30));
        assert_eq!(delays[8], Duration::from_secs(30));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut policy = ReconnectPolicy::new(no_jitter(2));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.exhausted());
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.attempt(), 2);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();
        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            ..ReconnectConfig::default()
        });
        for _ in 0..200 {
            policy.reset();
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of bounds");
        }
    }

    #[test]
    fn unlimited_never_exhausts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        for _ in 0..10_000 {
            assert!(policy.next_delay().is_some());
        }
        assert!(!policy.exhausted());
    }
}
