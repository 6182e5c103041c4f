//! Capped exponential backoff with additive jitter.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::BackoffConfig;

/// Reconnect delay generator.
///
/// The n-th delay is `min(cap, d + U(0, d × jitter))` with `d = base × 2^n`.
/// With `jitter <= 1` the jittered delay never exceeds the next un-jittered
/// one, so consecutive delays are non-decreasing up to the cap.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
    attempt: u32,
    rng: StdRng,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic backoff for tests.
    pub fn seeded(config: &BackoffConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &BackoffConfig, rng: StdRng) -> Self {
        Self {
            base: config.base(),
            cap: config.cap().max(config.base()),
            jitter: config.jitter.clamp(0.0, 1.0),
            attempt: 0,
            rng,
        }
    }

    /// Consecutive failures so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next reconnect; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32 << self.attempt.min(31);
        let delay = self.base.saturating_mul(factor).min(self.cap);

        let extra = if self.jitter > 0.0 {
            delay.mul_f64(self.rng.gen_range(0.0..=self.jitter))
        } else {
            Duration::ZERO
        };

        self.attempt = self.attempt.saturating_add(1);
        delay.saturating_add(extra).min(self.cap)
    }

    /// Back to the base delay after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
