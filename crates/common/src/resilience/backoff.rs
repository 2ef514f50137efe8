//! Exponential backoff with multiplicative jitter
//!
//! Delays are computed in whole milliseconds. Jitter multiplies the rounded
//! deterministic delay by a factor in `[0.5, 1.0]`, so a jittered wait is never
//! longer than the unjittered one and never shorter than half of it.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff: `min(base_delay * exponential_base^attempt, max_delay)`
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    pub base_delay: Duration,
    pub exponential_base: f64,
    pub max_delay: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            exponential_base: 2.0,
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl ExponentialBackoff {
    /// Backoff starting at `base_delay`, growing by `exponential_base`, capped at `max_delay`.
    pub fn new(base_delay: Duration, exponential_base: f64, max_delay: Duration) -> Self {
        Self { base_delay, exponential_base, max_delay }
    }

    /// Deterministic delay for a zero-based attempt index.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = duration_millis(self.base_delay) * self.exponential_base.powi(exponent);
        round_millis(raw.min(duration_millis(self.max_delay)))
    }

    /// Delay for `attempt` with `jitter` applied.
    pub fn next_delay(&self, attempt: u32, jitter: Jitter) -> Duration {
        jitter.apply(self.delay_for(attempt))
    }
}

/// Jitter applied on top of a computed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the deterministic delay as is.
    None,
    /// Multiply by a uniform random factor in `[0.5, 1.0]`.
    #[default]
    Proportional,
}

impl Jitter {
    /// Smallest multiplier applied by [`Jitter::Proportional`].
    pub const MIN_FACTOR: f64 = 0.5;
    /// Largest multiplier applied by [`Jitter::Proportional`].
    pub const MAX_FACTOR: f64 = 1.0;

    /// Proportional jitter when `enabled`, none otherwise.
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            Self::Proportional
        } else {
            Self::None
        }
    }

    /// Apply jitter to a delay
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Self::None => delay,
            Self::Proportional => {
                let factor = rand::thread_rng().gen_range(Self::MIN_FACTOR..=Self::MAX_FACTOR);
                Self::scale(delay, factor)
            }
        }
    }

    /// Scale `delay` by `factor` (clamped to the jitter range), rounded to
    /// whole milliseconds.
    pub fn scale(delay: Duration, factor: f64) -> Duration {
        let factor = factor.clamp(Self::MIN_FACTOR, Self::MAX_FACTOR);
        round_millis(duration_millis(delay) * factor)
    }
}

#[allow(clippy::cast_precision_loss)]
fn duration_millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_millis(millis: f64) -> Duration {
    if !millis.is_finite() || millis <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_millis(millis.round() as u64)
}
