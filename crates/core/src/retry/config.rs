//! Retry configuration with a fluent builder

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use circlepay_common::{ExponentialBackoff, Jitter};
use circlepay_domain::constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_EXPONENTIAL_BASE, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES,
};
use circlepay_domain::{CirclePayError, Result, RetrySettings};

/// Decides whether `error` on the zero-based `attempt` may be retried.
pub type RetryPredicate = Arc<dyn Fn(&CirclePayError, u32) -> bool + Send + Sync>;

/// Observer called with an error and a one-based attempt number.
pub type RetryCallback = Arc<dyn Fn(&CirclePayError, u32) + Send + Sync>;

/// Retry behaviour of a single request
#[derive(Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; the request gets `max_retries + 1` tries.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
    pub retry_predicate: RetryPredicate,
    /// Called before each backoff sleep.
    pub on_retry: Option<RetryCallback>,
    /// Called once when the request is given up on.
    pub on_failure: Option<RetryCallback>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            exponential_base: DEFAULT_EXPONENTIAL_BASE,
            jitter: true,
            retry_predicate: Arc::new(|error, _attempt| error.is_retryable()),
            on_retry: None,
            on_failure: None,
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("exponential_base", &self.exponential_base)
            .field("jitter", &self.jitter)
            .field("on_retry", &self.on_retry.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish_non_exhaustive()
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            exponential_base: settings.exponential_base,
            jitter: settings.jitter,
            ..Self::default()
        }
    }
}

impl RetryConfig {
    /// Builder starting from the defaults.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Total attempts the request may consume
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Reject a shrinking base or a cap below the base delay.
    pub fn validate(&self) -> Result<()> {
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(CirclePayError::Config(format!(
                "exponential_base must be >= 1.0, got {}",
                self.exponential_base
            )));
        }
        if self.max_delay < self.base_delay {
            return Err(CirclePayError::Config(
                "max_delay must not be shorter than base_delay".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay schedule described by this configuration.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.base_delay, self.exponential_base, self.max_delay)
    }

    /// Wait before the attempt following zero-based `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff().next_delay(attempt, Jitter::from_enabled(self.jitter))
    }

    /// Whether `error` on zero-based `attempt` may be retried.
    pub fn should_retry(&self, error: &CirclePayError, attempt: u32) -> bool {
        (self.retry_predicate)(error, attempt)
    }

    pub(crate) fn notify_retry(&self, error: &CirclePayError, attempt_number: u32) {
        if let Some(on_retry) = &self.on_retry {
            on_retry(error, attempt_number);
        }
    }

    pub(crate) fn notify_failure(&self, error: &CirclePayError, total_attempts: u32) {
        if let Some(on_failure) = &self.on_failure {
            on_failure(error, total_attempts);
        }
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Builder starting from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Retries allowed after the first attempt.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Upper bound on any single delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Growth factor between consecutive delays.
    pub fn exponential_base(mut self, base: f64) -> Self {
        self.config.exponential_base = base;
        self
    }

    /// Enable or disable proportional jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.jitter = enabled;
        self
    }

    /// Use the deterministic delays.
    pub fn no_jitter(self) -> Self {
        self.jitter(false)
    }

    /// Replace the default retryability predicate.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CirclePayError, u32) -> bool + Send + Sync + 'static,
    {
        self.config.retry_predicate = Arc::new(predicate);
        self
    }

    /// Observe each retry before its backoff sleep.
    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CirclePayError, u32) + Send + Sync + 'static,
    {
        self.config.on_retry = Some(Arc::new(callback));
        self
    }

    /// Observe the final failure of a request.
    pub fn on_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CirclePayError, u32) + Send + Sync + 'static,
    {
        self.config.on_failure = Some(Arc::new(callback));
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
