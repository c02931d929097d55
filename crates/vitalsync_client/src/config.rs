//! Configuration for the sync client.

use rand::Rng;
use std::time::Duration;
use vitalsync_protocol::DEFAULT_RATE_WINDOW;

/// Default server endpoint.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8080";

/// Configuration for a [`SyncClient`](crate::SyncClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URL.
    pub endpoint: String,
    /// Reconnection behaviour after an unclean close.
    pub retry: RetryConfig,
    /// Messages kept in the history.
    pub history_limit: usize,
    /// Samples kept for the update-frequency estimate.
    pub metrics_window: usize,
    /// Events buffered per subscriber before it lags.
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Creates a new client configuration.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            retry: RetryConfig::default(),
            history_limit: 100,
            metrics_window: DEFAULT_RATE_WINDOW,
            event_capacity: 256,
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the history size.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Sets the update-frequency window size.
    pub fn with_metrics_window(mut self, samples: usize) -> Self {
        self.metrics_window = samples;
        self
    }

    /// Sets the event buffer per subscriber.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

/// Configuration for reconnect backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of consecutive reconnect attempts.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration that never reconnects.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay before a given attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::new("ws://ward.local:9000")
            .with_history_limit(20)
            .with_event_capacity(0);

        assert_eq!(config.endpoint, "ws://ward.local:9000");
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.event_capacity, 1);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(ClientConfig::default().endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn retry_delay_doubles() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(16));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(true);

        let delay = config.delay_for_attempt(5);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(6250));
    }
}
