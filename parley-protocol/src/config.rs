//! Protocol configuration.

use std::time::Duration;

/// Per-request correlation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// Deadline for each attempt. Zero disables the deadline.
    pub timeout: Duration,
    /// Extra attempts allowed after a timeout or failure reply.
    pub max_retries: u32,
    /// Pause before re-arming the deadline after a setback.
    pub retry_delay: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl RequestOptions {
    /// Options with a deadline and no retries.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set the retry budget.
    pub fn retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Wait for a reply indefinitely.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = Duration::ZERO;
        self
    }

    pub fn has_deadline(&self) -> bool {
        !self.timeout.is_zero()
    }
}

/// Protocol-wide configuration.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Options used when a request does not bring its own.
    pub request: RequestOptions,
    /// Buffered notifications per subscriber.
    pub event_capacity: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            request: RequestOptions::default(),
            event_capacity: 256,
        }
    }
}

impl ProtocolConfig {
    /// Set default request options.
    pub fn with_request_options(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }

    /// Set the event buffer size. Clamped to at least one.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ProtocolConfig::default();
        assert_eq!(config.request.timeout, Duration::from_secs(30));
        assert_eq!(config.request.max_retries, 3);
        assert!(config.request.has_deadline());
    }

    #[test]
    fn custom_config() {
        let options = RequestOptions::with_timeout(Duration::from_millis(50))
            .retries(2, Duration::from_millis(10));
        let config = ProtocolConfig::default()
            .with_request_options(options)
            .with_event_capacity(0);

        assert_eq!(config.request.max_retries, 2);
        assert_eq!(config.request.retry_delay, Duration::from_millis(10));
        assert_eq!(config.event_capacity, 1);
        assert!(!options.without_timeout().has_deadline());
    }
}
