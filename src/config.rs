//! Configuration for the mediator channel

use std::time::Duration;

/// Configuration for connecting to a mediator
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Mediator endpoint the sandboxed context is mounted against
    pub endpoint: String,

    /// Timeout covering mount, the ready signal, and the handshake
    pub connect_timeout: Duration,

    /// Timeout for each individual request/response exchange
    pub request_timeout: Duration,

    /// How often the approval surface's closed-state is polled
    pub approval_poll_interval: Duration,

    /// Delay after the approval surface closes before re-requesting,
    /// bridging the mediator's persisted-state visibility window
    pub grant_settle_delay: Duration,
}

impl ChannelConfig {
    /// Create a new configuration for the given mediator endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(20),
            approval_poll_interval: Duration::from_millis(500),
            grant_settle_delay: Duration::from_millis(300),
        }
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the approval-surface poll interval
    pub fn approval_poll_interval(mut self, interval: Duration) -> Self {
        self.approval_poll_interval = interval;
        self
    }

    /// Set the post-approval settle delay
    pub fn grant_settle_delay(mut self, delay: Duration) -> Self {
        self.grant_settle_delay = delay;
        self
    }
}
