//! Session timing and bridge configuration.

use crate::error::{CoreError, Result};
use std::time::Duration;

/// Timing for one-shot jobs and interactive sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Interval between keep-alive pings (default: 8s).
    pub ping_interval: Duration,
    /// How long the client may stay silent before the session is cancelled.
    /// Refreshed by every pong (default: 10s).
    pub pong_wait: Duration,
    /// Deadline for every write to the client or the sandbox (default: 10s).
    pub write_wait: Duration,
    /// Upper bound for a one-shot job, drain and exit included (default: 5s).
    pub job_timeout: Duration,
    /// Frames queued for the client writer before producers wait (default: 64).
    pub outbound_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(8),
            pong_wait: Duration::from_secs(10),
            write_wait: Duration::from_secs(10),
            job_timeout: Duration::from_secs(5),
            outbound_buffer: 64,
        }
    }
}

impl SessionConfig {
    /// Create a new config builder.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.ping_interval.is_zero() {
            return Err(CoreError::Config("ping_interval must be > 0".into()));
        }
        if self.ping_interval >= self.pong_wait {
            return Err(CoreError::Config(
                "ping_interval must be shorter than pong_wait".into(),
            ));
        }
        if self.write_wait.is_zero() {
            return Err(CoreError::Config("write_wait must be > 0".into()));
        }
        if self.job_timeout.is_zero() {
            return Err(CoreError::Config("job_timeout must be > 0".into()));
        }
        if self.outbound_buffer == 0 {
            return Err(CoreError::Config("outbound_buffer must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for SessionConfig.
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set the ping interval.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Set the pong wait.
    pub fn pong_wait(mut self, wait: Duration) -> Self {
        self.config.pong_wait = wait;
        self
    }

    /// Set the write deadline.
    pub fn write_wait(mut self, wait: Duration) -> Self {
        self.config.write_wait = wait;
        self
    }

    /// Set the one-shot job timeout.
    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.config.job_timeout = timeout;
        self
    }

    /// Set the outbound frame buffer.
    pub fn outbound_buffer(mut self, frames: usize) -> Self {
        self.config.outbound_buffer = frames;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<SessionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
