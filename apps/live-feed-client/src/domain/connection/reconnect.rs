//! Reconnection Policy
//!
//! Fixed-delay reconnection with an attempt counter that decides when the
//! manager stops relying on the stream alone and issues a fallback fetch.

use std::time::Duration;

/// Default delay before reconnecting after an abnormal close.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Default time to wait for the first payload before falling back.
pub const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default number of failed attempts after which errors trigger a fallback.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Configuration for reconnection and fallback timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay between an abnormal close and the next attempt.
    pub reconnect_delay: Duration,
    /// Time from connect start to wait for the first payload.
    pub data_timeout: Duration,
    /// Failed attempts after which a transport error triggers a fallback.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            data_timeout: DEFAULT_DATA_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(reconnect_delay: Duration, data_timeout: Duration, max_attempts: u32) -> Self {
        Self {
            reconnect_delay,
            data_timeout,
            max_attempts,
        }
    }
}

/// Consecutive failed connection attempts.
///
/// Reset on a successful open, incremented on every close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptCounter {
    count: u32,
    max: u32,
}

impl AttemptCounter {
    /// Create a counter with the given threshold.
    #[must_use]
    pub const fn new(max: u32) -> Self {
        Self { count: 0, max }
    }

    /// Record a failed attempt.
    pub const fn increment(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    /// Reset after a successful connection.
    pub const fn reset(&mut self) {
        self.count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Check if the threshold has been reached.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.count >= self.max
    }
}
