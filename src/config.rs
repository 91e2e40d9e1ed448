//! Tunnel configuration.
//!
//! Liveness timings, size limits and registry key lengths. These are local
//! constants, not negotiated with peers.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use spider_tunnel::TunnelConfig;
//!
//! let config = TunnelConfig::new()
//!     .with_pong_wait(Duration::from_secs(30))
//!     .with_host_key_length(16);
//!
//! assert_eq!(config.ping_period, Duration::from_secs(27));
//! assert!(config.validate().is_ok());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::error::{Error, Result};
use crate::protocol::HEADER_LEN;

// ============================================================================
// Constants
// ============================================================================

/// Time allowed to read the next pong from the peer.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Pings are sent with this period. Must be less than the pong wait.
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(54);

/// Time allowed to write a message to the peer.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Maximum message size allowed from a peer.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;

/// Global host registry key length in bytes.
pub const DEFAULT_HOST_KEY_LENGTH: usize = 8;

/// Capacity of every bounded data queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Path of the host route; client routes append `/<hex key>`.
pub const DEFAULT_ROUTE_PREFIX: &str = "/net";

/// Longest host key accepted by validation.
const MAX_HOST_KEY_LENGTH: usize = 64;

// ============================================================================
// TunnelConfig
// ============================================================================

/// Runtime configuration shared by the listener and every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Rolling read deadline, extended by every pong.
    pub pong_wait: Duration,

    /// Keepalive ping interval.
    pub ping_period: Duration,

    /// Deadline applied to each socket write.
    pub write_wait: Duration,

    /// Largest inbound WebSocket message accepted.
    pub max_message_size: usize,

    /// Length of keys issued by the global host registry.
    pub host_key_length: usize,

    /// Capacity of the bounded data queues.
    pub queue_capacity: usize,

    /// Request path of the host route.
    pub route_prefix: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl TunnelConfig {
    /// Creates a configuration with the default timings and limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: DEFAULT_PING_PERIOD,
            write_wait: DEFAULT_WRITE_WAIT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            host_key_length: DEFAULT_HOST_KEY_LENGTH,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            route_prefix: DEFAULT_ROUTE_PREFIX.to_string(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl TunnelConfig {
    /// Sets the pong wait and derives the ping period as 9/10 of it.
    #[inline]
    #[must_use]
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = pong_wait * 9 / 10;
        self
    }

    /// Overrides the ping period.
    #[inline]
    #[must_use]
    pub fn with_ping_period(mut self, ping_period: Duration) -> Self {
        self.ping_period = ping_period;
        self
    }

    /// Sets the per-write deadline.
    #[inline]
    #[must_use]
    pub fn with_write_wait(mut self, write_wait: Duration) -> Self {
        self.write_wait = write_wait;
        self
    }

    /// Sets the maximum inbound message size.
    #[inline]
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets the length of host keys.
    #[inline]
    #[must_use]
    pub fn with_host_key_length(mut self, length: usize) -> Self {
        self.host_key_length = length;
        self
    }

    /// Sets the capacity of the data queues.
    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the host route path.
    #[inline]
    #[must_use]
    pub fn with_route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_prefix = prefix.into();
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl TunnelConfig {
    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.pong_wait.is_zero() || self.ping_period.is_zero() || self.write_wait.is_zero() {
            return Err(Error::config("timings must be non-zero"));
        }

        if self.ping_period >= self.pong_wait {
            return Err(Error::config(format!(
                "ping period {:?} must be shorter than pong wait {:?}",
                self.ping_period, self.pong_wait
            )));
        }

        if self.max_message_size <= HEADER_LEN {
            return Err(Error::config(format!(
                "max message size {} leaves no room for a frame payload",
                self.max_message_size
            )));
        }

        if self.host_key_length == 0 || self.host_key_length > MAX_HOST_KEY_LENGTH {
            return Err(Error::config(format!(
                "host key length must be 1..={MAX_HOST_KEY_LENGTH}, got {}",
                self.host_key_length
            )));
        }

        if self.queue_capacity == 0 {
            return Err(Error::config("queue capacity must be non-zero"));
        }

        if !self.route_prefix.starts_with('/') || self.route_prefix.ends_with('/') {
            return Err(Error::config(format!(
                "route prefix must start with '/' and not end with one: {:?}",
                self.route_prefix
            )));
        }

        Ok(())
    }

    /// Returns the WebSocket codec limits matching this configuration.
    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_message_size))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let config = TunnelConfig::default();
        assert_eq!(config.pong_wait, Duration::from_secs(60));
        assert_eq!(config.ping_period, Duration::from_secs(54));
        assert_eq!(config.write_wait, Duration::from_secs(10));
        assert_eq!(config.max_message_size, 512);
        assert_eq!(config.host_key_length, 8);
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.route_prefix, "/net");
        assert_ok!(config.validate());
    }

    #[test]
    fn test_pong_wait_derives_ping_period() {
        let config = TunnelConfig::new().with_pong_wait(Duration::from_millis(1000));
        assert_eq!(config.ping_period, Duration::from_millis(900));
        assert_ok!(config.validate());
    }

    #[test]
    fn test_ping_period_must_be_shorter() {
        let config = TunnelConfig::new().with_ping_period(Duration::from_secs(60));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_rejects_zero_queue() {
        let config = TunnelConfig::new().with_queue_capacity(0);
        assert_err!(config.validate());
    }

    #[test]
    fn test_rejects_bad_key_lengths() {
        assert_err!(TunnelConfig::new().with_host_key_length(0).validate());
        assert_err!(TunnelConfig::new().with_host_key_length(65).validate());
        assert_ok!(TunnelConfig::new().with_host_key_length(64).validate());
    }

    #[test]
    fn test_rejects_tiny_message_size() {
        let config = TunnelConfig::new().with_max_message_size(2);
        assert_err!(config.validate());
    }

    #[test]
    fn test_route_prefix_shape() {
        assert!(TunnelConfig::new().with_route_prefix("/tunnel").validate().is_ok());
        assert!(TunnelConfig::new().with_route_prefix("net").validate().is_err());
        assert!(TunnelConfig::new().with_route_prefix("/net/").validate().is_err());
    }
}
