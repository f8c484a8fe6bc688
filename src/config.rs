//! Configuration for the stream client.
//!
//! This module provides the [`Config`] struct for order book depth, buffer
//! bounds, checksum verification, and connection behavior.

use std::time::Duration;

use crate::client::websocket::ReconnectConfig;

/// What happens to books and waiters when the connection drops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectPolicy {
    /// Reject every pending watch with
    /// [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) and forget
    /// all books and subscriptions
    #[default]
    RejectPending,
    /// Discard books but keep waiters and replay every subscription after
    /// reconnecting
    Resubscribe,
}

/// Configuration for the stream client
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use ws_orderbook::config::{Config, DisconnectPolicy};
///
/// let config = Config::new()
///     .with_depth(Some(25))
///     .with_checksum(Some(true))
///     .with_disconnect_policy(DisconnectPolicy::Resubscribe)
///     .with_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.depth(), Some(25));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Levels per side kept in each book (None = exchange default)
    depth: Option<usize>,

    /// Trades kept per symbol
    trades_limit: usize,

    /// Deltas buffered per book while waiting for a snapshot
    max_buffered_deltas: usize,

    /// Checksum verification (None = exchange default)
    checksum: Option<bool>,

    disconnect_policy: DisconnectPolicy,

    /// REST and unsubscribe timeout
    timeout: Duration,

    /// Interval between application-level pings
    keepalive: Duration,

    reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self {
            depth: None,
            trades_limit: 1000,
            max_buffered_deltas: 1000,
            checksum: None,
            disconnect_policy: DisconnectPolicy::default(),
            timeout: Duration::from_secs(10),
            keepalive: Duration::from_secs(20),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Keep at most `depth` levels per side
    #[must_use]
    pub fn with_depth(mut self, depth: Option<usize>) -> Self {
        self.depth = depth;
        self
    }

    /// Set the number of trades cached per symbol
    #[must_use]
    pub fn with_trades_limit(mut self, limit: usize) -> Self {
        self.trades_limit = limit;
        self
    }

    /// Bound the deltas buffered while a snapshot is outstanding
    #[must_use]
    pub fn with_max_buffered_deltas(mut self, max: usize) -> Self {
        self.max_buffered_deltas = max;
        self
    }

    /// Force checksum verification on or off
    #[must_use]
    pub fn with_checksum(mut self, checksum: Option<bool>) -> Self {
        self.checksum = checksum;
        self
    }

    /// Set the disconnect policy
    #[must_use]
    pub fn with_disconnect_policy(mut self, policy: DisconnectPolicy) -> Self {
        self.disconnect_policy = policy;
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the ping interval
    #[must_use]
    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Set the reconnection behavior
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Get the book depth
    pub fn depth(&self) -> Option<usize> {
        self.depth
    }

    /// Get the trades cache capacity
    pub fn trades_limit(&self) -> usize {
        self.trades_limit
    }

    /// Get the delta buffer bound
    pub fn max_buffered_deltas(&self) -> usize {
        self.max_buffered_deltas
    }

    /// Get the checksum override
    pub fn checksum(&self) -> Option<bool> {
        self.checksum
    }

    /// Get the disconnect policy
    pub fn disconnect_policy(&self) -> DisconnectPolicy {
        self.disconnect_policy
    }

    /// Get the timeout duration
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the ping interval
    pub fn keepalive(&self) -> Duration {
        self.keepalive
    }

    /// Get the reconnection behavior
    pub fn reconnect(&self) -> &ReconnectConfig {
        &self.reconnect
    }
}
