//! Inbound message variants.
//!
//! Exchange protocols parse raw frames into [`InboundMessage`], a closed set
//! the engine matches on exhaustively. Price levels stay in their raw JSON
//! form until the delta applier parses them, so one bad level never poisons
//! the rest of a batch.

use serde_json::Value;

use super::trade::Trade;
use super::{Nonce, TimestampMs};

/// A raw `[price, size, ...]` level as received on the wire
pub type RawLevel = Vec<Value>;

/// A message after exchange-specific parsing
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Full book state
    Snapshot(BookUpdate),
    /// Incremental book update
    Delta(BookUpdate),
    /// Public trade
    Trade(Trade),
    /// Keep-alive, carries no data
    Heartbeat,
    /// Subscribe request acknowledged
    Subscribed {
        /// Request id echoed by the exchange
        request_id: Option<u64>,
        /// Subscription hash, when the exchange echoes the topic instead of an id
        subscription: Option<String>,
    },
    /// Unsubscribe request acknowledged
    Unsubscribed {
        /// Request id echoed by the exchange
        request_id: Option<u64>,
        /// Subscription hash, when the exchange echoes the topic instead of an id
        subscription: Option<String>,
    },
    /// Error frame
    Error {
        /// Request id the error refers to
        request_id: Option<u64>,
        /// Subscription hash the error refers to
        subscription: Option<String>,
        /// Vendor error code
        code: Option<String>,
        /// Error text
        message: String,
    },
}

/// Snapshot or delta for one symbol
///
/// Nonce fields follow the common exchange conventions:
///
/// - `nonce` - sequence of the book state after this update (last update id)
/// - `first_nonce` - first update id covered by this message, for feeds that
///   batch several updates per frame
/// - `prev_nonce` - sequence of the state this update applies on top of, for
///   feeds that link each message to its predecessor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookUpdate {
    /// Unified market symbol
    pub symbol: String,
    /// Bid levels
    pub bids: Vec<RawLevel>,
    /// Ask levels
    pub asks: Vec<RawLevel>,
    /// Sequence after this update
    pub nonce: Option<Nonce>,
    /// First update id in this message
    pub first_nonce: Option<Nonce>,
    /// Sequence this update builds on
    pub prev_nonce: Option<Nonce>,
    /// Exchange timestamp in milliseconds
    pub timestamp: Option<TimestampMs>,
    /// ISO-8601 datetime as sent by the exchange
    pub datetime: Option<String>,
    /// Checksum of the book after this update
    pub checksum: Option<i64>,
}

impl BookUpdate {
    /// Create an empty update for a symbol
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    /// Set bid levels from a JSON array of levels
    #[must_use]
    pub fn with_bids(mut self, bids: Value) -> Self {
        self.bids = raw_levels(&bids);
        self
    }

    /// Set ask levels from a JSON array of levels
    #[must_use]
    pub fn with_asks(mut self, asks: Value) -> Self {
        self.asks = raw_levels(&asks);
        self
    }

    /// Set the sequence after this update
    #[must_use]
    pub fn with_nonce(mut self, nonce: Nonce) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Set the first update id of a batched update
    #[must_use]
    pub fn with_first_nonce(mut self, first: Nonce) -> Self {
        self.first_nonce = Some(first);
        self
    }

    /// Set the predecessor sequence
    #[must_use]
    pub fn with_prev_nonce(mut self, prev: Nonce) -> Self {
        self.prev_nonce = Some(prev);
        self
    }

    /// Set the exchange timestamp
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: TimestampMs) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the exchange checksum
    #[must_use]
    pub fn with_checksum(mut self, checksum: i64) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// First sequence covered by this update
    pub fn first_sequence(&self) -> Option<Nonce> {
        self.first_nonce.or(self.nonce)
    }
}

/// Collect the array elements of `value` as raw levels
///
/// Non-array entries are kept as single-element levels so the applier can
/// report them as malformed.
pub fn raw_levels(value: &Value) -> Vec<RawLevel> {
    match value {
        Value::Array(levels) => levels
            .iter()
            .map(|level| match level {
                Value::Array(fields) => fields.clone(),
                other => vec![other.clone()],
            })
            .collect(),
        _ => Vec::new(),
    }
}
