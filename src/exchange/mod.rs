//! Exchange protocols.
//!
//! A [`Protocol`] is everything exchange-specific the engine needs: how to
//! name subscriptions, how to build subscribe requests, how to map raw
//! frames onto [`InboundMessage`], and which synchronization rules its order
//! book feed follows. The engine itself never looks at vendor field names.
//!
//! Built-in protocols:
//!
//! - [`binance`] - deltas on the stream, snapshot over REST, ranged ids
//! - [`okx`] - snapshot on the stream, linked ids, signed CRC32
//! - [`kraken`] - snapshot on the stream, no ids, unsigned CRC32 (off by default)

pub mod binance;
pub mod kraken;
pub mod okx;

pub use binance::Binance;
pub use kraken::Kraken;
pub use okx::Okx;

use std::fmt;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::error::Error;
use crate::orderbook::SyncProfile;
use crate::types::{BookUpdate, InboundMessage};
use crate::Result;

/// REST request for an order book snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// Endpoint URL
    pub url: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
}

/// Exchange-specific message layer
pub trait Protocol: fmt::Debug + Send + Sync {
    /// Short exchange id (`"binance"`)
    fn id(&self) -> &'static str;

    /// Public market data endpoint
    fn ws_url(&self) -> &str;

    /// Snapshot source, gap rule, and checksum format of the book feed
    fn sync_profile(&self) -> SyncProfile;

    /// Whether checksums are verified unless configured otherwise
    fn checksum_by_default(&self) -> bool {
        true
    }

    /// Levels per side the exchange maintains, if bounded
    fn default_depth(&self) -> Option<usize> {
        None
    }

    /// Hash order book updates for `symbol` are delivered under
    fn order_book_hash(&self, symbol: &str) -> String;

    /// Hash trades for `symbol` are delivered under
    fn trades_hash(&self, symbol: &str) -> String;

    /// Build the order book subscribe request
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if `limit` is not a depth the
    /// exchange offers, or [`Error::InvalidSymbol`] for unusable symbols.
    fn subscribe_order_book(
        &self,
        symbol: &str,
        limit: Option<usize>,
        request_id: u64,
    ) -> Result<Value>;

    /// Build the order book unsubscribe request
    fn unsubscribe_order_book(&self, symbol: &str, request_id: u64) -> Result<Value>;

    /// Build the trades subscribe request
    fn subscribe_trades(&self, symbol: &str, request_id: u64) -> Result<Value>;

    /// Map one raw text frame onto inbound messages
    ///
    /// Frames the engine has no use for map to an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON or a known frame is
    /// missing required fields.
    fn parse_message(&self, raw: &str) -> Result<Vec<InboundMessage>>;

    /// REST request for a snapshot, for feeds that fetch snapshots
    fn snapshot_request(&self, _symbol: &str, _limit: Option<usize>) -> Option<SnapshotRequest> {
        None
    }

    /// Map a REST snapshot body onto a [`BookUpdate`]
    fn parse_snapshot(&self, symbol: &str, _body: &Value) -> Result<BookUpdate> {
        Err(Error::NotSupported(format!(
            "{} does not serve order book snapshots over REST ({symbol})",
            self.id()
        )))
    }

    /// Application-level keep-alive frame, if the exchange wants one
    fn ping_message(&self) -> Option<String> {
        None
    }
}

/// Map between exchange market ids and unified symbols
///
/// Filled as symbols are subscribed, so ids that cannot be split back into
/// base and quote (`BTCUSDT`) still resolve.
#[derive(Debug, Default)]
pub struct MarketIds {
    by_id: RwLock<FxHashMap<String, String>>,
}

impl MarketIds {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `id` means `symbol`
    pub fn insert(&self, id: impl Into<String>, symbol: impl Into<String>) {
        self.by_id.write().insert(id.into(), symbol.into());
    }

    /// Unified symbol for `id`, if known
    pub fn symbol(&self, id: &str) -> Option<String> {
        self.by_id.read().get(id).cloned()
    }

    /// Unified symbol for `id`, falling back to the id itself
    pub fn symbol_or_id(&self, id: &str) -> String {
        self.symbol(id).unwrap_or_else(|| id.to_string())
    }
}

/// Split a unified `BASE/QUOTE` symbol
pub(crate) fn split_symbol(symbol: &str) -> Result<(&str, &str)> {
    match symbol.split_once('/') {
        Some((base, quote)) if !base.is_empty() && !quote.is_empty() => Ok((base, quote)),
        _ => Err(Error::InvalidSymbol(symbol.to_string())),
    }
}

/// Deserialize an integer sent either as a JSON number or a string
pub(crate) fn int_or_string<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("not an integer: {n}"))),
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("not an integer: {s}"))),
        Some(other) => Err(de::Error::custom(format!("not an integer: {other}"))),
    }
}
