//! Unified market data types.
//!
//! Every exchange protocol maps its wire payloads onto these types, so the
//! synchronization engine only ever sees one shape.
//!
//! - [`messages`] - Closed set of inbound message variants
//! - [`trade`] - Public trade records

pub mod messages;
pub mod trade;

pub use messages::{BookUpdate, InboundMessage, RawLevel};
pub use trade::{Trade, TradeSide};

use rust_decimal::Decimal;

/// Price of a level
///
/// Using `Decimal` instead of floating point for:
/// - Exact comparisons (one entry per price, no float drift)
/// - Lossless round trip of exchange strings (needed for checksums)
pub type Price = Decimal;

/// Size resting at a price level
pub type Amount = Decimal;

/// Timestamp in milliseconds since Unix epoch
pub type TimestampMs = i64;

/// Sequence number / nonce identifying a book state
pub type Nonce = u64;

/// Render a millisecond timestamp as ISO-8601 (`2024-01-15T12:00:00.000Z`)
pub fn iso8601(timestamp: TimestampMs) -> Option<String> {
    chrono::DateTime::from_timestamp_millis(timestamp)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}

/// Parse an ISO-8601 datetime into milliseconds
pub fn parse8601(datetime: &str) -> Option<TimestampMs> {
    chrono::DateTime::parse_from_rfc3339(datetime)
        .ok()
        .map(|dt| dt.timestamp_millis())
}
