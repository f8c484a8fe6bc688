//! Kraken WebSocket v2 public channels.
//!
//! The `book` channel starts with a snapshot of the requested depth and
//! continues with updates. There are no sequence numbers; integrity is
//! checked with an unsigned CRC32 over the top 10 asks then bids, each
//! rendered as digits only. The exchange checksum has been unreliable at
//! times, so verification is off unless enabled in
//! [`Config`](crate::Config).

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Error;
use crate::orderbook::{ChecksumFormat, SyncProfile};
use crate::types::{parse8601, BookUpdate, InboundMessage, RawLevel, Trade, TradeSide};
use crate::Result;

use super::{split_symbol, Protocol};

/// Book depths the exchange accepts
pub const VALID_DEPTHS: [usize; 5] = [10, 25, 100, 500, 1000];

/// Levels per side covered by the checksum
pub const CHECKSUM_DEPTH: usize = 10;

/// Any v2 frame; which fields are set depends on the frame kind
#[derive(Debug, Deserialize)]
struct Frame {
    channel: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Vec<Value>,
    method: Option<String>,
    req_id: Option<u64>,
    success: Option<bool>,
    error: Option<String>,
    result: Option<AckResult>,
}

#[derive(Debug, Deserialize)]
struct AckResult {
    channel: Option<String>,
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookData {
    symbol: String,
    #[serde(default)]
    bids: Vec<Level>,
    #[serde(default)]
    asks: Vec<Level>,
    checksum: Option<i64>,
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Level {
    price: Value,
    qty: Value,
}

impl From<Level> for RawLevel {
    fn from(level: Level) -> Self {
        vec![level.price, level.qty]
    }
}

#[derive(Debug, Deserialize)]
struct TradeData {
    symbol: String,
    side: Option<TradeSide>,
    price: rust_decimal::Decimal,
    qty: rust_decimal::Decimal,
    trade_id: Option<u64>,
    timestamp: Option<String>,
}

/// Kraken v2 protocol
#[derive(Debug)]
pub struct Kraken {
    ws_url: String,
}

impl Kraken {
    /// Production public endpoint
    pub fn new() -> Self {
        Self::with_url("wss://ws.kraken.com/v2")
    }

    /// Custom endpoint
    pub fn with_url(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    fn hash(name: &str, symbol: &str) -> String {
        format!("{name}@{symbol}")
    }

    /// Message hash for a wire channel name
    fn channel_hash(channel: &str, symbol: &str) -> String {
        match channel {
            "book" => Self::hash("orderbook", symbol),
            other => Self::hash(other, symbol),
        }
    }

    fn request(method: &str, params: Value, request_id: u64) -> Value {
        json!({
            "method": method,
            "params": params,
            "req_id": request_id,
        })
    }

    fn reply(frame: Frame) -> Vec<InboundMessage> {
        let subscription = frame.result.as_ref().and_then(|result| {
            let channel = result.channel.as_deref()?;
            let symbol = result.symbol.as_deref()?;
            Some(Self::channel_hash(channel, symbol))
        });

        if let Some(message) = frame.error {
            return vec![InboundMessage::Error {
                request_id: frame.req_id,
                subscription,
                code: None,
                message,
            }];
        }

        let message = match (frame.method.as_deref(), frame.success) {
            (Some("pong"), _) => InboundMessage::Heartbeat,
            (Some("subscribe"), Some(true)) => InboundMessage::Subscribed {
                request_id: frame.req_id,
                subscription,
            },
            (Some("unsubscribe"), Some(true)) => InboundMessage::Unsubscribed {
                request_id: frame.req_id,
                subscription,
            },
            _ => return Vec::new(),
        };
        vec![message]
    }

    fn book(kind: Option<&str>, data: Vec<Value>) -> Result<Vec<InboundMessage>> {
        let snapshot = kind == Some("snapshot");
        data.into_iter()
            .map(|data| -> Result<InboundMessage> {
                let data = BookData::deserialize(data)?;
                let update = BookUpdate {
                    symbol: data.symbol,
                    bids: data.bids.into_iter().map(RawLevel::from).collect(),
                    asks: data.asks.into_iter().map(RawLevel::from).collect(),
                    timestamp: data.timestamp.as_deref().and_then(parse8601),
                    datetime: data.timestamp,
                    checksum: data.checksum,
                    ..BookUpdate::default()
                };
                Ok(if snapshot {
                    InboundMessage::Snapshot(update)
                } else {
                    InboundMessage::Delta(update)
                })
            })
            .collect()
    }

    fn trades(data: Vec<Value>) -> Result<Vec<InboundMessage>> {
        data.into_iter()
            .map(|data| -> Result<InboundMessage> {
                let trade = TradeData::deserialize(data)?;
                Ok(InboundMessage::Trade(Trade {
                    id: trade.trade_id.map(|id| id.to_string()),
                    symbol: trade.symbol,
                    price: trade.price,
                    amount: trade.qty,
                    side: trade.side,
                    timestamp: trade.timestamp.as_deref().and_then(parse8601),
                    datetime: trade.timestamp,
                }))
            })
            .collect()
    }
}

impl Default for Kraken {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for Kraken {
    fn id(&self) -> &'static str {
        "kraken"
    }

    fn ws_url(&self) -> &str {
        &self.ws_url
    }

    fn sync_profile(&self) -> SyncProfile {
        SyncProfile::stream().with_checksum(Some(ChecksumFormat::concatenated(CHECKSUM_DEPTH)))
    }

    fn checksum_by_default(&self) -> bool {
        false
    }

    fn default_depth(&self) -> Option<usize> {
        Some(VALID_DEPTHS[0])
    }

    fn order_book_hash(&self, symbol: &str) -> String {
        Self::hash("orderbook", symbol)
    }

    fn trades_hash(&self, symbol: &str) -> String {
        Self::hash("trade", symbol)
    }

    fn subscribe_order_book(
        &self,
        symbol: &str,
        limit: Option<usize>,
        request_id: u64,
    ) -> Result<Value> {
        split_symbol(symbol)?;
        let mut params = json!({"channel": "book", "symbol": [symbol]});
        if let Some(limit) = limit {
            if !VALID_DEPTHS.contains(&limit) {
                return Err(Error::NotSupported(format!(
                    "kraken order book depth {limit}, expected one of {:?}",
                    VALID_DEPTHS
                )));
            }
            params["depth"] = json!(limit);
        }
        Ok(Self::request("subscribe", params, request_id))
    }

    fn unsubscribe_order_book(&self, symbol: &str, request_id: u64) -> Result<Value> {
        split_symbol(symbol)?;
        Ok(Self::request(
            "unsubscribe",
            json!({"channel": "book", "symbol": [symbol]}),
            request_id,
        ))
    }

    fn subscribe_trades(&self, symbol: &str, request_id: u64) -> Result<Value> {
        split_symbol(symbol)?;
        Ok(Self::request(
            "subscribe",
            json!({"channel": "trade", "symbol": [symbol]}),
            request_id,
        ))
    }

    fn parse_message(&self, raw: &str) -> Result<Vec<InboundMessage>> {
        let frame: Frame = serde_json::from_str(raw)?;
        match frame.channel.as_deref() {
            Some("book") => Self::book(frame.kind.as_deref(), frame.data),
            Some("trade") => Self::trades(frame.data),
            Some("heartbeat") => Ok(vec![InboundMessage::Heartbeat]),
            Some(_) => Ok(Vec::new()),
            None => Ok(Self::reply(frame)),
        }
    }

    fn ping_message(&self) -> Option<String> {
        Some(json!({"method": "ping"}).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::OrderBook;

    #[test]
    fn test_subscribe_depth() {
        let kraken = Kraken::new();
        let request = kraken.subscribe_order_book("MATIC/USD", Some(25), 3).unwrap();
        assert_eq!(
            request,
            json!({
                "method": "subscribe",
                "params": {"channel": "book", "symbol": ["MATIC/USD"], "depth": 25},
                "req_id": 3
            })
        );
        assert!(matches!(
            kraken.subscribe_order_book("MATIC/USD", Some(7), 4),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn test_snapshot_checksum() {
        let raw = r#"{
            "channel": "book",
            "type": "snapshot",
            "data": [{
                "symbol": "MATIC/USD",
                "bids": [{"price": 0.5666, "qty": 4831.75496356}],
                "asks": [{"price": 0.5668, "qty": 4410.79769741}],
                "checksum": 2652227746
            }]
        }"#;
        let messages = Kraken::new().parse_message(raw).unwrap();
        let InboundMessage::Snapshot(update) = &messages[0] else {
            panic!("expected snapshot, got {:?}", messages);
        };

        let mut book = OrderBook::new("MATIC/USD");
        book.reset(update);
        let format = ChecksumFormat::concatenated(CHECKSUM_DEPTH);
        assert_eq!(update.checksum, Some(format.compute(&book)));
    }

    #[test]
    fn test_update_timestamp() {
        let raw = r#"{
            "channel": "book",
            "type": "update",
            "data": [{
                "symbol": "MATIC/USD",
                "bids": [{"price": 0.5657, "qty": 1098.3947558}],
                "asks": [],
                "checksum": 2114181697,
                "timestamp": "2023-10-06T17:35:55.440295Z"
            }]
        }"#;
        let messages = Kraken::new().parse_message(raw).unwrap();
        let InboundMessage::Delta(update) = &messages[0] else {
            panic!("expected delta");
        };
        assert_eq!(update.timestamp, Some(1_696_613_755_440));
        assert_eq!(update.nonce, None);
    }

    #[test]
    fn test_replies() {
        let kraken = Kraken::new();
        let ack = r#"{"method": "subscribe", "req_id": 1, "success": true,
            "result": {"channel": "book", "depth": 10, "snapshot": true, "symbol": "BTC/USD"},
            "time_in": "2023-09-25T09:04:31.742599Z", "time_out": "2023-09-25T09:04:31.742648Z"}"#;
        assert_eq!(
            kraken.parse_message(ack).unwrap(),
            vec![InboundMessage::Subscribed {
                request_id: Some(1),
                subscription: Some("orderbook@BTC/USD".to_string())
            }]
        );

        let error = r#"{"error": "Currency pair not supported", "method": "subscribe",
            "req_id": 2, "success": false}"#;
        assert!(matches!(
            &kraken.parse_message(error).unwrap()[0],
            InboundMessage::Error { request_id: Some(2), .. }
        ));

        assert_eq!(
            kraken.parse_message(r#"{"channel": "heartbeat"}"#).unwrap(),
            vec![InboundMessage::Heartbeat]
        );
        assert!(kraken
            .parse_message(r#"{"channel": "status", "data": []}"#)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_trades() {
        let raw = r#"{"channel": "trade", "type": "update", "data": [{
            "symbol": "MATIC/USD", "side": "sell", "price": 0.5117, "qty": 40.0,
            "ord_type": "market", "trade_id": 4665906, "timestamp": "2023-09-25T07:49:37.708706Z"}]}"#;
        let messages = Kraken::new().parse_message(raw).unwrap();
        let InboundMessage::Trade(trade) = &messages[0] else {
            panic!("expected trade");
        };
        assert_eq!(trade.side, Some(TradeSide::Sell));
        assert_eq!(trade.id.as_deref(), Some("4665906"));
    }
}
