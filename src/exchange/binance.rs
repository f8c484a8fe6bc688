//! Binance spot market streams.
//!
//! The depth stream carries deltas only. A snapshot is fetched from
//! `GET /api/v3/depth` once the subscription is acknowledged; each delta
//! covers update ids `U..=u`, so the book follows
//! [`SequencePolicy::Ranged`].

use serde::Deserialize;
use serde_json::{json, Value};

use crate::orderbook::{SequencePolicy, SyncProfile};
use crate::types::{iso8601, BookUpdate, InboundMessage, RawLevel, Trade, TradeSide};
use crate::Result;

use super::{split_symbol, MarketIds, Protocol, SnapshotRequest};

/// Default snapshot depth requested over REST
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 1000;

/// Raw frame from the market data stream
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Frame {
    /// `{"error": {"code": 2, "msg": "..."}, "id": 1}`
    Error { id: Option<u64>, error: ErrorBody },
    /// `{"result": null, "id": 1}`
    Response { id: u64, result: Value },
    Event(Event),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum Event {
    #[serde(rename = "depthUpdate")]
    Depth(DepthUpdate),
    #[serde(rename = "trade")]
    Trade(TradeEvent),
    #[serde(other)]
    Other,
}

/// Diff depth event
#[derive(Debug, Deserialize)]
struct DepthUpdate {
    /// Event time
    #[serde(rename = "E")]
    event_time: Option<i64>,
    #[serde(rename = "s")]
    market_id: String,
    /// First update id in event
    #[serde(rename = "U")]
    first_update_id: u64,
    /// Final update id in event
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "b", default)]
    bids: Vec<RawLevel>,
    #[serde(rename = "a", default)]
    asks: Vec<RawLevel>,
}

#[derive(Debug, Deserialize)]
struct TradeEvent {
    #[serde(rename = "s")]
    market_id: String,
    #[serde(rename = "t")]
    trade_id: u64,
    #[serde(rename = "p")]
    price: rust_decimal::Decimal,
    #[serde(rename = "q")]
    quantity: rust_decimal::Decimal,
    #[serde(rename = "T")]
    trade_time: i64,
    /// Buyer is the maker, so the taker sold
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

/// `GET /api/v3/depth` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepthSnapshot {
    last_update_id: u64,
    bids: Vec<RawLevel>,
    asks: Vec<RawLevel>,
}

/// Binance spot protocol
#[derive(Debug)]
pub struct Binance {
    ws_url: String,
    rest_url: String,
    markets: MarketIds,
    /// Update speed suffix for depth streams
    update_speed: &'static str,
}

impl Binance {
    /// Production endpoints
    pub fn new() -> Self {
        Self::with_urls(
            "wss://stream.binance.com:9443/ws",
            "https://api.binance.com/api/v3",
        )
    }

    /// Custom endpoints (testnet, proxies)
    pub fn with_urls(ws_url: impl Into<String>, rest_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            rest_url: rest_url.into(),
            markets: MarketIds::new(),
            update_speed: "100ms",
        }
    }

    /// Exchange market id (`BTCUSDT`), registered for reverse lookup
    fn market_id(&self, symbol: &str) -> Result<String> {
        let (base, quote) = split_symbol(symbol)?;
        let id = format!("{base}{quote}").to_uppercase();
        self.markets.insert(id.clone(), symbol);
        Ok(id)
    }

    fn stream_name(&self, symbol: &str, channel: &str) -> Result<String> {
        Ok(format!("{}@{channel}", self.market_id(symbol)?.to_lowercase()))
    }

    fn depth_update(&self, update: DepthUpdate) -> InboundMessage {
        let symbol = self.markets.symbol_or_id(&update.market_id);
        InboundMessage::Delta(BookUpdate {
            symbol,
            bids: update.bids,
            asks: update.asks,
            nonce: Some(update.final_update_id),
            first_nonce: Some(update.first_update_id),
            timestamp: update.event_time,
            datetime: update.event_time.and_then(iso8601),
            ..BookUpdate::default()
        })
    }

    fn trade(&self, trade: TradeEvent) -> InboundMessage {
        let side = if trade.buyer_is_maker {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        };
        InboundMessage::Trade(Trade {
            id: Some(trade.trade_id.to_string()),
            symbol: self.markets.symbol_or_id(&trade.market_id),
            price: trade.price,
            amount: trade.quantity,
            side: Some(side),
            timestamp: Some(trade.trade_time),
            datetime: iso8601(trade.trade_time),
        })
    }
}

impl Default for Binance {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for Binance {
    fn id(&self) -> &'static str {
        "binance"
    }

    fn ws_url(&self) -> &str {
        &self.ws_url
    }

    fn sync_profile(&self) -> SyncProfile {
        SyncProfile::fetch(SequencePolicy::Ranged)
    }

    fn order_book_hash(&self, symbol: &str) -> String {
        self.stream_name(symbol, "depth")
            .unwrap_or_else(|_| format!("{symbol}@depth"))
    }

    fn trades_hash(&self, symbol: &str) -> String {
        self.stream_name(symbol, "trade")
            .unwrap_or_else(|_| format!("{symbol}@trade"))
    }

    fn subscribe_order_book(
        &self,
        symbol: &str,
        _limit: Option<usize>,
        request_id: u64,
    ) -> Result<Value> {
        let stream = format!("{}@{}", self.stream_name(symbol, "depth")?, self.update_speed);
        Ok(json!({
            "method": "SUBSCRIBE",
            "params": [stream],
            "id": request_id,
        }))
    }

    fn unsubscribe_order_book(&self, symbol: &str, request_id: u64) -> Result<Value> {
        let stream = format!("{}@{}", self.stream_name(symbol, "depth")?, self.update_speed);
        Ok(json!({
            "method": "UNSUBSCRIBE",
            "params": [stream],
            "id": request_id,
        }))
    }

    fn subscribe_trades(&self, symbol: &str, request_id: u64) -> Result<Value> {
        Ok(json!({
            "method": "SUBSCRIBE",
            "params": [self.stream_name(symbol, "trade")?],
            "id": request_id,
        }))
    }

    fn parse_message(&self, raw: &str) -> Result<Vec<InboundMessage>> {
        let message = match serde_json::from_str::<Frame>(raw)? {
            Frame::Error { id, error } => InboundMessage::Error {
                request_id: id,
                subscription: None,
                code: Some(error.code.to_string()),
                message: error.msg,
            },
            Frame::Response { id, .. } => InboundMessage::Subscribed {
                request_id: Some(id),
                subscription: None,
            },
            Frame::Event(Event::Depth(update)) => self.depth_update(update),
            Frame::Event(Event::Trade(trade)) => self.trade(trade),
            Frame::Event(Event::Other) => return Ok(Vec::new()),
        };
        Ok(vec![message])
    }

    fn snapshot_request(&self, symbol: &str, limit: Option<usize>) -> Option<SnapshotRequest> {
        let id = self.market_id(symbol).ok()?;
        let limit = limit.unwrap_or(DEFAULT_SNAPSHOT_LIMIT).min(5000);
        Some(SnapshotRequest {
            url: format!("{}/depth", self.rest_url),
            query: vec![
                ("symbol".to_string(), id),
                ("limit".to_string(), limit.to_string()),
            ],
        })
    }

    fn parse_snapshot(&self, symbol: &str, body: &Value) -> Result<BookUpdate> {
        let snapshot = DepthSnapshot::deserialize(body)?;
        Ok(BookUpdate {
            symbol: symbol.to_string(),
            bids: snapshot.bids,
            asks: snapshot.asks,
            nonce: Some(snapshot.last_update_id),
            ..BookUpdate::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn protocol() -> Binance {
        let binance = Binance::new();
        binance.subscribe_order_book("BNB/BTC", None, 1).unwrap();
        binance
    }

    #[test]
    fn test_subscribe_request() {
        let binance = Binance::new();
        let request = binance.subscribe_order_book("BTC/USDT", None, 7).unwrap();
        assert_eq!(
            request,
            json!({"method": "SUBSCRIBE", "params": ["btcusdt@depth@100ms"], "id": 7})
        );
        assert_eq!(binance.order_book_hash("BTC/USDT"), "btcusdt@depth");
        assert!(binance.subscribe_order_book("BTCUSDT", None, 8).is_err());
    }

    #[test]
    fn test_parse_depth_update() {
        let raw = r#"{
            "e": "depthUpdate", "E": 1577554482280, "s": "BNBBTC",
            "U": 157, "u": 160,
            "b": [["0.0024", "10"]],
            "a": [["0.0026", "100"]]
        }"#;
        let messages = protocol().parse_message(raw).unwrap();

        let InboundMessage::Delta(update) = &messages[0] else {
            panic!("expected delta, got {:?}", messages);
        };
        assert_eq!(update.symbol, "BNB/BTC");
        assert_eq!(update.first_nonce, Some(157));
        assert_eq!(update.nonce, Some(160));
        assert_eq!(update.bids.len(), 1);
        assert_eq!(update.datetime.as_deref(), Some("2019-12-28T17:34:42.280Z"));
    }

    #[test]
    fn test_parse_ack_and_error() {
        let binance = protocol();
        assert_eq!(
            binance.parse_message(r#"{"result": null, "id": 3}"#).unwrap(),
            vec![InboundMessage::Subscribed {
                request_id: Some(3),
                subscription: None
            }]
        );

        let messages = binance
            .parse_message(r#"{"error": {"code": 2, "msg": "Invalid request"}, "id": 4}"#)
            .unwrap();
        assert!(matches!(
            &messages[0],
            InboundMessage::Error { request_id: Some(4), code: Some(code), .. } if code == "2"
        ));
    }

    #[test]
    fn test_parse_trade() {
        let raw = r#"{"e": "trade", "E": 1, "s": "BNBBTC", "t": 12345,
            "p": "0.001", "q": "100", "T": 1672515782136, "m": true}"#;
        let messages = protocol().parse_message(raw).unwrap();
        let InboundMessage::Trade(trade) = &messages[0] else {
            panic!("expected trade");
        };
        assert_eq!(trade.price, dec!(0.001));
        assert_eq!(trade.side, Some(TradeSide::Sell));
        assert_eq!(trade.id.as_deref(), Some("12345"));
    }

    #[test]
    fn test_unknown_event_ignored() {
        let raw = r#"{"e": "kline", "s": "BNBBTC"}"#;
        assert!(protocol().parse_message(raw).unwrap().is_empty());
        assert!(protocol().parse_message("not json").is_err());
    }

    #[test]
    fn test_snapshot() {
        let binance = Binance::new();
        let request = binance.snapshot_request("BTC/USDT", None).unwrap();
        assert_eq!(request.url, "https://api.binance.com/api/v3/depth");
        assert_eq!(request.query[0], ("symbol".to_string(), "BTCUSDT".to_string()));
        assert_eq!(request.query[1], ("limit".to_string(), "1000".to_string()));

        let body = json!({
            "lastUpdateId": 1027024,
            "bids": [["4.00000000", "431.00000000"]],
            "asks": [["4.00000200", "12.00000000"]]
        });
        let snapshot = binance.parse_snapshot("BTC/USDT", &body).unwrap();
        assert_eq!(snapshot.nonce, Some(1_027_024));
        assert_eq!(snapshot.asks.len(), 1);
    }
}
