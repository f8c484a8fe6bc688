//! OKX public channels.
//!
//! The `books` channel opens with a full snapshot and continues with
//! updates. Every update names the sequence it builds on (`prevSeqId`) and
//! carries a CRC32 over the top 25 levels, interleaved bid/ask and compared
//! as a signed integer.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::orderbook::{ChecksumFormat, SequencePolicy, SyncProfile};
use crate::types::{iso8601, BookUpdate, InboundMessage, RawLevel, Trade, TradeSide};
use crate::Result;

use super::{int_or_string, split_symbol, Protocol};

/// Levels per side covered by the checksum
pub const CHECKSUM_DEPTH: usize = 25;

const BOOK_CHANNEL: &str = "books";
const TRADES_CHANNEL: &str = "trades";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Frame {
    Event(EventFrame),
    Push(PushFrame),
}

/// `{"event": "subscribe", "arg": {...}}` and `{"event": "error", ...}`
#[derive(Debug, Deserialize)]
struct EventFrame {
    event: String,
    arg: Option<ChannelArg>,
    code: Option<String>,
    msg: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushFrame {
    arg: ChannelArg,
    action: Option<String>,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelArg {
    channel: String,
    inst_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookData {
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
    #[serde(default, deserialize_with = "int_or_string")]
    ts: Option<i64>,
    checksum: Option<i64>,
    seq_id: Option<i64>,
    prev_seq_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeData {
    inst_id: String,
    trade_id: Option<String>,
    px: rust_decimal::Decimal,
    sz: rust_decimal::Decimal,
    side: Option<TradeSide>,
    #[serde(default, deserialize_with = "int_or_string")]
    ts: Option<i64>,
}

/// OKX protocol
#[derive(Debug)]
pub struct Okx {
    ws_url: String,
}

impl Okx {
    /// Production public endpoint
    pub fn new() -> Self {
        Self::with_url("wss://ws.okx.com:8443/ws/v5/public")
    }

    /// Custom endpoint (demo trading, proxies)
    pub fn with_url(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    fn inst_id(symbol: &str) -> Result<String> {
        let (base, quote) = split_symbol(symbol)?;
        Ok(format!("{base}-{quote}"))
    }

    fn symbol(inst_id: &str) -> String {
        inst_id.replacen('-', "/", 1)
    }

    fn hash(channel: &str, symbol: &str) -> String {
        format!("{channel}:{symbol}")
    }

    fn request(op: &str, channel: &str, symbol: &str) -> Result<Value> {
        Ok(json!({
            "op": op,
            "args": [{"channel": channel, "instId": Self::inst_id(symbol)?}],
        }))
    }

    /// Subscription hash an event frame refers to
    fn subscription(arg: Option<&ChannelArg>) -> Option<String> {
        let arg = arg?;
        let symbol = Self::symbol(arg.inst_id.as_deref()?);
        Some(Self::hash(&arg.channel, &symbol))
    }

    fn event(&self, frame: EventFrame) -> Vec<InboundMessage> {
        let subscription = Self::subscription(frame.arg.as_ref());
        let request_id = frame.id.as_deref().and_then(|id| id.parse().ok());
        let message = match frame.event.as_str() {
            "subscribe" => InboundMessage::Subscribed {
                request_id,
                subscription,
            },
            "unsubscribe" => InboundMessage::Unsubscribed {
                request_id,
                subscription,
            },
            "error" => InboundMessage::Error {
                request_id,
                subscription,
                code: frame.code,
                message: frame.msg.unwrap_or_default(),
            },
            _ => return Vec::new(),
        };
        vec![message]
    }

    fn push(&self, frame: PushFrame) -> Result<Vec<InboundMessage>> {
        let symbol = match frame.arg.inst_id.as_deref() {
            Some(inst_id) => Self::symbol(inst_id),
            None => return Ok(Vec::new()),
        };

        match frame.arg.channel.as_str() {
            BOOK_CHANNEL => {
                let snapshot = frame.action.as_deref() == Some("snapshot");
                frame
                    .data
                    .into_iter()
                    .map(|data| -> Result<InboundMessage> {
                        let update = Self::book_update(&symbol, BookData::deserialize(data)?);
                        Ok(if snapshot {
                            InboundMessage::Snapshot(update)
                        } else {
                            InboundMessage::Delta(update)
                        })
                    })
                    .collect()
            }
            TRADES_CHANNEL => frame
                .data
                .into_iter()
                .map(|data| -> Result<InboundMessage> {
                    let trade = TradeData::deserialize(data)?;
                    Ok(InboundMessage::Trade(Trade {
                        id: trade.trade_id,
                        symbol: Self::symbol(&trade.inst_id),
                        price: trade.px,
                        amount: trade.sz,
                        side: trade.side,
                        timestamp: trade.ts,
                        datetime: trade.ts.and_then(iso8601),
                    }))
                })
                .collect(),
            _ => Ok(Vec::new()),
        }
    }

    fn book_update(symbol: &str, data: BookData) -> BookUpdate {
        // a negative prevSeqId marks the first message of a sequence
        let prev_nonce = data
            .prev_seq_id
            .filter(|prev| *prev >= 0)
            .map(|prev| prev as u64);
        BookUpdate {
            symbol: symbol.to_string(),
            bids: data.bids,
            asks: data.asks,
            nonce: data.seq_id.filter(|seq| *seq >= 0).map(|seq| seq as u64),
            first_nonce: None,
            prev_nonce,
            timestamp: data.ts,
            datetime: data.ts.and_then(iso8601),
            checksum: data.checksum,
        }
    }
}

impl Default for Okx {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for Okx {
    fn id(&self) -> &'static str {
        "okx"
    }

    fn ws_url(&self) -> &str {
        &self.ws_url
    }

    fn sync_profile(&self) -> SyncProfile {
        SyncProfile::stream()
            .with_sequence(SequencePolicy::Linked)
            .with_checksum(Some(ChecksumFormat::interleaved(CHECKSUM_DEPTH)))
    }

    fn order_book_hash(&self, symbol: &str) -> String {
        Self::hash(BOOK_CHANNEL, symbol)
    }

    fn trades_hash(&self, symbol: &str) -> String {
        Self::hash(TRADES_CHANNEL, symbol)
    }

    fn subscribe_order_book(
        &self,
        symbol: &str,
        _limit: Option<usize>,
        _request_id: u64,
    ) -> Result<Value> {
        Self::request("subscribe", BOOK_CHANNEL, symbol)
    }

    fn unsubscribe_order_book(&self, symbol: &str, _request_id: u64) -> Result<Value> {
        Self::request("unsubscribe", BOOK_CHANNEL, symbol)
    }

    fn subscribe_trades(&self, symbol: &str, _request_id: u64) -> Result<Value> {
        Self::request("subscribe", TRADES_CHANNEL, symbol)
    }

    fn parse_message(&self, raw: &str) -> Result<Vec<InboundMessage>> {
        if raw == "pong" {
            return Ok(vec![InboundMessage::Heartbeat]);
        }
        match serde_json::from_str::<Frame>(raw)? {
            Frame::Event(frame) => Ok(self.event(frame)),
            Frame::Push(frame) => self.push(frame),
        }
    }

    fn ping_message(&self) -> Option<String> {
        Some("ping".to_string())
    }
}
