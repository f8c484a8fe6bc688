//! Offline scenarios for the stream client.
//!
//! Frames are fed straight into `handle_message` and outgoing requests are
//! read from the outbound queue, so no network is involved. Snapshots for
//! fetch-based feeds come from a scripted fetcher that can be held back to
//! observe the client while a snapshot is outstanding.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio_test::task::{spawn, Spawn};
use tokio_test::{assert_pending, assert_ready};

use ws_orderbook::client::{SnapshotFetcher, StreamClient};
use ws_orderbook::error::ApiError;
use ws_orderbook::exchange::{Binance, Kraken, Okx};
use ws_orderbook::orderbook::SyncState;
use ws_orderbook::types::BookUpdate;
use ws_orderbook::{Config, DisconnectPolicy, Error, Result};

/// Fetcher handing out queued snapshots, optionally one per `release`
struct ScriptedFetcher {
    snapshots: Mutex<VecDeque<Result<BookUpdate>>>,
    gate: Option<Notify>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn new(snapshots: Vec<Result<BookUpdate>>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots.into()),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn gated(snapshots: Vec<Result<BookUpdate>>) -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::new(snapshots)
        }
    }

    fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotFetcher for ScriptedFetcher {
    async fn fetch_order_book_snapshot(
        &self,
        symbol: &str,
        _limit: Option<usize>,
    ) -> Result<BookUpdate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.snapshots
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Error::NotSupported(format!("no snapshot for {symbol}"))))
    }
}

fn binance(fetcher: &Arc<ScriptedFetcher>) -> StreamClient {
    binance_with(fetcher, Config::default())
}

fn binance_with(fetcher: &Arc<ScriptedFetcher>, config: Config) -> StreamClient {
    let fetcher: Arc<dyn SnapshotFetcher> = fetcher.clone();
    StreamClient::with_fetcher(Arc::new(Binance::new()), config, fetcher)
}

fn okx_trade(id: &str, price: &str) -> String {
    json!({
        "arg": {"channel": "trades", "instId": "BTC-USDT"},
        "data": [{"instId": "BTC-USDT", "tradeId": id, "px": price, "sz": "1",
                  "side": "buy", "ts": "1"}]
    })
    .to_string()
}

fn okx(config: Config) -> StreamClient {
    StreamClient::new(Arc::new(Okx::new()), config).unwrap()
}

fn kraken() -> StreamClient {
    StreamClient::new(Arc::new(Kraken::new()), Config::default()).unwrap()
}

fn binance_depth(first: u64, last: u64, bids: Value, asks: Value) -> String {
    json!({
        "e": "depthUpdate", "E": 1_700_000_000_000_i64, "s": "BTCUSDT",
        "U": first, "u": last, "b": bids, "a": asks
    })
    .to_string()
}

fn binance_snapshot(nonce: u64) -> BookUpdate {
    BookUpdate::new("BTC/USDT")
        .with_bids(json!([["100", "1"]]))
        .with_asks(json!([["101", "2"]]))
        .with_nonce(nonce)
}

fn okx_books(action: &str, inst_id: &str, data: Value) -> String {
    json!({
        "arg": {"channel": "books", "instId": inst_id},
        "action": action,
        "data": [data]
    })
    .to_string()
}

fn okx_subscribed(inst_id: &str) -> String {
    json!({"event": "subscribe", "arg": {"channel": "books", "instId": inst_id}}).to_string()
}

async fn next_request(outbound: &mut mpsc::UnboundedReceiver<String>) -> Value {
    let text = outbound.recv().await.unwrap();
    serde_json::from_str(&text).unwrap()
}

/// Let spawned snapshot fetches run until `done` holds
async fn yield_until(done: impl Fn() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
}

async fn settle<T: std::future::Future>(task: &Spawn<T>) {
    yield_until(|| task.is_woken()).await;
}

#[tokio::test]
async fn test_snapshot_then_delta_and_duplicate() {
    let client = okx(Config::default());
    let mut outbound = client.take_outbound().unwrap();

    let mut first = spawn(client.watch_order_book("BTC/USDT", None));
    assert_pending!(first.poll());
    let request = next_request(&mut outbound).await;
    assert_eq!(request["op"], "subscribe");

    client.handle_message(&okx_subscribed("BTC-USDT")).unwrap();
    let snapshot = okx_books(
        "snapshot",
        "BTC-USDT",
        json!({"bids": [["100", "1", "0", "1"]], "asks": [["101", "2", "0", "1"]],
               "ts": "1", "seqId": 5, "prevSeqId": -1}),
    );
    client.handle_message(&snapshot).unwrap();
    let book = assert_ready!(first.poll()).unwrap();
    assert_eq!(book.nonce(), Some(5));

    let delta = okx_books(
        "update",
        "BTC-USDT",
        json!({"bids": [["100", "0", "0", "0"]], "asks": [["101", "3", "0", "1"]],
               "ts": "2", "seqId": 6, "prevSeqId": 5}),
    );
    let mut second = spawn(client.watch_order_book("BTC/USDT", None));
    assert_pending!(second.poll());
    client.handle_message(&delta).unwrap();
    let book = assert_ready!(second.poll()).unwrap();
    assert!(book.bids().is_empty());
    assert_eq!(book.asks().get(&dec!(101)), Some(dec!(3)));
    assert_eq!(book.nonce(), Some(6));

    // the same delta again changes nothing and wakes nobody
    let mut third = spawn(client.watch_order_book("BTC/USDT", None));
    assert_pending!(third.poll());
    client.handle_message(&delta).unwrap();
    assert!(!third.is_woken());
    assert_eq!(client.order_book("BTC/USDT").unwrap().nonce(), Some(6));
}

#[tokio::test]
async fn test_fetched_snapshot_replays_buffered_deltas() {
    let fetcher = Arc::new(ScriptedFetcher::gated(vec![Ok(binance_snapshot(10))]));
    let client = binance(&fetcher);
    let mut outbound = client.take_outbound().unwrap();

    let mut watch = spawn(client.watch_order_book("BTC/USDT", None));
    assert_pending!(watch.poll());
    let request = next_request(&mut outbound).await;
    assert_eq!(request["params"][0], "btcusdt@depth@100ms");
    let id = request["id"].as_u64().unwrap();

    client
        .handle_message(&binance_depth(8, 8, json!([["50", "1"]]), json!([])))
        .unwrap();
    client
        .handle_message(&json!({"result": null, "id": id}).to_string())
        .unwrap();
    client
        .handle_message(&binance_depth(11, 11, json!([["100", "5"]]), json!([])))
        .unwrap();
    client
        .handle_message(&binance_depth(12, 12, json!([]), json!([["101", "0"]])))
        .unwrap();

    yield_until(|| fetcher.calls() == 1).await;
    assert_eq!(fetcher.calls(), 1);
    assert_pending!(watch.poll());
    assert_eq!(
        client.books().get_state("BTC/USDT"),
        Some(SyncState::AwaitingSnapshot)
    );
    assert!(client.order_book("BTC/USDT").is_none());

    fetcher.release();
    settle(&watch).await;
    let book = assert_ready!(watch.poll()).unwrap();
    assert_eq!(book.nonce(), Some(12));
    assert_eq!(book.bids().get(&dec!(50)), None);
    assert_eq!(book.bids().get(&dec!(100)), Some(dec!(5)));
    assert!(book.asks().is_empty());
}

#[tokio::test]
async fn test_gap_resyncs_without_resolving() {
    let fetcher = Arc::new(ScriptedFetcher::gated(vec![
        Ok(binance_snapshot(10)),
        Ok(binance_snapshot(20)),
    ]));
    let client = binance(&fetcher);
    let mut outbound = client.take_outbound().unwrap();

    let mut watch = spawn(client.watch_order_book("BTC/USDT", None));
    assert_pending!(watch.poll());
    let id = next_request(&mut outbound).await["id"].as_u64().unwrap();
    client
        .handle_message(&json!({"result": null, "id": id}).to_string())
        .unwrap();
    fetcher.release();
    settle(&watch).await;
    assert_eq!(assert_ready!(watch.poll()).unwrap().nonce(), Some(10));

    let mut waiting = spawn(client.watch_order_book("BTC/USDT", None));
    assert_pending!(waiting.poll());

    // 11..=16 never arrived
    client
        .handle_message(&binance_depth(17, 17, json!([["99", "1"]]), json!([])))
        .unwrap();
    assert_eq!(
        client.books().get_state("BTC/USDT"),
        Some(SyncState::Resyncing)
    );
    client
        .handle_message(&binance_depth(19, 21, json!([["98", "4"]]), json!([])))
        .unwrap();
    yield_until(|| fetcher.calls() == 2).await;
    assert_eq!(fetcher.calls(), 2);
    assert_pending!(waiting.poll());
    assert!(client.order_book("BTC/USDT").is_none());

    fetcher.release();
    settle(&waiting).await;
    let book = assert_ready!(waiting.poll()).unwrap();
    assert_eq!(book.nonce(), Some(21));
    assert_eq!(book.bids().get(&dec!(99)), None);
    assert_eq!(book.bids().get(&dec!(98)), Some(dec!(4)));
}

#[tokio::test]
async fn test_one_snapshot_fetch_per_symbol() {
    let fetcher = Arc::new(ScriptedFetcher::gated(vec![Ok(binance_snapshot(10))]));
    let client = binance_with(&fetcher, Config::default().with_max_buffered_deltas(1));
    let mut outbound = client.take_outbound().unwrap();

    let mut watch = spawn(client.watch_order_book("BTC/USDT", None));
    assert_pending!(watch.poll());
    let id = next_request(&mut outbound).await["id"].as_u64().unwrap();
    client
        .handle_message(&json!({"result": null, "id": id}).to_string())
        .unwrap();
    yield_until(|| fetcher.calls() == 1).await;

    // overflowing the buffer resyncs while the first fetch is outstanding
    client
        .handle_message(&binance_depth(11, 11, json!([["99", "1"]]), json!([])))
        .unwrap();
    client
        .handle_message(&binance_depth(12, 12, json!([["98", "1"]]), json!([])))
        .unwrap();
    assert_eq!(
        client.books().get_state("BTC/USDT"),
        Some(SyncState::Resyncing)
    );
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(fetcher.calls(), 1);

    fetcher.release();
    settle(&watch).await;
    assert_eq!(assert_ready!(watch.poll()).unwrap().nonce(), Some(10));
}

#[tokio::test]
async fn test_older_snapshot_never_rewinds_book() {
    let fetcher = Arc::new(ScriptedFetcher::gated(vec![
        Ok(binance_snapshot(10)),
        Ok(binance_snapshot(20)),
    ]));
    let config = Config::default().with_disconnect_policy(DisconnectPolicy::Resubscribe);
    let client = binance_with(&fetcher, config);
    let mut outbound = client.take_outbound().unwrap();

    let mut watch = spawn(client.watch_order_book("BTC/USDT", None));
    assert_pending!(watch.poll());
    let id = next_request(&mut outbound).await["id"].as_u64().unwrap();
    client
        .handle_message(&json!({"result": null, "id": id}).to_string())
        .unwrap();
    yield_until(|| fetcher.calls() == 1).await;

    // the connection drops while the first snapshot is in flight
    client.on_disconnect();
    client.resubscribe_all().unwrap();
    let id = next_request(&mut outbound).await["id"].as_u64().unwrap();
    client
        .handle_message(&json!({"result": null, "id": id}).to_string())
        .unwrap();
    yield_until(|| fetcher.calls() == 2).await;
    assert_eq!(fetcher.calls(), 2);

    // the superseded fetch completes first and is discarded
    fetcher.release();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_pending!(watch.poll());
    assert!(client.order_book("BTC/USDT").is_none());

    fetcher.release();
    settle(&watch).await;
    assert_eq!(assert_ready!(watch.poll()).unwrap().nonce(), Some(20));
}

#[tokio::test]
async fn test_snapshot_fetch_failure_rejects_watchers() {
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Err(Error::Api(ApiError::new(
        503,
        "maintenance",
    )))]));
    let client = binance(&fetcher);
    let mut outbound = client.take_outbound().unwrap();

    let mut watch = spawn(client.watch_order_book("BTC/USDT", None));
    assert_pending!(watch.poll());
    let id = next_request(&mut outbound).await["id"].as_u64().unwrap();
    client
        .handle_message(&json!({"result": null, "id": id}).to_string())
        .unwrap();

    settle(&watch).await;
    let err = assert_ready!(watch.poll()).unwrap_err();
    assert!(matches!(err.root(), Error::Api(api) if api.status == 503));
    assert!(!client.books().contains("BTC/USDT"));
}

#[tokio::test]
async fn test_checksum_mismatch_resubscribes() {
    let client = okx(Config::default());
    let mut outbound = client.take_outbound().unwrap();

    let mut watch = spawn(client.watch_order_book("BTC/USDT", None));
    assert_pending!(watch.poll());
    next_request(&mut outbound).await;
    client.handle_message(&okx_subscribed("BTC-USDT")).unwrap();
    client
        .handle_message(&okx_books(
            "snapshot",
            "BTC-USDT",
            json!({"bids": [["3366.1", "7", "0", "1"]], "asks": [["3366.8", "9", "0", "1"]],
                   "ts": "1", "checksum": -2_058_547_290_i64, "seqId": 1, "prevSeqId": -1}),
        ))
        .unwrap();
    assert!(assert_ready!(watch.poll()).is_ok());

    let mut waiting = spawn(client.watch_order_book("BTC/USDT", None));
    assert_pending!(waiting.poll());
    client
        .handle_message(&okx_books(
            "update",
            "BTC-USDT",
            json!({"bids": [["3366", "6", "0", "1"]], "asks": [],
                   "ts": "2", "checksum": 42, "seqId": 2, "prevSeqId": 1}),
        ))
        .unwrap();
    assert!(!waiting.is_woken());
    assert_eq!(
        client.books().get_state("BTC/USDT"),
        Some(SyncState::Resyncing)
    );
    assert_eq!(next_request(&mut outbound).await["op"], "unsubscribe");
    assert_eq!(next_request(&mut outbound).await["op"], "subscribe");

    // acknowledging the unsubscribe half of a resync keeps the book
    client
        .handle_message(
            &json!({"event": "unsubscribe", "arg": {"channel": "books", "instId": "BTC-USDT"}})
                .to_string(),
        )
        .unwrap();
    assert!(client.books().contains("BTC/USDT"));

    client.handle_message(&okx_subscribed("BTC-USDT")).unwrap();
    client
        .handle_message(&okx_books(
            "snapshot",
            "BTC-USDT",
            json!({"bids": [["3366", "6", "0", "1"]], "asks": [], "ts": "3",
                   "seqId": 10, "prevSeqId": -1}),
        ))
        .unwrap();
    let book = assert_ready!(waiting.poll()).unwrap();
    assert_eq!(book.nonce(), Some(10));
}

#[tokio::test]
async fn test_subscription_rejected() {
    let client = kraken();
    let mut outbound = client.take_outbound().unwrap();

    let mut watch = spawn(client.watch_order_book("FOO/BAR", None));
    assert_pending!(watch.poll());
    let request = next_request(&mut outbound).await;
    assert_eq!(request["params"]["depth"], 10);
    let id = request["req_id"].as_u64().unwrap();

    client
        .handle_message(
            &json!({"error": "Currency pair not supported FOO/BAR", "method": "subscribe",
                    "req_id": id, "success": false})
            .to_string(),
        )
        .unwrap();

    let err = assert_ready!(watch.poll()).unwrap_err();
    assert!(matches!(
        err.root(),
        Error::SubscriptionRejected { subscription, .. } if subscription == "orderbook@FOO/BAR"
    ));
    assert!(!client.books().contains("FOO/BAR"));
}

#[tokio::test]
async fn test_unwatch_rejects_pending_watchers() {
    let client = kraken();
    let mut outbound = client.take_outbound().unwrap();

    let mut watch = spawn(client.watch_order_book("BTC/USD", Some(1)));
    assert_pending!(watch.poll());
    let id = next_request(&mut outbound).await["req_id"].as_u64().unwrap();
    client
        .handle_message(
            &json!({"method": "subscribe", "req_id": id, "success": true,
                    "result": {"channel": "book", "depth": 10, "snapshot": true, "symbol": "BTC/USD"}})
            .to_string(),
        )
        .unwrap();
    client
        .handle_message(
            &json!({"channel": "book", "type": "snapshot", "data": [{
                "symbol": "BTC/USD",
                "bids": [{"price": 100.5, "qty": 1.0}, {"price": 100.0, "qty": 2.0}],
                "asks": [{"price": 101.0, "qty": 2.0}],
                "checksum": 1
            }]})
            .to_string(),
        )
        .unwrap();
    let book = assert_ready!(watch.poll()).unwrap();
    assert_eq!(book.bids().len(), 1);
    assert_eq!(book.best_bid().map(|level| level.price), Some(dec!(100.5)));

    let mut pending = spawn(client.watch_order_book("BTC/USD", None));
    assert_pending!(pending.poll());

    let mut unwatch = spawn(client.un_watch_order_book("BTC/USD"));
    assert_pending!(unwatch.poll());
    let request = next_request(&mut outbound).await;
    assert_eq!(request["method"], "unsubscribe");
    let id = request["req_id"].as_u64().unwrap();

    client
        .handle_message(
            &json!({"method": "unsubscribe", "req_id": id, "success": true,
                    "result": {"channel": "book", "symbol": "BTC/USD"}})
            .to_string(),
        )
        .unwrap();

    assert!(assert_ready!(unwatch.poll()).is_ok());
    let err = assert_ready!(pending.poll()).unwrap_err();
    assert!(matches!(err.root(), Error::Unsubscribed(symbol) if symbol == "BTC/USD"));
    assert!(!client.books().contains("BTC/USD"));
}

#[tokio::test]
async fn test_watch_trades_limit() {
    let client = okx(Config::default());
    let mut outbound = client.take_outbound().unwrap();

    let mut watch = spawn(client.watch_trades("BTC/USDT", Some(1)));
    assert_pending!(watch.poll());
    assert_eq!(
        next_request(&mut outbound).await["args"][0]["channel"],
        "trades"
    );

    let frame = json!({
        "arg": {"channel": "trades", "instId": "BTC-USDT"},
        "data": [
            {"instId": "BTC-USDT", "tradeId": "1", "px": "100", "sz": "1", "side": "buy", "ts": "1"},
            {"instId": "BTC-USDT", "tradeId": "2", "px": "101", "sz": "2", "side": "sell", "ts": "2"}
        ]
    });
    client.handle_message(&frame.to_string()).unwrap();

    let trades = assert_ready!(watch.poll()).unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].id.as_deref(), Some("2"));
    assert_eq!(trades[0].price, dec!(101));
}

#[tokio::test]
async fn test_trades_between_watches_are_kept() {
    let client = okx(Config::default());
    let mut outbound = client.take_outbound().unwrap();

    let mut first = spawn(client.watch_trades("BTC/USDT", None));
    assert_pending!(first.poll());
    next_request(&mut outbound).await;
    client.handle_message(&okx_trade("1", "100")).unwrap();
    let trades = assert_ready!(first.poll()).unwrap();
    assert_eq!(trades.len(), 1);

    // nobody is watching when this one arrives
    client.handle_message(&okx_trade("2", "101")).unwrap();

    let mut second = spawn(client.watch_trades("BTC/USDT", None));
    assert_pending!(second.poll());
    client.handle_message(&okx_trade("3", "102")).unwrap();
    let trades = assert_ready!(second.poll()).unwrap();
    let ids: Vec<_> = trades.iter().filter_map(|t| t.id.as_deref()).collect();
    assert_eq!(ids, vec!["2", "3"]);
}

#[tokio::test]
async fn test_watch_for_symbols_resolves_on_either() {
    let client = okx(Config::default());
    let mut outbound = client.take_outbound().unwrap();

    let mut watch = spawn(client.watch_order_book_for_symbols(&["BTC/USDT", "ETH/USDT"], None));
    assert_pending!(watch.poll());
    next_request(&mut outbound).await;
    next_request(&mut outbound).await;

    client
        .handle_message(&okx_books(
            "snapshot",
            "ETH-USDT",
            json!({"bids": [["2000", "1"]], "asks": [], "ts": "1", "seqId": 3, "prevSeqId": -1}),
        ))
        .unwrap();
    let book = assert_ready!(watch.poll()).unwrap();
    assert_eq!(book.symbol(), "ETH/USDT");
}

#[tokio::test]
async fn test_disconnect_rejects_pending() {
    let client = okx(Config::default());
    let mut outbound = client.take_outbound().unwrap();

    let mut watch = spawn(client.watch_order_book("BTC/USDT", None));
    assert_pending!(watch.poll());
    next_request(&mut outbound).await;

    client.on_disconnect();
    let err = assert_ready!(watch.poll()).unwrap_err();
    assert!(matches!(err.root(), Error::ConnectionClosed));
    assert!(client.books().is_empty());
}

#[tokio::test]
async fn test_disconnect_resubscribes() {
    let client = okx(Config::default().with_disconnect_policy(DisconnectPolicy::Resubscribe));
    let mut outbound = client.take_outbound().unwrap();

    let mut watch = spawn(client.watch_order_book("BTC/USDT", None));
    assert_pending!(watch.poll());
    next_request(&mut outbound).await;
    client.handle_message(&okx_subscribed("BTC-USDT")).unwrap();
    client
        .handle_message(&okx_books(
            "snapshot",
            "BTC-USDT",
            json!({"bids": [["100", "1"]], "asks": [], "ts": "1", "seqId": 5, "prevSeqId": -1}),
        ))
        .unwrap();
    assert!(assert_ready!(watch.poll()).is_ok());

    let mut waiting = spawn(client.watch_order_book("BTC/USDT", None));
    assert_pending!(waiting.poll());

    client.on_disconnect();
    assert_pending!(waiting.poll());
    assert_eq!(
        client.books().get_state("BTC/USDT"),
        Some(SyncState::Resyncing)
    );

    client.resubscribe_all().unwrap();
    let request = next_request(&mut outbound).await;
    assert_eq!(request["op"], "subscribe");
    assert_eq!(request["args"][0]["instId"], "BTC-USDT");

    client.handle_message(&okx_subscribed("BTC-USDT")).unwrap();
    client
        .handle_message(&okx_books(
            "snapshot",
            "BTC-USDT",
            json!({"bids": [["100", "2"]], "asks": [], "ts": "9", "seqId": 1, "prevSeqId": -1}),
        ))
        .unwrap();
    let book = assert_ready!(waiting.poll()).unwrap();
    assert_eq!(book.bids().get(&dec!(100)), Some(dec!(2)));
}
