//! Stream client: one connection, many watched books.
//!
//! [`StreamClient`] ties the pieces together. Watch calls register waiters
//! with the [`Multiplexer`] and send subscribe requests through an outbound
//! queue; [`handle_message`](StreamClient::handle_message) feeds every
//! inbound frame through the [`Protocol`] parser, the [`OrderbookManager`],
//! and back out to the waiters.
//!
//! Frames are handled one at a time in arrival order. Snapshot fetches run
//! as spawned tasks and apply their result through the same per-symbol
//! lock, so a book never sees two writers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ws_orderbook::client::StreamClient;
//! use ws_orderbook::exchange::{Okx, Protocol};
//! use ws_orderbook::Config;
//!
//! # async fn example() -> ws_orderbook::Result<()> {
//! let okx = Arc::new(Okx::new());
//! let url = okx.ws_url().to_string();
//! let client = StreamClient::new(okx, Config::default())?;
//!
//! let runner = client.clone();
//! tokio::spawn(async move { runner.run(&url).await });
//!
//! let book = client.watch_order_book("BTC/USDT", Some(5)).await?;
//! println!("best bid {:?}", book.best_bid());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use crate::cache::ArrayCache;
use crate::config::{Config, DisconnectPolicy};
use crate::error::Error;
use crate::exchange::Protocol;
use crate::orderbook::{OrderBook, OrderbookManager, ResyncReason, SnapshotSource, SyncOutcome};
use crate::types::{BookUpdate, InboundMessage, Trade};
use crate::Result;

use super::multiplexer::{
    unsubscribe_hash, unsubscribe_target, Multiplexer, Payload, Reply, Subscription,
    SubscriptionState,
};
use super::rest::{RestClient, SnapshotFetcher};
use super::websocket::WsTransport;

/// Order book and trade streaming client for one exchange
///
/// Cloning is cheap; clones share the same connection state, so one clone
/// can drive [`run`](Self::run) while others watch.
#[derive(Clone)]
pub struct StreamClient {
    shared: Arc<Shared>,
}

struct Shared {
    protocol: Arc<dyn Protocol>,
    config: Config,
    /// Levels per side kept and subscribed
    depth: Option<usize>,
    books: OrderbookManager,
    trades: Mutex<FxHashMap<String, ArrayCache<Trade>>>,
    mux: Multiplexer,
    fetcher: Option<Arc<dyn SnapshotFetcher>>,
    /// Symbol -> generation of its outstanding snapshot fetch
    fetches: Mutex<FxHashMap<String, u64>>,
    fetch_generation: AtomicU64,
    outbound: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    shutdown: Notify,
}

impl fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClient")
            .field("exchange", &self.shared.protocol.id())
            .field("depth", &self.shared.depth)
            .field("books", &self.shared.books.len())
            .field("fetcher", &self.shared.fetcher.is_some())
            .finish()
    }
}

impl StreamClient {
    /// Create a client for `protocol`
    ///
    /// Protocols that fetch snapshots get a [`RestClient`].
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(protocol: Arc<dyn Protocol>, config: Config) -> Result<Self> {
        let fetcher: Option<Arc<dyn SnapshotFetcher>> = match protocol.sync_profile().snapshot_source
        {
            SnapshotSource::Fetch => Some(Arc::new(RestClient::new(Arc::clone(&protocol), &config)?)),
            SnapshotSource::Stream => None,
        };
        Ok(Self::build(protocol, config, fetcher))
    }

    /// Create a client that fetches snapshots from `fetcher`
    pub fn with_fetcher(
        protocol: Arc<dyn Protocol>,
        config: Config,
        fetcher: Arc<dyn SnapshotFetcher>,
    ) -> Self {
        Self::build(protocol, config, Some(fetcher))
    }

    fn build(
        protocol: Arc<dyn Protocol>,
        config: Config,
        fetcher: Option<Arc<dyn SnapshotFetcher>>,
    ) -> Self {
        let mut profile = protocol.sync_profile();
        if !config
            .checksum()
            .unwrap_or_else(|| protocol.checksum_by_default())
        {
            profile = profile.with_checksum(None);
        }
        let depth = config.depth().or_else(|| protocol.default_depth());
        let books = OrderbookManager::new(profile)
            .with_depth(depth)
            .with_max_buffered(config.max_buffered_deltas());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        Self {
            shared: Arc::new(Shared {
                protocol,
                config,
                depth,
                books,
                trades: Mutex::new(FxHashMap::default()),
                mux: Multiplexer::new(),
                fetcher,
                fetches: Mutex::new(FxHashMap::default()),
                fetch_generation: AtomicU64::new(0),
                outbound,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                shutdown: Notify::new(),
            }),
        }
    }

    /// Exchange protocol
    pub fn protocol(&self) -> &Arc<dyn Protocol> {
        &self.shared.protocol
    }

    /// Client configuration
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Books, for inspecting synchronization state
    pub fn books(&self) -> &OrderbookManager {
        &self.shared.books
    }

    /// Take the queue of outgoing frames
    ///
    /// [`run`](Self::run) takes it itself; take it only when driving the
    /// client over a custom transport. Returns `None` if already taken.
    pub fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.shared.outbound_rx.lock().take()
    }

    /// Stop a running [`run`](Self::run) loop
    pub fn shutdown(&self) {
        self.shared.shutdown.notify_one();
    }

    /// Wait for the next update of `symbol`'s book
    ///
    /// Subscribes on first use. The returned book is a copy truncated to
    /// `limit` levels per side.
    ///
    /// # Errors
    ///
    /// Returns the rejection if the exchange refuses the subscription, the
    /// snapshot cannot be fetched, the caller unsubscribes, or the
    /// connection drops under [`DisconnectPolicy::RejectPending`].
    pub async fn watch_order_book(&self, symbol: &str, limit: Option<usize>) -> Result<OrderBook> {
        self.watch_order_book_for_symbols(&[symbol], limit).await
    }

    /// Wait for the next update of any of `symbols`' books
    pub async fn watch_order_book_for_symbols(
        &self,
        symbols: &[&str],
        limit: Option<usize>,
    ) -> Result<OrderBook> {
        if symbols.is_empty() {
            return Err(Error::InvalidSymbol("empty symbol list".to_string()));
        }
        let shared = &self.shared;
        let hashes: Vec<String> = symbols
            .iter()
            .map(|symbol| shared.protocol.order_book_hash(symbol))
            .collect();

        for (symbol, hash) in symbols.iter().zip(&hashes) {
            shared.subscribe_order_book(symbol, hash)?;
        }
        let rx = shared.mux.register(&hashes);

        match wait(rx).await? {
            Payload::OrderBook(book) => Ok(book.limit(limit)),
            other => Err(unexpected(&other)),
        }
    }

    /// Stop watching `symbol`'s book
    ///
    /// Sends the unsubscribe request and waits up to the configured timeout
    /// for the acknowledgement. Pending watchers of the book are rejected
    /// with [`Error::Unsubscribed`].
    pub async fn un_watch_order_book(&self, symbol: &str) -> Result<()> {
        let shared = &self.shared;
        let hash = shared.protocol.order_book_hash(symbol);
        if !shared.mux.mark_closing(&hash) {
            debug!(symbol, "order book not watched");
            return Ok(());
        }

        let id = shared.mux.next_request_id();
        let request = shared.protocol.unsubscribe_order_book(symbol, id)?;
        let ack = unsubscribe_hash(&hash);
        shared.mux.track_request(id, &ack);
        let rx = shared.mux.register(std::slice::from_ref(&ack));
        shared.send(&request)?;

        match time::timeout(shared.config.timeout(), wait(rx)).await {
            Ok(reply) => reply.map(|_| ()),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Wait for the next trades of `symbol`
    ///
    /// Returns the trades received since the previous delivery, at most the
    /// last `limit` of them.
    pub async fn watch_trades(&self, symbol: &str, limit: Option<usize>) -> Result<Vec<Trade>> {
        let shared = &self.shared;
        let hash = shared.protocol.trades_hash(symbol);
        shared.subscribe_trades(symbol, &hash)?;
        let rx = shared.mux.register(std::slice::from_ref(&hash));

        match wait(rx).await? {
            Payload::Trades(mut trades) => {
                if let Some(limit) = limit {
                    let skip = trades.len().saturating_sub(limit);
                    trades.drain(..skip);
                }
                Ok(trades)
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Copy of `symbol`'s book, if it is live
    pub fn order_book(&self, symbol: &str) -> Option<OrderBook> {
        self.shared.books.live_orderbook(symbol)
    }

    /// Process one raw frame
    ///
    /// Must be called from within a Tokio runtime; snapshot fetches are
    /// spawned from here.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be parsed. Nothing has been
    /// applied in that case.
    pub fn handle_message(&self, raw: &str) -> Result<()> {
        let shared = &self.shared;
        let messages = shared.protocol.parse_message(raw)?;

        let mut traded: Vec<String> = Vec::new();
        for message in messages {
            match message {
                InboundMessage::Snapshot(update) => shared.on_book(&update, true),
                InboundMessage::Delta(update) => shared.on_book(&update, false),
                InboundMessage::Trade(trade) => {
                    if let Some(symbol) = shared.on_trade(trade) {
                        if !traded.contains(&symbol) {
                            traded.push(symbol);
                        }
                    }
                }
                InboundMessage::Heartbeat => trace!("heartbeat"),
                InboundMessage::Subscribed {
                    request_id,
                    subscription,
                } => shared.on_subscribed(request_id, subscription),
                InboundMessage::Unsubscribed {
                    request_id,
                    subscription,
                } => shared.on_unsubscribed(request_id, subscription),
                InboundMessage::Error {
                    request_id,
                    subscription,
                    code,
                    message,
                } => shared.on_error(request_id, subscription, code, message),
            }
        }

        for symbol in traded {
            shared.publish_trades(&symbol);
        }
        Ok(())
    }

    /// Apply the disconnect policy after the connection dropped
    pub fn on_disconnect(&self) {
        let shared = &self.shared;
        // snapshots requested over the old connection are superseded
        shared.fetches.lock().clear();
        match shared.config.disconnect_policy() {
            DisconnectPolicy::RejectPending => {
                let rejected = shared.mux.reject_all(Error::ConnectionClosed);
                shared.mux.clear_subscriptions();
                shared.books.clear();
                shared.trades.lock().clear();
                info!(rejected, "connection lost, pending watches rejected");
            }
            DisconnectPolicy::Resubscribe => {
                for subscription in shared.mux.subscriptions() {
                    if subscription.state == SubscriptionState::Closing {
                        shared.finish_unsubscribe(&unsubscribe_hash(&subscription.hash));
                    }
                }
                shared.books.invalidate_all();
                info!(books = shared.books.len(), "connection lost, books discarded");
            }
        }
    }

    /// Send every subscription again with fresh request ids
    pub fn resubscribe_all(&self) -> Result<()> {
        let shared = &self.shared;
        let subscriptions = shared.mux.rearm();
        info!(count = subscriptions.len(), "replaying subscriptions");
        for subscription in &subscriptions {
            let request = shared.replay_request(subscription)?;
            shared.send(&request)?;
        }
        Ok(())
    }

    /// Drive the connection until [`shutdown`](Self::shutdown)
    ///
    /// Connects to `url`, writes queued requests, feeds every frame to
    /// [`handle_message`](Self::handle_message), and sends the protocol's
    /// ping on the keepalive interval. Lost connections are retried with
    /// the configured backoff.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] once the retry budget is spent,
    /// or [`Error::Config`] if the client is already running.
    pub async fn run(&self, url: &str) -> Result<()> {
        let mut outbound = self
            .take_outbound()
            .ok_or_else(|| Error::Config("stream client is already running".to_string()))?;
        let result = self.run_loop(url, &mut outbound).await;
        *self.shared.outbound_rx.lock() = Some(outbound);
        result
    }

    async fn run_loop(
        &self,
        url: &str,
        outbound: &mut mpsc::UnboundedReceiver<String>,
    ) -> Result<()> {
        let reconnect = self.shared.config.reconnect().clone();
        let mut attempt = 0;
        let mut connected_before = false;

        loop {
            match WsTransport::connect(url).await {
                Ok(mut transport) => {
                    info!(url, exchange = self.shared.protocol.id(), "stream connected");
                    attempt = 0;
                    if connected_before
                        && self.shared.config.disconnect_policy() == DisconnectPolicy::Resubscribe
                    {
                        self.resubscribe_all()?;
                    }
                    connected_before = true;

                    let result = self.pump(&mut transport, outbound).await;
                    self.on_disconnect();
                    // requests queued for the old connection are stale
                    while outbound.try_recv().is_ok() {}
                    match result {
                        Ok(()) => return Ok(()),
                        Err(err) => warn!(%err, "stream disconnected"),
                    }
                }
                Err(err) => warn!(%err, attempt, "connect failed"),
            }

            if reconnect.exhausted(attempt) {
                return Err(Error::ConnectionClosed);
            }
            let delay = reconnect.delay_for_attempt(attempt);
            attempt += 1;
            debug!(?delay, attempt, "reconnecting");
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = self.shared.shutdown.notified() => return Ok(()),
            }
        }
    }

    async fn pump(
        &self,
        transport: &mut WsTransport,
        outbound: &mut mpsc::UnboundedReceiver<String>,
    ) -> Result<()> {
        let period = self
            .shared
            .config
            .keepalive()
            .max(Duration::from_millis(1));
        let mut keepalive = time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                frame = transport.next() => match frame {
                    Some(Ok(text)) => {
                        if let Err(err) = self.handle_message(&text) {
                            warn!(%err, "dropping unparseable frame");
                        }
                    }
                    Some(Err(err)) => return Err(err),
                    None => return Err(Error::ConnectionClosed),
                },
                Some(text) = outbound.recv() => transport.send(text).await?,
                _ = keepalive.tick() => {
                    if let Some(ping) = self.shared.protocol.ping_message() {
                        transport.send(ping).await?;
                    }
                }
                _ = self.shared.shutdown.notified() => {
                    transport.close().await?;
                    return Ok(());
                }
            }
        }
    }
}

impl Shared {
    fn send(&self, request: &Value) -> Result<()> {
        self.outbound
            .send(request.to_string())
            .map_err(|_| Error::ConnectionClosed)
    }

    fn subscribe_order_book(&self, symbol: &str, hash: &str) -> Result<()> {
        if self.mux.is_subscribed(hash) {
            return Ok(());
        }
        let id = self.mux.next_request_id();
        let request = self.protocol.subscribe_order_book(symbol, self.depth, id)?;
        let subscription = Subscription::new(hash, request.clone())
            .with_symbols(vec![symbol.to_string()])
            .with_request_id(id);
        if !self.mux.subscribe(subscription) {
            return Ok(());
        }

        self.books.add_market(symbol);
        debug!(symbol, hash, "subscribing to order book");
        self.send(&request)
    }

    fn subscribe_trades(&self, symbol: &str, hash: &str) -> Result<()> {
        if self.mux.is_subscribed(hash) {
            return Ok(());
        }
        let id = self.mux.next_request_id();
        let request = self.protocol.subscribe_trades(symbol, id)?;
        let subscription = Subscription::new(hash, request.clone())
            .with_symbols(vec![symbol.to_string()])
            .with_request_id(id);
        if !self.mux.subscribe(subscription) {
            return Ok(());
        }

        self.trades
            .lock()
            .entry(symbol.to_string())
            .or_insert_with(|| ArrayCache::new(self.config.trades_limit()));
        debug!(symbol, hash, "subscribing to trades");
        self.send(&request)
    }

    /// Request for a subscription being replayed, with its current id
    fn replay_request(&self, subscription: &Subscription) -> Result<Value> {
        let id = subscription
            .request_id
            .unwrap_or_else(|| self.mux.next_request_id());
        for symbol in &subscription.symbols {
            if self.protocol.order_book_hash(symbol) == subscription.hash {
                return self.protocol.subscribe_order_book(symbol, self.depth, id);
            }
            if self.protocol.trades_hash(symbol) == subscription.hash {
                return self.protocol.subscribe_trades(symbol, id);
            }
        }
        Ok(subscription.request.clone())
    }

    fn on_book(self: &Arc<Self>, update: &BookUpdate, snapshot: bool) {
        let hash = self.protocol.order_book_hash(&update.symbol);
        let publish = |book: &OrderBook| {
            if self.mux.pending(&hash) > 0 {
                self.mux.resolve(&hash, Payload::OrderBook(book.clone()));
            }
        };
        let outcome = if snapshot {
            self.books.apply_snapshot(update, publish)
        } else {
            self.books.apply_delta(update, publish)
        };

        if let Some(SyncOutcome::Resync(reason)) = outcome {
            self.resync(&update.symbol, &hash, reason);
        }
    }

    /// Ask for a fresh snapshot after the book was discarded
    fn resync(self: &Arc<Self>, symbol: &str, hash: &str, reason: ResyncReason) {
        debug!(symbol, %reason, "requesting fresh snapshot");
        match self.books.profile().snapshot_source {
            SnapshotSource::Fetch => self.spawn_fetch(symbol.to_string()),
            SnapshotSource::Stream => {
                // the exchange only sends a snapshot on a new subscription
                if let Err(err) = self.resubscribe(symbol, hash) {
                    warn!(symbol, %err, "resubscribe failed");
                    self.fail_book(symbol, hash, err);
                }
            }
        }
    }

    fn resubscribe(&self, symbol: &str, hash: &str) -> Result<()> {
        let unsubscribe = self
            .protocol
            .unsubscribe_order_book(symbol, self.mux.next_request_id())?;
        let id = self.mux.next_request_id();
        let subscribe = self.protocol.subscribe_order_book(symbol, self.depth, id)?;
        self.mux.track_request(id, hash);
        self.send(&unsubscribe)?;
        self.send(&subscribe)
    }

    fn spawn_fetch(self: &Arc<Self>, symbol: String) {
        let hash = self.protocol.order_book_hash(&symbol);
        let Some(fetcher) = self.fetcher.clone() else {
            let err = Error::NotSupported(format!("no snapshot source for {symbol}"));
            self.fail_book(&symbol, &hash, err);
            return;
        };

        let generation = {
            let mut fetches = self.fetches.lock();
            if fetches.contains_key(&symbol) {
                debug!(%symbol, "snapshot fetch already in flight");
                return;
            }
            let generation = self.fetch_generation.fetch_add(1, Ordering::Relaxed);
            fetches.insert(symbol.clone(), generation);
            generation
        };

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let result = fetcher.fetch_order_book_snapshot(&symbol, shared.depth).await;
            if !shared.finish_fetch(&symbol, generation) {
                debug!(%symbol, "discarding superseded snapshot");
                return;
            }
            match result {
                Ok(snapshot) => shared.on_book(&snapshot, true),
                Err(err) => {
                    warn!(%symbol, %err, "snapshot fetch failed");
                    shared.fail_book(&symbol, &hash, err);
                }
            }
        });
    }

    /// Close out a snapshot fetch; `false` if it was superseded
    fn finish_fetch(&self, symbol: &str, generation: u64) -> bool {
        let mut fetches = self.fetches.lock();
        if fetches.get(symbol) != Some(&generation) {
            return false;
        }
        fetches.remove(symbol);
        true
    }

    /// Give up on a book: forget it and reject its watchers
    fn fail_book(&self, symbol: &str, hash: &str, error: Error) {
        self.fetches.lock().remove(symbol);
        self.mux.remove_subscription(hash);
        self.books.remove_market(symbol);
        self.mux.reject(hash, error);
    }

    fn on_trade(&self, trade: Trade) -> Option<String> {
        let mut caches = self.trades.lock();
        let cache = caches.get_mut(&trade.symbol)?;
        let symbol = trade.symbol.clone();
        cache.append(trade);
        Some(symbol)
    }

    /// Hand new trades to waiting watchers
    ///
    /// Without a watcher the trades stay new until the next one arrives.
    fn publish_trades(&self, symbol: &str) {
        let hash = self.protocol.trades_hash(symbol);
        if self.mux.pending(&hash) == 0 {
            return;
        }
        let trades = match self.trades.lock().get_mut(symbol) {
            Some(cache) => cache.take_new_updates(),
            None => return,
        };
        self.mux.resolve(&hash, Payload::Trades(trades));
    }

    fn on_subscribed(self: &Arc<Self>, request_id: Option<u64>, subscription: Option<String>) {
        let hash = request_id
            .and_then(|id| self.mux.take_request(id))
            .or(subscription);
        let Some(hash) = hash else {
            debug!(?request_id, "acknowledgement for unknown request");
            return;
        };
        if unsubscribe_target(&hash).is_some() {
            self.finish_unsubscribe(&hash);
            return;
        }

        let Some(subscription) = self.mux.activate(&hash) else {
            return;
        };
        debug!(%hash, "subscription acknowledged");
        if self.books.profile().snapshot_source == SnapshotSource::Fetch {
            for symbol in &subscription.symbols {
                if self.protocol.order_book_hash(symbol) == subscription.hash {
                    self.spawn_fetch(symbol.clone());
                }
            }
        }
    }

    fn on_unsubscribed(&self, request_id: Option<u64>, subscription: Option<String>) {
        let ack = request_id
            .and_then(|id| self.mux.take_request(id))
            .or_else(|| subscription.map(|hash| unsubscribe_hash(&hash)));
        if let Some(ack) = ack {
            self.finish_unsubscribe(&ack);
        }
    }

    /// Complete a requested unsubscribe
    ///
    /// Acknowledgements of the unsubscribe half of a resync are ignored.
    fn finish_unsubscribe(&self, ack: &str) {
        let Some(hash) = unsubscribe_target(ack) else {
            return;
        };
        match self.mux.subscription(hash) {
            Some(subscription) if subscription.state == SubscriptionState::Closing => {
                self.mux.remove_subscription(hash);
                self.forget(&subscription);
                self.mux
                    .reject(hash, Error::Unsubscribed(subscription.symbols.join(",")));
                self.mux.resolve(ack, Payload::Ack);
                debug!(hash, "unsubscribed");
            }
            _ => trace!(hash, "unsubscribe acknowledged for a live subscription"),
        }
    }

    fn forget(&self, subscription: &Subscription) {
        for symbol in &subscription.symbols {
            if self.protocol.order_book_hash(symbol) == subscription.hash {
                self.fetches.lock().remove(symbol);
                self.books.remove_market(symbol);
            }
            if self.protocol.trades_hash(symbol) == subscription.hash {
                self.trades.lock().remove(symbol);
            }
        }
    }

    fn on_error(
        &self,
        request_id: Option<u64>,
        subscription: Option<String>,
        code: Option<String>,
        message: String,
    ) {
        let target = request_id
            .and_then(|id| self.mux.take_request(id))
            .or(subscription);

        match target {
            Some(hash) if unsubscribe_target(&hash).is_some() => {
                warn!(%hash, ?code, %message, "unsubscribe failed");
                self.mux.reject(&hash, Error::Exchange { code, message });
            }
            Some(hash) => match self.mux.remove_subscription(&hash) {
                Some(rejected) => {
                    warn!(%hash, ?code, %message, "subscription rejected");
                    self.forget(&rejected);
                    self.mux.reject(
                        &hash,
                        Error::SubscriptionRejected {
                            subscription: hash.clone(),
                            reason: message,
                        },
                    );
                }
                None => {
                    warn!(%hash, ?code, %message, "exchange error");
                    self.mux.reject(&hash, Error::Exchange { code, message });
                }
            },
            None => {
                // no way to tell which request failed; drop the unconfirmed ones
                warn!(?code, %message, "exchange error");
                for pending in self.mux.subscriptions() {
                    if pending.state == SubscriptionState::Pending {
                        self.mux.remove_subscription(&pending.hash);
                        self.forget(&pending);
                    }
                }
                self.mux.reject_all(Error::Exchange { code, message });
            }
        }
    }
}

async fn wait(rx: oneshot::Receiver<Reply>) -> Result<Payload> {
    match rx.await {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(error)) => Err(Error::Shared(error)),
        Err(_) => Err(Error::ConnectionClosed),
    }
}

fn unexpected(payload: &Payload) -> Error {
    Error::Malformed(format!("unexpected payload for watcher: {payload:?}"))
}
