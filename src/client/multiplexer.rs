//! Request/response multiplexing over one connection.
//!
//! Every watch call registers a one-shot waiter under one or more message
//! hashes. When data for a hash arrives, every waiter registered under it
//! is resolved with the same payload and the list is emptied; callers that
//! watch again wait for the next update.
//!
//! The [`Multiplexer`] also owns the subscription records, keyed by
//! subscription hash, so a wire subscription is sent once no matter how many
//! callers watch it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::Error;
use crate::orderbook::OrderBook;
use crate::types::Trade;

/// Data delivered to a waiter
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Updated order book
    OrderBook(OrderBook),
    /// Trades appended since the previous delivery
    Trades(Vec<Trade>),
    /// Request acknowledged
    Ack,
}

/// What a waiter receives
pub type Reply = Result<Payload, Arc<Error>>;

/// One-shot handle, shared by every hash it was registered under
#[derive(Debug)]
struct Waiter {
    tx: Mutex<Option<oneshot::Sender<Reply>>>,
}

impl Waiter {
    /// Deliver once; later calls and dropped receivers are no-ops
    fn send(&self, reply: Reply) -> bool {
        match self.tx.lock().take() {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    fn is_pending(&self) -> bool {
        self.tx.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Lifecycle of a wire subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Request sent, no acknowledgement yet
    Pending,
    /// Acknowledged by the exchange
    Active,
    /// Unsubscribe sent, waiting for the acknowledgement
    Closing,
}

/// A wire subscription and the request that created it
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Deduplication key
    pub hash: String,
    /// Hashes its data is delivered under
    pub message_hashes: Vec<String>,
    /// Symbols covered
    pub symbols: Vec<String>,
    /// Subscribe request, replayed after a reconnect
    pub request: Value,
    /// Id of the last request sent for it
    pub request_id: Option<u64>,
    /// Acknowledgement state
    pub state: SubscriptionState,
}

impl Subscription {
    /// Create a pending subscription
    pub fn new(hash: impl Into<String>, request: Value) -> Self {
        let hash = hash.into();
        Self {
            message_hashes: vec![hash.clone()],
            hash,
            symbols: Vec::new(),
            request,
            request_id: None,
            state: SubscriptionState::Pending,
        }
    }

    /// Set the symbols covered
    #[must_use]
    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = symbols;
        self
    }

    /// Set the request id
    #[must_use]
    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

const UNSUBSCRIBE_PREFIX: &str = "unsubscribe:";

/// Hash under which the acknowledgement of an unsubscribe is delivered
pub fn unsubscribe_hash(subscription_hash: &str) -> String {
    format!("{UNSUBSCRIBE_PREFIX}{subscription_hash}")
}

/// Subscription an unsubscribe hash refers to
pub fn unsubscribe_target(hash: &str) -> Option<&str> {
    hash.strip_prefix(UNSUBSCRIBE_PREFIX)
}

/// Waiters and subscriptions of one connection
#[derive(Debug, Default)]
pub struct Multiplexer {
    waiters: Mutex<FxHashMap<String, Vec<Arc<Waiter>>>>,
    subscriptions: Mutex<FxHashMap<String, Subscription>>,
    /// Request id -> hash its reply is delivered under
    requests: Mutex<FxHashMap<u64, String>>,
    next_id: AtomicU64,
}

impl Multiplexer {
    /// Create an empty multiplexer
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Self::default()
        }
    }

    /// Allocate a request id
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a waiter under every hash in `hashes`
    ///
    /// The first resolve or reject on any of them completes it.
    pub fn register(&self, hashes: &[String]) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        let waiter = Arc::new(Waiter {
            tx: Mutex::new(Some(tx)),
        });
        let mut waiters = self.waiters.lock();
        for hash in hashes {
            let list = waiters.entry(hash.clone()).or_default();
            list.retain(|w| w.is_pending());
            list.push(Arc::clone(&waiter));
        }
        rx
    }

    /// Resolve every waiter under `hash`
    ///
    /// Returns the number of waiters that received the payload.
    pub fn resolve(&self, hash: &str, payload: Payload) -> usize {
        self.drain(hash)
            .into_iter()
            .filter(|w| w.send(Ok(payload.clone())))
            .count()
    }

    /// Reject every waiter under `hash`
    pub fn reject(&self, hash: &str, error: Error) -> usize {
        let error = Arc::new(error);
        self.drain(hash)
            .into_iter()
            .filter(|w| w.send(Err(Arc::clone(&error))))
            .count()
    }

    /// Reject every waiter on the connection
    pub fn reject_all(&self, error: Error) -> usize {
        let error = Arc::new(error);
        let drained: Vec<_> = self.waiters.lock().drain().collect();
        drained
            .into_iter()
            .flat_map(|(_, list)| list)
            .filter(|w| w.send(Err(Arc::clone(&error))))
            .count()
    }

    fn drain(&self, hash: &str) -> Vec<Arc<Waiter>> {
        self.waiters.lock().remove(hash).unwrap_or_default()
    }

    /// Number of live waiters under `hash`
    pub fn pending(&self, hash: &str) -> usize {
        self.waiters
            .lock()
            .get(hash)
            .map_or(0, |list| list.iter().filter(|w| w.is_pending()).count())
    }

    /// Record a subscription
    ///
    /// Returns `false` if the hash is already pending or active, in which
    /// case nothing should be sent.
    pub fn subscribe(&self, subscription: Subscription) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.contains_key(&subscription.hash) {
            return false;
        }
        if let Some(id) = subscription.request_id {
            self.track_request(id, &subscription.hash);
        }
        subscriptions.insert(subscription.hash.clone(), subscription);
        true
    }

    /// Look up a subscription
    pub fn subscription(&self, hash: &str) -> Option<Subscription> {
        self.subscriptions.lock().get(hash).cloned()
    }

    /// Check if a subscription hash is pending or active
    pub fn is_subscribed(&self, hash: &str) -> bool {
        self.subscriptions.lock().contains_key(hash)
    }

    /// Forget a subscription
    pub fn remove_subscription(&self, hash: &str) -> Option<Subscription> {
        self.subscriptions.lock().remove(hash)
    }

    /// Mark a subscription acknowledged
    ///
    /// Returns the subscription if it was pending.
    pub fn activate(&self, hash: &str) -> Option<Subscription> {
        let mut subscriptions = self.subscriptions.lock();
        let subscription = subscriptions.get_mut(hash)?;
        if subscription.state != SubscriptionState::Pending {
            return None;
        }
        subscription.state = SubscriptionState::Active;
        Some(subscription.clone())
    }

    /// Mark a subscription as being torn down
    ///
    /// Returns `false` if the hash is not subscribed.
    pub fn mark_closing(&self, hash: &str) -> bool {
        match self.subscriptions.lock().get_mut(hash) {
            Some(subscription) => {
                subscription.state = SubscriptionState::Closing;
                true
            }
            None => false,
        }
    }

    /// Give every subscription a fresh request id and mark it pending
    ///
    /// Subscriptions that were being torn down are dropped. Returns the
    /// subscriptions to send again.
    pub fn rearm(&self) -> Vec<Subscription> {
        let mut subscriptions = self.subscriptions.lock();
        let mut requests = self.requests.lock();
        requests.clear();
        subscriptions.retain(|_, subscription| subscription.state != SubscriptionState::Closing);
        subscriptions
            .values_mut()
            .map(|subscription| {
                let id = self.next_request_id();
                subscription.state = SubscriptionState::Pending;
                subscription.request_id = Some(id);
                requests.insert(id, subscription.hash.clone());
                subscription.clone()
            })
            .collect()
    }

    /// All subscriptions
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().values().cloned().collect()
    }

    /// Remember which hash the reply to `request_id` belongs to
    pub fn track_request(&self, request_id: u64, hash: &str) {
        self.requests.lock().insert(request_id, hash.to_string());
    }

    /// Take the hash a reply belongs to
    pub fn take_request(&self, request_id: u64) -> Option<String> {
        self.requests.lock().remove(&request_id)
    }

    /// Forget every subscription and request
    pub fn clear_subscriptions(&self) {
        self.subscriptions.lock().clear();
        self.requests.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hashes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_fans_out_and_rearms() {
        let mux = Multiplexer::new();
        let mut a = mux.register(&hashes(&["book:X"]));
        let mut b = mux.register(&hashes(&["book:X"]));

        assert_eq!(mux.resolve("book:X", Payload::Ack), 2);
        assert_eq!(a.try_recv().unwrap().unwrap(), Payload::Ack);
        assert_eq!(b.try_recv().unwrap().unwrap(), Payload::Ack);

        // nobody left for the next update
        assert_eq!(mux.resolve("book:X", Payload::Ack), 0);
    }

    #[test]
    fn test_waiter_on_several_hashes_resolves_once() {
        let mux = Multiplexer::new();
        let mut rx = mux.register(&hashes(&["book:X", "book:Y"]));

        assert_eq!(mux.resolve("book:Y", Payload::Ack), 1);
        assert_eq!(mux.resolve("book:X", Payload::Ack), 0);
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_reject_shares_error() {
        let mux = Multiplexer::new();
        let mut a = mux.register(&hashes(&["h"]));
        let mut b = mux.register(&hashes(&["h"]));

        assert_eq!(mux.reject("h", Error::ConnectionClosed), 2);
        let ea = a.try_recv().unwrap().unwrap_err();
        let eb = b.try_recv().unwrap().unwrap_err();
        assert!(Arc::ptr_eq(&ea, &eb));
        assert!(matches!(*ea, Error::ConnectionClosed));
    }

    #[test]
    fn test_reject_all() {
        let mux = Multiplexer::new();
        let mut a = mux.register(&hashes(&["h1"]));
        let mut b = mux.register(&hashes(&["h2", "h3"]));

        assert_eq!(mux.reject_all(Error::ConnectionClosed), 2);
        assert!(a.try_recv().unwrap().is_err());
        assert!(b.try_recv().unwrap().is_err());
    }

    #[test]
    fn test_abandoned_waiter_does_not_affect_others() {
        let mux = Multiplexer::new();
        let dropped = mux.register(&hashes(&["h"]));
        let mut kept = mux.register(&hashes(&["h"]));
        drop(dropped);

        assert_eq!(mux.pending("h"), 1);
        assert_eq!(mux.resolve("h", Payload::Ack), 1);
        assert!(kept.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_subscription_dedup() {
        let mux = Multiplexer::new();
        let id = mux.next_request_id();
        let sub = Subscription::new("depth:X", json!({"op": "subscribe"})).with_request_id(id);

        assert!(mux.subscribe(sub.clone()));
        assert!(!mux.subscribe(sub));
        assert_eq!(mux.take_request(id).as_deref(), Some("depth:X"));

        assert!(mux.activate("depth:X").is_some());
        assert!(mux.activate("depth:X").is_none());
        assert_eq!(
            mux.subscription("depth:X").map(|s| s.state),
            Some(SubscriptionState::Active)
        );
    }

    #[test]
    fn test_rearm_marks_pending_with_fresh_ids() {
        let mux = Multiplexer::new();
        mux.subscribe(Subscription::new("a", json!(1)).with_request_id(1));
        mux.activate("a");

        let replay = mux.rearm();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].state, SubscriptionState::Pending);
        let id = replay[0].request_id.unwrap();
        assert_ne!(id, 1);
        assert_eq!(mux.take_request(id).as_deref(), Some("a"));
    }

    #[test]
    fn test_closing_subscription_not_rearmed() {
        let mux = Multiplexer::new();
        mux.subscribe(Subscription::new("a", json!(1)));
        mux.subscribe(Subscription::new("b", json!(2)));
        assert!(mux.mark_closing("a"));
        assert!(!mux.mark_closing("missing"));
        assert!(mux.activate("a").is_none());

        let replay = mux.rearm();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].hash, "b");
        assert!(!mux.is_subscribed("a"));
    }

    #[test]
    fn test_unsubscribe_hash() {
        let hash = unsubscribe_hash("books:BTC-USDT");
        assert_eq!(hash, "unsubscribe:books:BTC-USDT");
        assert_eq!(unsubscribe_target(&hash), Some("books:BTC-USDT"));
        assert_eq!(unsubscribe_target("books:BTC-USDT"), None);
    }
}
