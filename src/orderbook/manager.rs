//! Orderbook manager for handling multiple markets.
//!
//! This module provides [`OrderbookManager`], a thread-safe arena of
//! [`BookSync`] entries keyed by symbol.
//!
//! # Design
//!
//! The manager uses `parking_lot::RwLock` for each entry, allowing concurrent
//! reads while ensuring exclusive write access during updates. Snapshot
//! fetches complete on other tasks; they go through the same per-symbol lock
//! as stream deltas, so a book is always mutated by one writer at a time.
//!
//! Publication happens under the write lock too: the `publish` callback of
//! [`apply_snapshot`](OrderbookManager::apply_snapshot) and
//! [`apply_delta`](OrderbookManager::apply_delta) sees the book exactly as the
//! update left it, and no later update can overtake it.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::types::{BookUpdate, Nonce, Price};

use super::book::OrderBook;
use super::side::PriceLevel;
use super::sync::{BookSync, SyncOutcome, SyncProfile, SyncState};

/// Manager for multiple order books.
///
/// # Thread Safety
///
/// The manager is safe to share across threads via `Arc<OrderbookManager>`.
/// Readers receive cloned books and never hold a lock across an await.
///
/// # Example
///
/// ```rust
/// use ws_orderbook::orderbook::{OrderbookManager, SequencePolicy, SyncProfile, SyncState};
///
/// let manager = OrderbookManager::new(SyncProfile::fetch(SequencePolicy::Strict));
/// manager.add_market("BTC/USDT");
///
/// assert_eq!(manager.get_state("BTC/USDT"), Some(SyncState::AwaitingSnapshot));
/// ```
#[derive(Debug)]
pub struct OrderbookManager {
    /// Books by symbol
    books: RwLock<FxHashMap<String, RwLock<BookSync>>>,
    profile: SyncProfile,
    depth: Option<usize>,
    max_buffered: usize,
}

impl OrderbookManager {
    /// Default bound on deltas buffered while waiting for a snapshot
    pub const DEFAULT_MAX_BUFFERED: usize = 1000;

    /// Create a new manager for books following `profile`
    pub fn new(profile: SyncProfile) -> Self {
        Self {
            books: RwLock::new(FxHashMap::default()),
            profile,
            depth: None,
            max_buffered: Self::DEFAULT_MAX_BUFFERED,
        }
    }

    /// Keep at most `depth` levels per side in every book
    #[must_use]
    pub fn with_depth(mut self, depth: Option<usize>) -> Self {
        self.depth = depth;
        self
    }

    /// Bound the delta buffer of every book
    #[must_use]
    pub fn with_max_buffered(mut self, max_buffered: usize) -> Self {
        self.max_buffered = max_buffered;
        self
    }

    /// Synchronization profile shared by all books
    pub fn profile(&self) -> &SyncProfile {
        &self.profile
    }

    /// Add a market to track
    ///
    /// Creates an empty book in `AwaitingSnapshot` state. Returns `false` if
    /// the market was already tracked.
    pub fn add_market(&self, symbol: impl Into<String>) -> bool {
        let symbol = symbol.into();
        let mut books = self.books.write();
        if books.contains_key(&symbol) {
            return false;
        }
        let sync = BookSync::new(symbol.clone(), self.depth, self.profile, self.max_buffered);
        books.insert(symbol, RwLock::new(sync));
        true
    }

    /// Remove a market from tracking
    ///
    /// Returns `true` if the market was tracked.
    pub fn remove_market(&self, symbol: &str) -> bool {
        let removed = self.books.write().remove(symbol);
        match removed {
            Some(entry) => {
                entry.write().close();
                true
            }
            None => false,
        }
    }

    /// Check if a market is tracked
    pub fn contains(&self, symbol: &str) -> bool {
        self.books.read().contains_key(symbol)
    }

    /// Get the state of an orderbook
    pub fn get_state(&self, symbol: &str) -> Option<SyncState> {
        let books = self.books.read();
        books.get(symbol).map(|e| e.read().state())
    }

    /// Get all markets waiting for a snapshot
    pub fn markets_needing_resync(&self) -> Vec<String> {
        let books = self.books.read();
        books
            .iter()
            .filter(|(_, entry)| entry.read().state().needs_snapshot())
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    /// Get a copy of an orderbook, whatever its state
    ///
    /// Returns a cloned copy for safe reading without holding locks.
    pub fn get_orderbook(&self, symbol: &str) -> Option<OrderBook> {
        let books = self.books.read();
        books.get(symbol).map(|e| e.read().book().clone())
    }

    /// Get a copy of an orderbook only if it is in sync
    pub fn live_orderbook(&self, symbol: &str) -> Option<OrderBook> {
        let books = self.books.read();
        books.get(symbol).and_then(|e| {
            let entry = e.read();
            entry.state().is_live().then(|| entry.book().clone())
        })
    }

    /// Get the nonce of a market's book
    pub fn nonce(&self, symbol: &str) -> Option<Nonce> {
        let books = self.books.read();
        books.get(symbol).and_then(|e| e.read().book().nonce())
    }

    /// Get best bid for a market
    pub fn best_bid(&self, symbol: &str) -> Option<PriceLevel> {
        self.read_live(symbol, OrderBook::best_bid)
    }

    /// Get best ask for a market
    pub fn best_ask(&self, symbol: &str) -> Option<PriceLevel> {
        self.read_live(symbol, OrderBook::best_ask)
    }

    /// Get mid price for a market
    pub fn mid_price(&self, symbol: &str) -> Option<Price> {
        self.read_live(symbol, OrderBook::mid_price)
    }

    /// Get spread for a market
    pub fn spread(&self, symbol: &str) -> Option<Price> {
        self.read_live(symbol, OrderBook::spread)
    }

    fn read_live<T>(&self, symbol: &str, f: impl FnOnce(&OrderBook) -> Option<T>) -> Option<T> {
        let books = self.books.read();
        books.get(symbol).and_then(|e| {
            let entry = e.read();
            if entry.state().is_live() {
                f(entry.book())
            } else {
                None
            }
        })
    }

    /// Apply a snapshot
    ///
    /// `publish` runs under the entry's write lock when the book changed.
    /// Returns `None` if the market is not tracked (the book was dropped
    /// before the snapshot arrived).
    pub fn apply_snapshot(
        &self,
        snapshot: &BookUpdate,
        publish: impl FnOnce(&OrderBook),
    ) -> Option<SyncOutcome> {
        self.apply(snapshot, publish, BookSync::on_snapshot)
    }

    /// Apply a delta
    ///
    /// `publish` runs under the entry's write lock when the book changed.
    /// Returns `None` if the market is not tracked.
    pub fn apply_delta(
        &self,
        delta: &BookUpdate,
        publish: impl FnOnce(&OrderBook),
    ) -> Option<SyncOutcome> {
        self.apply(delta, publish, BookSync::on_delta)
    }

    fn apply(
        &self,
        update: &BookUpdate,
        publish: impl FnOnce(&OrderBook),
        step: fn(&mut BookSync, &BookUpdate) -> SyncOutcome,
    ) -> Option<SyncOutcome> {
        let books = self.books.read();
        let Some(entry) = books.get(&update.symbol) else {
            debug!(symbol = %update.symbol, "update for untracked market");
            return None;
        };

        let mut sync = entry.write();
        let outcome = step(&mut *sync, update);
        if outcome == SyncOutcome::Updated {
            publish(sync.book());
        }
        Some(outcome)
    }

    /// Discard every book, keeping the markets tracked
    pub fn invalidate_all(&self) {
        let books = self.books.read();
        for entry in books.values() {
            entry.write().invalidate();
        }
    }

    /// Clear all orderbooks
    pub fn clear(&self) {
        let mut books = self.books.write();
        for entry in books.values() {
            entry.write().close();
        }
        books.clear();
    }

    /// Get number of tracked markets
    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    /// Check if manager has no markets
    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }

    /// Get all tracked symbols
    pub fn symbols(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }
}
