//! Core orderbook data structure.
//!
//! An [`OrderBook`] pairs two [`BookSide`]s with the metadata the
//! synchronizer needs: the nonce of the last accepted update and the
//! exchange timestamp.

use rust_decimal::Decimal;

use crate::types::{iso8601, parse8601, Amount, BookUpdate, Nonce, Price, TimestampMs};

use super::side::{BookSide, PriceLevel, Side};

/// Local order book for a single market.
///
/// # Thread Safety
///
/// This struct is `Send + Sync` but not internally synchronized. The
/// [`OrderbookManager`](super::OrderbookManager) wraps each book in a
/// `parking_lot::RwLock`; readers get clones.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBook {
    symbol: String,
    bids: BookSide,
    asks: BookSide,
    /// Exchange timestamp of the last accepted update
    timestamp: Option<TimestampMs>,
    datetime: Option<String>,
    /// Sequence of the last accepted update
    nonce: Option<Nonce>,
    /// Levels kept per side, `None` for unbounded
    depth: Option<usize>,
}

impl OrderBook {
    /// Create a new empty orderbook for the given market
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BookSide::new(Side::Bids),
            asks: BookSide::new(Side::Asks),
            timestamp: None,
            datetime: None,
            nonce: None,
            depth: None,
        }
    }

    /// Create an empty book that keeps at most `depth` levels per side
    #[must_use]
    pub fn with_depth(symbol: impl Into<String>, depth: Option<usize>) -> Self {
        let mut book = Self::new(symbol);
        book.depth = depth;
        book
    }

    /// Get the market symbol
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Sequence of the last accepted update
    #[must_use]
    pub const fn nonce(&self) -> Option<Nonce> {
        self.nonce
    }

    /// Exchange timestamp of the last accepted update
    #[must_use]
    pub const fn timestamp(&self) -> Option<TimestampMs> {
        self.timestamp
    }

    /// ISO-8601 datetime of the last accepted update
    #[must_use]
    pub fn datetime(&self) -> Option<&str> {
        self.datetime.as_deref()
    }

    /// Per-side depth limit
    #[must_use]
    pub const fn depth(&self) -> Option<usize> {
        self.depth
    }

    /// Bid side
    #[must_use]
    pub fn bids(&self) -> &BookSide {
        &self.bids
    }

    /// Ask side
    #[must_use]
    pub fn asks(&self) -> &BookSide {
        &self.asks
    }

    /// Mutable access to one side
    pub fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Bids => &mut self.bids,
            Side::Asks => &mut self.asks,
        }
    }

    /// Replace the whole book with a snapshot
    ///
    /// A snapshot without a timestamp keeps the previous one.
    /// Returns the number of malformed levels that were skipped.
    pub fn reset(&mut self, snapshot: &BookUpdate) -> usize {
        self.bids.clear();
        self.asks.clear();
        self.nonce = snapshot.nonce;
        self.apply_levels(snapshot)
    }

    /// Apply the levels of an update and take over its metadata
    ///
    /// Sequence validation is the synchronizer's job; this only mutates.
    /// Returns the number of malformed levels that were skipped.
    pub fn apply_levels(&mut self, update: &BookUpdate) -> usize {
        let rejected = self.bids.apply_raw(&update.bids) + self.asks.apply_raw(&update.asks);

        if let Some(nonce) = update.nonce {
            self.nonce = Some(nonce);
        }
        self.stamp(update);
        if let Some(depth) = self.depth {
            self.bids.truncate(depth);
            self.asks.truncate(depth);
        }
        rejected
    }

    fn stamp(&mut self, update: &BookUpdate) {
        let timestamp = update
            .timestamp
            .or_else(|| update.datetime.as_deref().and_then(parse8601));
        if let Some(ts) = timestamp {
            self.timestamp = Some(ts);
            self.datetime = update.datetime.clone().or_else(|| iso8601(ts));
        }
    }

    /// Copy of the book with at most `n` levels per side
    ///
    /// `None` returns a full copy.
    #[must_use]
    pub fn limit(&self, n: Option<usize>) -> OrderBook {
        let mut view = self.clone();
        if let Some(n) = n {
            view.bids.truncate(n);
            view.asks.truncate(n);
        }
        view
    }

    /// Get the best bid (highest price)
    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.best()
    }

    /// Get the best ask (lowest price)
    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.best()
    }

    /// Get the mid price
    ///
    /// Returns the average of best bid and best ask, or `None` if either is missing.
    #[must_use]
    pub fn mid_price(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// Get the spread
    #[must_use]
    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// Check if the book is crossed (best bid >= best ask)
    ///
    /// This shouldn't happen in a healthy market but is useful for validation.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }

    /// Get the top N bid levels
    #[must_use]
    pub fn top_bids(&self, n: usize) -> Vec<PriceLevel> {
        self.bids.top(n)
    }

    /// Get the top N ask levels
    #[must_use]
    pub fn top_asks(&self, n: usize) -> Vec<PriceLevel> {
        self.asks.top(n)
    }

    /// Get total bid quantity
    #[must_use]
    pub fn total_bid_quantity(&self) -> Amount {
        self.bids.total_amount()
    }

    /// Get total ask quantity
    #[must_use]
    pub fn total_ask_quantity(&self) -> Amount {
        self.asks.total_amount()
    }

    /// Clear the orderbook, forgetting its nonce and timestamp
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.nonce = None;
        self.timestamp = None;
        self.datetime = None;
    }

    /// Check if the orderbook is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Get the number of price levels
    #[must_use]
    pub fn num_levels(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new("")
    }
}
