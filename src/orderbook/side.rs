//! One side of an order book.
//!
//! This implementation uses `BTreeMap` for sorted price levels, providing:
//!
//! - O(log n) insertion, deletion, and lookup
//! - O(1) access to the best level (via `first_key_value` / `last_key_value`)
//! - O(k) top-k extraction in canonical order

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::Error;
use crate::types::{Amount, Price, RawLevel};

/// Which side of the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy orders, best = highest price
    Bids,
    /// Sell orders, best = lowest price
    Asks,
}

/// A price level in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceLevel {
    /// Level price
    pub price: Price,
    /// Total size resting at `price`
    pub amount: Amount,
}

impl PriceLevel {
    /// Create a new price level
    pub fn new(price: Price, amount: Amount) -> Self {
        Self { price, amount }
    }
}

impl From<(Price, Amount)> for PriceLevel {
    fn from((price, amount): (Price, Amount)) -> Self {
        Self { price, amount }
    }
}

/// Price-indexed levels for one side of a book.
///
/// Levels are stored ascending by price; bids are read back to front. The map
/// key guarantees at most one entry per price.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSide {
    side: Side,
    levels: BTreeMap<Price, Amount>,
}

impl BookSide {
    /// Create an empty side
    #[must_use]
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    /// Which side this is
    #[must_use]
    pub const fn side(&self) -> Side {
        self.side
    }

    /// Set a price level. Zero size removes the level (no-op if absent).
    pub fn set(&mut self, price: Price, amount: Amount) {
        if amount.is_zero() {
            self.levels.remove(&price);
        } else {
            self.levels.insert(price, amount);
        }
    }

    /// Store a raw `[price, size, ...]` level
    ///
    /// Extra trailing fields (order counts, ids) are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if price or size is missing, non-numeric,
    /// or negative. The side is left untouched in that case.
    pub fn store_raw(&mut self, level: &[Value]) -> Result<(), Error> {
        let (price, amount) = match level {
            [price, amount, ..] => (parse_decimal(price), parse_decimal(amount)),
            _ => (None, None),
        };

        match (price, amount) {
            (Some(price), Some(amount))
                if price.is_sign_positive() && amount.is_sign_positive() =>
            {
                self.set(price, amount);
                Ok(())
            }
            _ => Err(Error::Malformed(format!("price level {:?}", level))),
        }
    }

    /// Apply a batch of raw levels
    ///
    /// Malformed levels are skipped and the rest of the batch is applied.
    /// Returns the number of skipped levels.
    pub fn apply_raw(&mut self, levels: &[RawLevel]) -> usize {
        let mut rejected = 0;
        for level in levels {
            if let Err(e) = self.store_raw(level) {
                warn!(side = ?self.side, error = %e, "dropping price level");
                rejected += 1;
            }
        }
        rejected
    }

    /// Iterate levels in canonical order (best first)
    pub fn iter(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        let (ascending, descending) = match self.side {
            Side::Asks => (Some(self.levels.iter()), None),
            Side::Bids => (None, Some(self.levels.iter().rev())),
        };
        ascending
            .into_iter()
            .flatten()
            .chain(descending.into_iter().flatten())
            .map(|(&p, &a)| PriceLevel::new(p, a))
    }

    /// Get the top N levels in canonical order
    #[must_use]
    pub fn top(&self, n: usize) -> Vec<PriceLevel> {
        self.iter().take(n).collect()
    }

    /// Get the best level
    #[must_use]
    pub fn best(&self) -> Option<PriceLevel> {
        let best = match self.side {
            Side::Bids => self.levels.last_key_value(),
            Side::Asks => self.levels.first_key_value(),
        };
        best.map(|(&p, &a)| PriceLevel::new(p, a))
    }

    /// Size resting at `price`
    #[must_use]
    pub fn get(&self, price: &Price) -> Option<Amount> {
        self.levels.get(price).copied()
    }

    /// Drop every level beyond the best `depth`
    pub fn truncate(&mut self, depth: usize) {
        while self.levels.len() > depth {
            match self.side {
                Side::Bids => self.levels.pop_first(),
                Side::Asks => self.levels.pop_last(),
            };
        }
    }

    /// Total size on this side
    #[must_use]
    pub fn total_amount(&self) -> Amount {
        self.levels.values().sum()
    }

    /// Number of price levels
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Check if the side has no levels
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Remove all levels
    pub fn clear(&mut self) {
        self.levels.clear();
    }
}

/// Parse a JSON string or number into a decimal
///
/// Accepts plain and scientific notation (`"1e-8"`).
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_decimal_str(s.trim()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else if let Some(u) = n.as_u64() {
                Some(Decimal::from(u))
            } else {
                parse_decimal_str(&n.to_string())
            }
        }
        _ => None,
    }
}

fn parse_decimal_str(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
}
