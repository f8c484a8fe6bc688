//! Public trade records.

use serde::{Deserialize, Serialize};

use super::{Amount, Price, TimestampMs};

/// Aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Taker bought
    Buy,
    /// Taker sold
    Sell,
}

impl TradeSide {
    /// Get the opposite side
    pub fn opposite(self) -> Self {
        match self {
            TradeSide::Buy => TradeSide::Sell,
            TradeSide::Sell => TradeSide::Buy,
        }
    }
}

/// A public trade in unified form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Exchange trade id
    pub id: Option<String>,
    /// Unified market symbol
    pub symbol: String,
    /// Execution price
    pub price: Price,
    /// Executed amount
    pub amount: Amount,
    /// Aggressor side, when the exchange reports it
    pub side: Option<TradeSide>,
    /// Exchange timestamp in milliseconds
    pub timestamp: Option<TimestampMs>,
    /// ISO-8601 rendering of `timestamp`
    pub datetime: Option<String>,
}
