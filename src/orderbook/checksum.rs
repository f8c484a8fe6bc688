//! CRC32 checksums over the top of a book.
//!
//! Exchanges that publish a checksum compute it over a fixed text rendering
//! of their best levels. Two renderings cover the feeds we support:
//!
//! - [`ChecksumLayout::Interleaved`]: `bid_px:bid_sz:ask_px:ask_sz:...` level
//!   by level, compared as a signed 32-bit integer
//! - [`ChecksumLayout::Concatenated`]: asks then bids, each level as price and
//!   size with the decimal point and leading zeros stripped, compared unsigned

use crate::types::Price;

use super::book::OrderBook;
use super::side::PriceLevel;

/// Text rendering fed to CRC32
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumLayout {
    /// Bid and ask of each depth joined by `:`
    Interleaved,
    /// All asks then all bids, digits only
    Concatenated,
}

/// How a protocol checksums its book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumFormat {
    /// Rendering
    pub layout: ChecksumLayout,
    /// Levels per side included
    pub depth: usize,
    /// Whether the exchange sends the CRC as a signed 32-bit integer
    pub signed: bool,
}

impl ChecksumFormat {
    /// Interleaved rendering, signed comparison
    pub const fn interleaved(depth: usize) -> Self {
        Self {
            layout: ChecksumLayout::Interleaved,
            depth,
            signed: true,
        }
    }

    /// Concatenated rendering, unsigned comparison
    pub const fn concatenated(depth: usize) -> Self {
        Self {
            layout: ChecksumLayout::Concatenated,
            depth,
            signed: false,
        }
    }

    /// Text the CRC is computed over
    pub fn payload(&self, book: &OrderBook) -> String {
        let bids = book.top_bids(self.depth);
        let asks = book.top_asks(self.depth);

        match self.layout {
            ChecksumLayout::Interleaved => {
                let mut parts = Vec::with_capacity(self.depth * 4);
                for i in 0..self.depth {
                    if let Some(bid) = bids.get(i) {
                        parts.push(bid.price.to_string());
                        parts.push(bid.amount.to_string());
                    }
                    if let Some(ask) = asks.get(i) {
                        parts.push(ask.price.to_string());
                        parts.push(ask.amount.to_string());
                    }
                }
                parts.join(":")
            }
            ChecksumLayout::Concatenated => asks
                .iter()
                .chain(bids.iter())
                .map(|PriceLevel { price, amount }| digits(price) + &digits(amount))
                .collect(),
        }
    }

    /// Checksum of the book in the exchange's representation
    pub fn compute(&self, book: &OrderBook) -> i64 {
        let crc = crc32fast::hash(self.payload(book).as_bytes());
        if self.signed {
            i64::from(crc as i32)
        } else {
            i64::from(crc)
        }
    }

    /// Compare against the exchange checksum
    ///
    /// # Errors
    ///
    /// Returns the local checksum on mismatch.
    pub fn verify(&self, book: &OrderBook, remote: i64) -> Result<(), i64> {
        let local = self.compute(book);
        if local == remote {
            Ok(())
        } else {
            Err(local)
        }
    }
}

fn digits(value: &Price) -> String {
    let text = value.to_string().replace('.', "");
    let trimmed = text.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
