//! Local order books and their synchronization.
//!
//! - [`side`] - One price-indexed side of a book and the delta applier
//! - [`book`] - [`OrderBook`]: two sides plus nonce and timestamp
//! - [`checksum`] - CRC32 over the top levels
//! - [`sync`] - Snapshot/delta state machine per symbol
//! - [`manager`] - Thread-safe arena of books keyed by symbol
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use ws_orderbook::orderbook::{BookSync, SequencePolicy, SyncOutcome, SyncProfile};
//! use ws_orderbook::types::BookUpdate;
//!
//! let mut sync = BookSync::new("BTC/USDT", None, SyncProfile::fetch(SequencePolicy::Strict), 100);
//!
//! // deltas that arrive first are held back
//! let delta = BookUpdate::new("BTC/USDT").with_asks(json!([["101", "3"]])).with_nonce(6);
//! assert_eq!(sync.on_delta(&delta), SyncOutcome::Buffered);
//!
//! let snapshot = BookUpdate::new("BTC/USDT")
//!     .with_bids(json!([["100", "1"]]))
//!     .with_asks(json!([["101", "2"]]))
//!     .with_nonce(5);
//! assert_eq!(sync.on_snapshot(&snapshot), SyncOutcome::Updated);
//!
//! assert_eq!(sync.book().nonce(), Some(6));
//! if let Some(level) = sync.book().best_ask() {
//!     println!("Best ask: {} @ {}", level.amount, level.price);
//! }
//! ```

pub mod book;
pub mod checksum;
pub mod manager;
pub mod side;
pub mod sync;

pub use book::OrderBook;
pub use checksum::{ChecksumFormat, ChecksumLayout};
pub use manager::OrderbookManager;
pub use side::{BookSide, PriceLevel, Side};
pub use sync::{
    BookSync, ResyncReason, SequencePolicy, SnapshotSource, SyncOutcome, SyncProfile, SyncState,
};
