//! # ws-orderbook
//!
//! Exchange-agnostic WebSocket order book synchronization.
//!
//! ## Features
//!
//! - **Snapshot/delta sync** - Books built from a snapshot plus incremental
//!   updates, with gap detection and automatic resync
//! - **Checksums** - CRC32 verification against exchange checksums
//! - **Fan-out** - Any number of watchers share one subscription
//! - **Reconnect** - Exponential backoff with subscription replay
//! - **Async/Await** - Built on Tokio
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ws_orderbook::client::StreamClient;
//! use ws_orderbook::exchange::{Binance, Protocol};
//! use ws_orderbook::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ws_orderbook::Error> {
//!     let binance = Arc::new(Binance::new());
//!     let url = binance.ws_url().to_string();
//!     let client = StreamClient::new(binance, Config::default())?;
//!
//!     let runner = client.clone();
//!     tokio::spawn(async move { runner.run(&url).await });
//!
//!     loop {
//!         let book = client.watch_order_book("BTC/USDT", Some(10)).await?;
//!         println!("{:?} / {:?}", book.best_bid(), book.best_ask());
//!     }
//! }
//! ```
//!
//! ## Price Representation
//!
//! Prices and sizes are [`rust_decimal::Decimal`], parsed from the exchange's
//! strings or numbers without going through floating point. Checksums are
//! computed over the same text the exchange sent.
//!
//! ## Architecture
//!
//! This crate is organized into several modules:
//!
//! - [`client`] - Stream client, multiplexer, WebSocket and REST transports
//! - [`exchange`] - Per-exchange protocols
//! - [`orderbook`] - Book sides, books, and the synchronizer
//! - [`cache`] - Bounded trade cache
//! - [`types`] - Unified message types
//! - [`config`] - Client configuration
//! - [`error`] - Error types for the crate
//!
//! ## Performance
//!
//! - `FxHashMap` for faster hashing of small keys
//! - `parking_lot` locks (faster than std)
//! - `BTreeMap` for sorted price levels
//! - Books are cloned only when someone is waiting for them

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod orderbook;
pub mod types;

// Re-export main types at crate root for convenience
pub use client::StreamClient;
pub use config::{Config, DisconnectPolicy};
pub use error::Error;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;
