//! Connection layer.
//!
//! This module contains:
//!
//! - [`stream`] - The stream client that keeps books in sync
//! - [`multiplexer`] - Waiter fan-out and subscription records
//! - [`websocket`] - WebSocket transport and reconnect backoff
//! - [`rest`] - HTTP snapshot fetching

pub mod multiplexer;
pub mod rest;
pub mod stream;
pub mod websocket;

pub use multiplexer::{Multiplexer, Payload, Subscription, SubscriptionState};
pub use rest::{RestClient, SnapshotFetcher};
pub use stream::StreamClient;
pub use websocket::{ReconnectConfig, WsTransport};
