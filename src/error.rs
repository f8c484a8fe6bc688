//! Error types for the ws-orderbook crate.
//!
//! This module defines the errors that can occur while streaming market data:
//! transport and REST failures, malformed payloads, exchange-side rejections
//! and order book desynchronization.

use std::sync::Arc;

use thiserror::Error;

/// The main error type for this crate
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration (missing fields, bad format)
    #[error("Configuration error: {0}")]
    Config(String),

    /// REST endpoint returned a non-success status
    #[error("API error ({}): {}", .0.status, .0.message)]
    Api(ApiError),

    /// Exchange sent an error frame for a request
    #[error("Exchange error{}: {message}", fmt_code(.code))]
    Exchange {
        /// Vendor error code, if any
        code: Option<String>,
        /// Human readable message
        message: String,
    },

    /// Exchange refused a subscribe request
    #[error("Subscription {subscription} rejected: {reason}")]
    SubscriptionRejected {
        /// Subscription hash of the rejected request
        subscription: String,
        /// Reason given by the exchange
        reason: String,
    },

    /// REST endpoint rate limit exceeded
    #[error("Rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited {
        /// Milliseconds to wait before retrying (if provided)
        retry_after_ms: Option<u64>,
    },

    /// WebSocket connection closed unexpectedly
    #[error("WebSocket connection closed")]
    ConnectionClosed,

    /// The caller unsubscribed while a watch was pending
    #[error("Unsubscribed from {0}")]
    Unsubscribed(String),

    /// Orderbook sequence gap detected (missed messages)
    #[error("Sequence gap on {symbol}: expected {expected}, got {got}")]
    SequenceGap {
        /// Market symbol
        symbol: String,
        /// Expected sequence number
        expected: u64,
        /// Actual sequence number received
        got: u64,
    },

    /// Local checksum did not match the exchange checksum
    #[error("Checksum mismatch on {symbol}: local {local}, remote {remote}")]
    ChecksumMismatch {
        /// Market symbol
        symbol: String,
        /// Checksum computed over the local book
        local: i64,
        /// Checksum sent by the exchange
        remote: i64,
    },

    /// Message could not be mapped onto a known shape
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Feature not offered by the exchange protocol
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Invalid market symbol
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Error fanned out to several waiters
    #[error(transparent)]
    Shared(Arc<Error>),
}

/// Error returned by a REST endpoint
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Error message (response body)
    pub message: String,
}

fn fmt_code(code: &Option<String>) -> String {
    code.as_ref().map(|c| format!(" [{c}]")).unwrap_or_default()
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

impl Error {
    /// Unwrap a shared error to the root cause, for matching
    pub fn root(&self) -> &Error {
        match self {
            Error::Shared(inner) => inner.root(),
            other => other,
        }
    }

    /// Whether the engine recovers from this error on its own
    ///
    /// Desync errors trigger a resync and never reach a waiter.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            Error::SequenceGap { .. } | Error::ChecksumMismatch { .. }
        )
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Config(format!("invalid URL: {}", err))
    }
}
