//! HTTP client for order book snapshots.
//!
//! Feeds that only stream deltas need a starting point fetched over REST.
//! The engine asks a [`SnapshotFetcher`] for it; [`RestClient`] is the
//! `reqwest` implementation that builds the request from the protocol's
//! [`snapshot_request`](crate::exchange::Protocol::snapshot_request).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ws_orderbook::client::{RestClient, SnapshotFetcher};
//! use ws_orderbook::exchange::Binance;
//! use ws_orderbook::Config;
//!
//! # async fn example() -> ws_orderbook::Result<()> {
//! let rest = RestClient::new(Arc::new(Binance::new()), &Config::default())?;
//! let snapshot = rest.fetch_order_book_snapshot("BTC/USDT", Some(100)).await?;
//! println!("snapshot at {:?}", snapshot.nonce);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{ApiError, Error};
use crate::exchange::Protocol;
use crate::types::BookUpdate;
use crate::Result;

/// Source of full order book snapshots
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Fetch a snapshot of `symbol`, `limit` levels per side if given
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if the exchange has no snapshot
    /// endpoint, or the transport/API error of the request.
    async fn fetch_order_book_snapshot(
        &self,
        symbol: &str,
        limit: Option<usize>,
    ) -> Result<BookUpdate>;
}

/// HTTP client for public REST endpoints
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    protocol: Arc<dyn Protocol>,
}

impl RestClient {
    /// Create a new REST client
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(protocol: Arc<dyn Protocol>, config: &Config) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client, protocol })
    }

    /// Make a GET request and return the JSON body
    pub async fn get_json(&self, url: &str, query: &[(String, String)]) -> Result<Value> {
        let response = self.client.get(url).query(query).send().await?;
        self.handle_response(response).await
    }

    /// Handle the HTTP response, checking for errors
    async fn handle_response(&self, response: reqwest::Response) -> Result<Value> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000);

            return Err(Error::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(Error::from)
    }
}

#[async_trait]
impl SnapshotFetcher for RestClient {
    async fn fetch_order_book_snapshot(
        &self,
        symbol: &str,
        limit: Option<usize>,
    ) -> Result<BookUpdate> {
        let request = self.protocol.snapshot_request(symbol, limit).ok_or_else(|| {
            Error::NotSupported(format!(
                "{} has no order book snapshot endpoint",
                self.protocol.id()
            ))
        })?;

        debug!(symbol, url = %request.url, "fetching order book snapshot");
        let body = self.get_json(&request.url, &request.query).await?;
        self.protocol.parse_snapshot(symbol, &body)
    }
}

/// Map an error response onto [`Error::Api`]
///
/// Exchanges put the text under `msg`, `message`, or `error`; anything else
/// is kept verbatim.
fn api_error(status: u16, body: &str) -> Error {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            let text = ["msg", "message", "error"]
                .iter()
                .find_map(|key| json.get(*key).and_then(Value::as_str))?
                .to_string();
            Some(match json.get("code") {
                Some(code) if !code.is_null() => format!("{text} (code {code})"),
                _ => text,
            })
        })
        .unwrap_or_else(|| body.to_string());

    Error::Api(ApiError::new(status, message))
}
