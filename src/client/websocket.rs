//! WebSocket transport.
//!
//! [`WsTransport`] is a thin text-frame pipe over `tokio-tungstenite`:
//! protocol pings are answered as they are read, binary frames are skipped,
//! and a close frame ends the stream with [`Error::ConnectionClosed`].
//! Everything above the frame level lives in
//! [`StreamClient`](crate::client::StreamClient).
//!
//! # Example
//!
//! ```rust,no_run
//! use ws_orderbook::client::WsTransport;
//!
//! # async fn example() -> ws_orderbook::Result<()> {
//! let mut ws = WsTransport::connect("wss://ws.okx.com:8443/ws/v5/public").await?;
//! ws.send(r#"{"op":"subscribe","args":[{"channel":"books","instId":"BTC-USDT"}]}"#.to_string())
//!     .await?;
//!
//! while let Some(frame) = ws.next().await {
//!     println!("{}", frame?);
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One WebSocket connection carrying text frames
///
/// Not shareable between tasks; the stream client owns it inside its run
/// loop and feeds it through a channel.
#[derive(Debug)]
pub struct WsTransport {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    url: Url,
}

impl WsTransport {
    /// Open a connection
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for URLs that are not `ws://` or `wss://`,
    /// or the handshake error if the connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "expected a ws:// or wss:// URL, got {url}"
            )));
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (write, read) = ws_stream.split();
        debug!(%url, "websocket connected");

        Ok(Self { write, read, url })
    }

    /// URL this transport is connected to
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Send a text frame
    pub async fn send(&mut self, text: String) -> Result<()> {
        trace!(%text, "sending frame");
        self.write.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Receive the next text frame
    ///
    /// Pings are answered automatically.
    ///
    /// # Returns
    ///
    /// The next frame, or `None` if the stream ended.
    pub async fn next(&mut self) -> Option<Result<String>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.write.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "server closed the connection");
                    return Some(Err(Error::ConnectionClosed));
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    /// Close the connection
    pub async fn close(&mut self) -> Result<()> {
        self.write.close().await?;
        Ok(())
    }
}

/// Configuration for reconnection behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (0 = infinite)
    pub max_retries: u32,
    /// Initial delay between reconnection attempts
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnection attempts
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Create a new reconnect config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum retries (0 = infinite)
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay in milliseconds
    #[must_use]
    pub fn initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Set maximum delay in milliseconds
    #[must_use]
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Set backoff multiplier
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Whether `attempt` failed attempts exhaust the retry budget
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_retries > 0 && attempt >= self.max_retries
    }

    /// Calculate delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay_ms)
    }
}
