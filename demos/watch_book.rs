//! Live order book demo - keeps a book in sync and prints the top of it
//!
//! Usage:
//!   cargo run --example watch_book
//!
//! Optional:
//!   EXCHANGE=okx        # binance (default), okx, or kraken
//!   SYMBOL=ETH/USDT     # unified symbol (default: BTC/USDT, BTC/USD on kraken)
//!   DEPTH=10            # levels printed per side (default: 5)
//!   RUST_LOG=ws_orderbook=debug

use std::sync::Arc;

use ws_orderbook::client::StreamClient;
use ws_orderbook::exchange::{Binance, Kraken, Okx, Protocol};
use ws_orderbook::orderbook::OrderBook;
use ws_orderbook::{Config, DisconnectPolicy};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ws_orderbook=info".parse()?),
        )
        .init();

    let exchange = std::env::var("EXCHANGE").unwrap_or_else(|_| "binance".to_string());
    let (protocol, default_symbol): (Arc<dyn Protocol>, &str) = match exchange.as_str() {
        "binance" => (Arc::new(Binance::new()), "BTC/USDT"),
        "okx" => (Arc::new(Okx::new()), "BTC/USDT"),
        "kraken" => (Arc::new(Kraken::new()), "BTC/USD"),
        other => return Err(format!("unknown exchange {other}").into()),
    };
    let symbol = std::env::var("SYMBOL").unwrap_or_else(|_| default_symbol.to_string());
    let depth = std::env::var("DEPTH")
        .ok()
        .and_then(|d| d.parse().ok())
        .unwrap_or(5);

    println!("=== {exchange} {symbol} ===\n");

    let config = Config::new().with_disconnect_policy(DisconnectPolicy::Resubscribe);
    let client = StreamClient::new(Arc::clone(&protocol), config)?;

    let runner = client.clone();
    let url = protocol.ws_url().to_string();
    let connection = tokio::spawn(async move { runner.run(&url).await });

    let mut updates = 0u64;
    let start_time = std::time::Instant::now();

    loop {
        tokio::select! {
            book = client.watch_order_book(&symbol, Some(depth)) => {
                updates += 1;
                print_book(&book?);

                if updates % 50 == 0 {
                    let elapsed = start_time.elapsed().as_secs_f64();
                    println!(
                        "--- {} updates in {:.1}s ({:.1}/s) ---\n",
                        updates,
                        elapsed,
                        updates as f64 / elapsed
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                break;
            }
        }
    }

    client.un_watch_order_book(&symbol).await?;
    client.shutdown();
    connection.await??;
    Ok(())
}

fn print_book(book: &OrderBook) {
    println!(
        "{} | nonce {:?} | {}",
        book.symbol(),
        book.nonce(),
        book.datetime().unwrap_or("-")
    );
    for level in book.asks().iter().collect::<Vec<_>>().iter().rev() {
        println!("    ask {:>14} {:>14}", level.price, level.amount);
    }
    for level in book.bids().iter() {
        println!("    bid {:>14} {:>14}", level.price, level.amount);
    }
    if let (Some(mid), Some(spread)) = (book.mid_price(), book.spread()) {
        println!("    mid {mid} spread {spread}");
    }
    println!();
}
