//! Crossfeed - Exchange Streaming Daemon
//!
//! Subscribes to order books and trades for the configured symbols,
//! logs the normalized event stream, and serves health and metrics
//! endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Json, Router};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crossfeed::{
    event_channel, BinanceStream, Config, DynExchange, Event, EventReceiver, HuobiStream, Market,
    Options,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Crossfeed");

    // Load configuration
    let config = Arc::new(Config::load()?);
    info!(exchange = %config.exchange, symbols = ?config.symbols, "Configuration loaded");

    let options = Options {
        ws_host: config.ws_endpoint.clone(),
        rest_host: config.rest_endpoint.clone(),
        access_key: config.access_key.clone(),
        secret_key: config.secret_key.clone(),
        auto_reconnect: true,
        read_timeout: Some(Duration::from_secs(config.read_timeout_secs)),
        reconnect: config.reconnect_policy(),
        markets: markets_for(&config.symbols),
    };

    let exchange: DynExchange = match config.exchange.as_str() {
        "huobi" => Arc::new(HuobiStream::new(options)),
        "binance" => Arc::new(BinanceStream::new(options)),
        other => anyhow::bail!("unknown exchange: {}", other),
    };

    // Start health check server
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_port).await {
            warn!(error = %e, "Health server error");
        }
    });

    // One delivery queue for everything this binary consumes
    let (tx, rx) = event_channel();
    for symbol in &config.symbols {
        let topic = exchange
            .subscribe_order_book(symbol, config.depth_levels, config.incremental, tx.clone())
            .await?;
        info!(symbol = %symbol, topic = %topic, "order book subscribed");

        let topic = exchange.subscribe_trades(symbol, tx.clone()).await?;
        info!(symbol = %symbol, topic = %topic, "trades subscribed");
    }

    drain(rx).await;
    Ok(())
}

fn markets_for(symbols: &[String]) -> Vec<Market> {
    symbols
        .iter()
        .filter_map(|symbol| {
            let (base, quote) = symbol.split_once('/')?;
            Some(Market {
                symbol: symbol.clone(),
                symbol_id: format!("{}{}", base, quote),
                base: base.to_string(),
                quote: quote.to_string(),
                ..Market::default()
            })
        })
        .collect()
}

/// Log the normalized stream until every producer is gone.
async fn drain(mut rx: EventReceiver) {
    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderBook(Ok(book)) => {
                info!(
                    symbol = %book.symbol,
                    seq = book.seq,
                    bids = book.bids.len(),
                    asks = book.asks.len(),
                    "book"
                );
            }
            Event::OrderBook(Err(err)) => {
                warn!(symbol = ?err.symbol(), error = %err, "book corrupted");
            }
            Event::Trade(trade) => {
                info!(
                    symbol = %trade.symbol,
                    price = %trade.price,
                    amount = %trade.amount,
                    side = ?trade.side,
                    "trade"
                );
            }
            Event::Reconnected => {
                // subscriptions died with the old socket; a long-running
                // consumer would resubscribe here
                warn!("reconnected, subscriptions must be renewed");
            }
            Event::Disconnected => warn!("disconnected"),
            Event::Closed => {
                warn!("connection closed");
                return;
            }
            Event::Error(err) => warn!(code = err.code(), error = %err, "stream error"),
            other => info!(kind = other.kind(), "event"),
        }
    }
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(port: u16) -> anyhow::Result<()> {
    use std::net::SocketAddr;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "crossfeed",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics() -> String {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
