//! Crossfeed - Exchange Streaming Library
//!
//! This crate connects to cryptocurrency exchange WebSocket streams,
//! reconciles sequence-numbered order book feeds, and fans typed domain
//! events out to subscriber queues over shared connections.

pub mod config;
pub mod error;
pub mod event;
pub mod exchange;
pub mod metrics;
pub mod orderbook;
pub mod types;
pub mod websocket;

pub use config::Config;
pub use error::{ExchangeError, Result};
pub use event::{event_channel, Event, EventReceiver, EventSender};
pub use exchange::{binance::BinanceStream, huobi::HuobiStream};
pub use exchange::{DynExchange, MarketRegistry, Options, StreamExchange};
pub use orderbook::{DepthReconciler, OrderBook, Reconciled};
pub use types::{KLine, KLineInterval, Market, Ticker, Trade, TradeSide};
pub use websocket::{ConnState, ConnectOptions, Connection, ConnectionManager, ReconnectPolicy};
