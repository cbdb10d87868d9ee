//! Exchange adapter boundary
//!
//! Adapters translate one exchange's streaming dialect into normalized
//! events. Everything they share lives here: construction options, the
//! market metadata cache, per-topic bookkeeping and the capability
//! contract the core consumes.

pub mod binance;
pub mod huobi;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{ExchangeError, Result};
use crate::event::EventSender;
use crate::types::{KLineInterval, Market};
use crate::websocket::ReconnectPolicy;

/// Adapter construction options. Empty hosts fall back to the
/// exchange's production endpoints.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub ws_host: String,
    pub rest_host: String,
    pub access_key: String,
    pub secret_key: String,
    pub auto_reconnect: bool,
    pub read_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
    /// Markets the adapter may subscribe to; seeded at construction.
    pub markets: Vec<Market>,
}

/// Capability contract every streaming adapter implements. Each
/// subscribe call returns the topic string usable with `unsubscribe`.
/// Kinds an exchange does not stream default to `NotImplemented`.
#[async_trait]
pub trait StreamExchange: Send + Sync {
    async fn subscribe_order_book(
        &self,
        symbol: &str,
        level: usize,
        incremental: bool,
        queue: EventSender,
    ) -> Result<String>;

    async fn subscribe_ticker(&self, symbol: &str, queue: EventSender) -> Result<String>;

    async fn subscribe_trades(&self, symbol: &str, queue: EventSender) -> Result<String>;

    async fn subscribe_kline(
        &self,
        symbol: &str,
        interval: KLineInterval,
        queue: EventSender,
    ) -> Result<String>;

    async fn subscribe_balance(&self, _queue: EventSender) -> Result<String> {
        Err(ExchangeError::NotImplemented)
    }

    async fn subscribe_order(&self, _symbol: &str, _queue: EventSender) -> Result<String> {
        Err(ExchangeError::NotImplemented)
    }

    async fn subscribe_positions(&self, _symbol: &str, _queue: EventSender) -> Result<String> {
        Err(ExchangeError::NotImplemented)
    }

    async fn subscribe_mark_price(&self, _symbol: &str, _queue: EventSender) -> Result<String> {
        Err(ExchangeError::NotImplemented)
    }

    async fn unsubscribe(&self, topic: &str, queue: &EventSender) -> Result<()>;
}

/// Read-mostly market metadata cache: many concurrent lookups during
/// message parsing, wholesale replacement under the write lock during
/// teardown.
#[derive(Default)]
pub struct MarketRegistry {
    markets: RwLock<Vec<Market>>,
}

impl MarketRegistry {
    pub fn new(markets: Vec<Market>) -> Self {
        Self {
            markets: RwLock::new(markets),
        }
    }

    /// Look up by unified symbol, e.g. "BTC/USDT". Case-insensitive.
    pub async fn by_symbol(&self, symbol: &str) -> Result<Market> {
        let symbol = symbol.to_uppercase();
        self.markets
            .read()
            .await
            .iter()
            .find(|m| m.symbol.to_uppercase() == symbol)
            .cloned()
            .ok_or(ExchangeError::MarketNotFound(symbol))
    }

    /// Look up by the exchange-native identifier, e.g. "btcusdt".
    pub async fn by_id(&self, symbol_id: &str) -> Result<Market> {
        let symbol_id = symbol_id.to_uppercase();
        self.markets
            .read()
            .await
            .iter()
            .find(|m| m.symbol_id.to_uppercase() == symbol_id)
            .cloned()
            .ok_or(ExchangeError::MarketNotFound(symbol_id))
    }

    /// Replace the whole cache.
    pub async fn replace(&self, markets: Vec<Market>) {
        *self.markets.write().await = markets;
    }
}

/// What one subscribed topic means: which symbol, which event kind.
#[derive(Debug, Clone)]
pub(crate) struct SubTopic {
    pub symbol: String,
    pub kind: SubKind,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubKind {
    OrderBookRefresh,
    OrderBookIncremental,
    Ticker,
    Trade,
    KLine(KLineInterval),
    Balance,
    Order,
    MarkPrice,
}

/// Topic registry shared between an adapter and its message handler.
#[derive(Default)]
pub(crate) struct TopicTable {
    topics: std::sync::Mutex<HashMap<String, SubTopic>>,
}

impl TopicTable {
    pub fn insert(&self, topic: &str, sub: SubTopic) {
        self.topics
            .lock()
            .expect("topic lock")
            .insert(topic.to_string(), sub);
    }

    pub fn get(&self, topic: &str) -> Option<SubTopic> {
        self.topics.lock().expect("topic lock").get(topic).cloned()
    }

    pub fn remove(&self, topic: &str) -> Option<SubTopic> {
        self.topics.lock().expect("topic lock").remove(topic)
    }
}

/// Convenience alias used by binaries that pick the adapter at runtime.
pub type DynExchange = Arc<dyn StreamExchange>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc() -> Market {
        Market {
            symbol: "BTC/USDT".to_string(),
            symbol_id: "btcusdt".to_string(),
            base: "BTC".to_string(),
            quote: "USDT".to_string(),
            price_precision: 2,
            amount_precision: 6,
            min_amount: dec!(0.0001),
        }
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let registry = MarketRegistry::new(vec![btc()]);
        assert!(registry.by_symbol("btc/usdt").await.is_ok());
        assert!(registry.by_id("BTCUSDT").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_market() {
        let registry = MarketRegistry::new(vec![btc()]);
        let err = registry.by_symbol("DOGE/USDT").await.unwrap_err();
        assert!(matches!(err, ExchangeError::MarketNotFound(_)));
    }

    #[tokio::test]
    async fn test_replace_swaps_wholesale() {
        let registry = MarketRegistry::new(vec![btc()]);
        registry.replace(Vec::new()).await;
        assert!(registry.by_symbol("BTC/USDT").await.is_err());
    }
}
