//! Normalized domain entities shared by all exchange adapters
//!
//! Every adapter translates its exchange's wire shapes into these types
//! before anything is handed to a delivery queue.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One tradable market and the metadata needed to build topics and
/// round prices for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Market {
    /// Unified symbol, e.g. "BTC/USDT"
    pub symbol: String,
    /// Exchange-native identifier, e.g. "btcusdt" or "BTCUSDT"
    pub symbol_id: String,
    pub base: String,
    pub quote: String,
    pub price_precision: u32,
    pub amount_precision: u32,
    pub min_amount: Decimal,
}

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// 24h rolling ticker for one symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub timestamp: u64,
    pub open: Decimal,
    pub last: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
    pub best_bid: Option<Decimal>,
    pub best_bid_size: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub best_ask_size: Option<Decimal>,
}

/// A single public trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub timestamp: u64,
    pub price: Decimal,
    pub amount: Decimal,
    pub side: TradeSide,
}

/// Candlestick interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KLineInterval {
    Min1,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour4,
    Day1,
    Week1,
}

/// One candlestick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KLine {
    pub symbol: String,
    pub timestamp: u64,
    pub interval: KLineInterval,
    pub open: Decimal,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
}

/// Funds held in one asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub available: Decimal,
    pub frozen: Decimal,
}

/// Push update covering one or more assets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub timestamp: u64,
    pub balances: HashMap<String, Balance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    Ioc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Unknown,
}

/// Normalized order state as pushed on private channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_id: String,
    pub symbol: String,
    pub price: Decimal,
    pub amount: Decimal,
    pub filled: Decimal,
    pub cost: Decimal,
    pub side: TradeSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub create_time: u64,
    pub transaction_time: u64,
}

/// Open derivative position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: TradeSide,
    pub amount: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: Decimal,
    pub timestamp: u64,
}

/// Mark price push for a derivative symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkPrice {
    pub symbol: String,
    pub mark_price: Decimal,
    pub index_price: Option<Decimal>,
    pub funding_rate: Option<Decimal>,
    pub timestamp: u64,
}

impl KLineInterval {
    /// Interval length in seconds.
    pub fn secs(&self) -> u64 {
        match self {
            KLineInterval::Min1 => 60,
            KLineInterval::Min5 => 300,
            KLineInterval::Min15 => 900,
            KLineInterval::Min30 => 1800,
            KLineInterval::Hour1 => 3600,
            KLineInterval::Hour4 => 14400,
            KLineInterval::Day1 => 86400,
            KLineInterval::Week1 => 604800,
        }
    }
}
