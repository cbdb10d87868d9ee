//! Order book state and reconciliation
//!
//! Turns sequence-numbered snapshot / incremental push messages into a
//! consistent bid/ask view with explicit corruption detection.

mod book;
mod reconciler;

pub use book::Book;
pub use reconciler::{DepthReconciler, Reconciled};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// A single price level. A size of zero in an update means "remove this
/// price level".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
}

impl Level {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Published order book view: bids descending, asks ascending, no
/// duplicate price levels, `seq` equal to the last applied message's
/// terminal sequence number.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub timestamp: u64,
    pub seq: u64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// Full book state at a point in time, tagged with its sequence number.
#[derive(Debug, Clone)]
pub struct DepthSnapshot {
    pub seq: u64,
    pub timestamp: u64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// Diff against the book at `prev_seq`, advancing it to `seq`.
#[derive(Debug, Clone)]
pub struct DepthUpdate {
    pub prev_seq: u64,
    pub seq: u64,
    pub timestamp: u64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}
