//! Sorted book storage
//!
//! Uses BTreeMap keyed by price so both sides stay sorted and free of
//! duplicate levels regardless of the order updates arrive in.

use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;

use super::{DepthSnapshot, DepthUpdate, Level, OrderBook, Side};

/// Reconciled book for a single symbol.
#[derive(Debug, Default)]
pub struct Book {
    /// Bids sorted by price descending (highest first)
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    /// Asks sorted by price ascending (lowest first)
    asks: BTreeMap<Decimal, Decimal>,
    /// Terminal sequence number of the last applied message
    seq: u64,
    /// Timestamp of the last applied message
    timestamp: u64,
}

impl Book {
    /// Build a book from a full snapshot, discarding any prior state.
    pub fn from_snapshot(snapshot: &DepthSnapshot) -> Self {
        let mut book = Book::default();
        book.replace(snapshot);
        book
    }

    /// Replace the whole book with a snapshot.
    pub fn replace(&mut self, snapshot: &DepthSnapshot) {
        self.bids.clear();
        self.asks.clear();
        for level in &snapshot.bids {
            if level.size > Decimal::ZERO {
                self.bids.insert(Reverse(level.price), level.size);
            }
        }
        for level in &snapshot.asks {
            if level.size > Decimal::ZERO {
                self.asks.insert(level.price, level.size);
            }
        }
        self.seq = snapshot.seq;
        self.timestamp = snapshot.timestamp;
    }

    /// Merge an incremental update. Sequence contiguity is the caller's
    /// responsibility; this only applies the level changes.
    pub fn merge(&mut self, update: &DepthUpdate) {
        for level in &update.bids {
            self.apply_level(Side::Bid, level);
        }
        for level in &update.asks {
            self.apply_level(Side::Ask, level);
        }
        self.seq = update.seq;
        self.timestamp = update.timestamp;
    }

    fn apply_level(&mut self, side: Side, level: &Level) {
        match side {
            Side::Bid => {
                if level.size == Decimal::ZERO {
                    self.bids.remove(&Reverse(level.price));
                } else {
                    self.bids.insert(Reverse(level.price), level.size);
                }
            }
            Side::Ask => {
                if level.size == Decimal::ZERO {
                    self.asks.remove(&level.price);
                } else {
                    self.asks.insert(level.price, level.size);
                }
            }
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first_key_value().map(|(Reverse(p), _)| *p)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first_key_value().map(|(p, _)| *p)
    }

    /// Export the publishable view for `symbol`.
    pub fn view(&self, symbol: &str) -> OrderBook {
        OrderBook {
            symbol: symbol.to_string(),
            timestamp: self.timestamp,
            seq: self.seq,
            bids: self
                .bids
                .iter()
                .map(|(Reverse(p), s)| Level::new(*p, *s))
                .collect(),
            asks: self.asks.iter().map(|(p, s)| Level::new(*p, *s)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot() -> DepthSnapshot {
        DepthSnapshot {
            seq: 100,
            timestamp: 1000,
            bids: vec![
                Level::new(dec!(49999), dec!(2.0)),
                Level::new(dec!(50000), dec!(1.0)),
            ],
            asks: vec![
                Level::new(dec!(50002), dec!(2.5)),
                Level::new(dec!(50001), dec!(1.5)),
            ],
        }
    }

    #[test]
    fn test_snapshot_sorts_both_sides() {
        let book = Book::from_snapshot(&snapshot());
        let view = book.view("BTC/USDT");
        assert_eq!(view.bids[0].price, dec!(50000));
        assert_eq!(view.bids[1].price, dec!(49999));
        assert_eq!(view.asks[0].price, dec!(50001));
        assert_eq!(view.asks[1].price, dec!(50002));
        assert_eq!(view.seq, 100);
    }

    #[test]
    fn test_merge_upserts_and_removes() {
        let mut book = Book::from_snapshot(&snapshot());
        book.merge(&DepthUpdate {
            prev_seq: 100,
            seq: 101,
            timestamp: 1001,
            bids: vec![
                Level::new(dec!(50000), dec!(3.0)), // resize
                Level::new(dec!(49999), dec!(0)),   // remove
                Level::new(dec!(49998), dec!(5.0)), // insert
            ],
            asks: vec![Level::new(dec!(50001), dec!(0))],
        });

        let view = book.view("BTC/USDT");
        assert_eq!(view.seq, 101);
        assert_eq!(view.bids.len(), 2);
        assert_eq!(view.bids[0], Level::new(dec!(50000), dec!(3.0)));
        assert_eq!(view.bids[1], Level::new(dec!(49998), dec!(5.0)));
        assert_eq!(view.asks, vec![Level::new(dec!(50002), dec!(2.5))]);
    }

    #[test]
    fn test_merge_keeps_levels_unique() {
        let mut book = Book::from_snapshot(&snapshot());
        book.merge(&DepthUpdate {
            prev_seq: 100,
            seq: 101,
            timestamp: 1001,
            bids: vec![Level::new(dec!(50000), dec!(9.0))],
            asks: vec![],
        });
        let view = book.view("X");
        let prices: Vec<_> = view.bids.iter().map(|l| l.price).collect();
        let mut deduped = prices.clone();
        deduped.dedup();
        assert_eq!(prices, deduped);
        assert_eq!(book.best_bid(), Some(dec!(50000)));
    }
}
