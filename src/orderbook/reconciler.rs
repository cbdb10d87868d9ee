//! Per-topic depth reconciliation
//!
//! Two modes, chosen by the adapter per subscription:
//!
//! - refresh: every message is a full snapshot; accept only strictly
//!   increasing sequence numbers.
//! - incremental: bootstrap from an out-of-band snapshot, then merge
//!   diffs only while `prev_seq` stays contiguous with the held book.
//!
//! State is keyed by topic, so a refresh stream and an incremental
//! stream for the same symbol never share sequence state. Adapters keep
//! one reconciler per endpoint, so dropping one socket cannot disturb
//! books fed by another.
//!
//! A broken sequence is reported as [`ExchangeError::InvalidDepth`], never
//! silently dropped. In incremental mode the broken topic's state is
//! cleared so the next update re-triggers the snapshot bootstrap.

use std::collections::HashMap;

use super::{Book, DepthSnapshot, DepthUpdate, OrderBook};
use crate::error::ExchangeError;

/// Outcome of feeding one incremental message to the reconciler.
#[derive(Debug)]
pub enum Reconciled {
    /// Message merged; publish this view.
    Book(OrderBook),
    /// No state held for the topic yet: the caller must request a full
    /// snapshot. The message itself is discarded.
    NeedSnapshot,
    /// Still waiting for the bootstrap snapshot; message discarded.
    Discarded,
}

enum Slot {
    /// Snapshot requested, not yet arrived.
    AwaitingSnapshot,
    Ready(Book),
}

/// Reconciliation state for the depth topics multiplexed on one
/// connection.
#[derive(Default)]
pub struct DepthReconciler {
    slots: HashMap<String, Slot>,
}

impl DepthReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh mode: replace the book wholesale if `snapshot.seq` is
    /// strictly greater than the stored sequence. `symbol` only labels
    /// the published view and any corruption error.
    pub fn apply_refresh(
        &mut self,
        topic: &str,
        symbol: &str,
        snapshot: DepthSnapshot,
    ) -> Result<OrderBook, ExchangeError> {
        let stored = match self.slots.get(topic) {
            Some(Slot::Ready(book)) => book.seq(),
            _ => 0,
        };
        if stored > 0 && snapshot.seq <= stored {
            return Err(ExchangeError::InvalidDepth {
                symbol: symbol.to_string(),
                message: format!("stale refresh, seq {} <= stored {}", snapshot.seq, stored),
            });
        }
        let book = Book::from_snapshot(&snapshot);
        let view = book.view(symbol);
        self.slots.insert(topic.to_string(), Slot::Ready(book));
        Ok(view)
    }

    /// Incremental mode: install the bootstrap snapshot for `topic`.
    pub fn apply_snapshot(&mut self, topic: &str, snapshot: DepthSnapshot) {
        self.slots
            .insert(topic.to_string(), Slot::Ready(Book::from_snapshot(&snapshot)));
    }

    /// Incremental mode: merge one diff, or report what must happen first.
    pub fn apply_incremental(
        &mut self,
        topic: &str,
        symbol: &str,
        update: &DepthUpdate,
    ) -> Result<Reconciled, ExchangeError> {
        match self.slots.get_mut(topic) {
            None => {
                self.slots
                    .insert(topic.to_string(), Slot::AwaitingSnapshot);
                Ok(Reconciled::NeedSnapshot)
            }
            Some(Slot::AwaitingSnapshot) => Ok(Reconciled::Discarded),
            Some(Slot::Ready(book)) => {
                if book.seq() == update.prev_seq {
                    book.merge(update);
                    Ok(Reconciled::Book(book.view(symbol)))
                } else {
                    let stored = book.seq();
                    self.slots.remove(topic);
                    Err(ExchangeError::InvalidDepth {
                        symbol: symbol.to_string(),
                        message: format!(
                            "sequence gap, prev_seq {} != stored {}",
                            update.prev_seq, stored
                        ),
                    })
                }
            }
        }
    }

    /// Whether a consistent book is currently held for `topic`.
    pub fn is_ready(&self, topic: &str) -> bool {
        matches!(self.slots.get(topic), Some(Slot::Ready(_)))
    }

    /// Drop the accumulated state for one topic.
    pub fn invalidate(&mut self, topic: &str) {
        self.slots.remove(topic);
    }

    /// Drop all accumulated state; used when the connection feeding this
    /// reconciler disconnects.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::Level;
    use rust_decimal_macros::dec;

    fn snapshot(seq: u64) -> DepthSnapshot {
        DepthSnapshot {
            seq,
            timestamp: seq * 10,
            bids: vec![Level::new(dec!(100), dec!(1))],
            asks: vec![Level::new(dec!(101), dec!(1))],
        }
    }

    fn update(prev_seq: u64, seq: u64) -> DepthUpdate {
        DepthUpdate {
            prev_seq,
            seq,
            timestamp: seq * 10,
            bids: vec![Level::new(dec!(100), dec!(2))],
            asks: vec![],
        }
    }

    #[test]
    fn test_refresh_accepts_increasing_seq() {
        let mut rec = DepthReconciler::new();
        let view = rec.apply_refresh("t.refresh", "BTC/USDT", snapshot(5)).unwrap();
        assert_eq!(view.seq, 5);
        let view = rec.apply_refresh("t.refresh", "BTC/USDT", snapshot(6)).unwrap();
        assert_eq!(view.seq, 6);
    }

    #[test]
    fn test_refresh_rejects_stale_seq_without_mutating() {
        let mut rec = DepthReconciler::new();
        rec.apply_refresh("t.refresh", "BTC/USDT", snapshot(5)).unwrap();

        let err = rec
            .apply_refresh("t.refresh", "BTC/USDT", snapshot(4))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidDepth { .. }));
        assert_eq!(err.symbol(), Some("BTC/USDT"));

        // stored state untouched: seq 6 is still the next acceptable one
        let view = rec.apply_refresh("t.refresh", "BTC/USDT", snapshot(6)).unwrap();
        assert_eq!(view.seq, 6);
    }

    #[test]
    fn test_incremental_bootstrap_cycle() {
        let mut rec = DepthReconciler::new();

        // first frame before any snapshot: discarded, snapshot requested
        assert!(matches!(
            rec.apply_incremental("t.inc", "X", &update(9, 10)).unwrap(),
            Reconciled::NeedSnapshot
        ));
        // still waiting: further frames discarded
        assert!(matches!(
            rec.apply_incremental("t.inc", "X", &update(10, 11)).unwrap(),
            Reconciled::Discarded
        ));

        rec.apply_snapshot("t.inc", snapshot(10));
        assert!(rec.is_ready("t.inc"));

        // contiguous frame merges and advances the sequence
        match rec.apply_incremental("t.inc", "X", &update(10, 11)).unwrap() {
            Reconciled::Book(view) => assert_eq!(view.seq, 11),
            other => panic!("expected merged book, got {:?}", other),
        }
    }

    #[test]
    fn test_incremental_gap_clears_state_and_self_heals() {
        let mut rec = DepthReconciler::new();
        rec.apply_snapshot("t.inc", snapshot(10));
        rec.apply_incremental("t.inc", "X", &update(10, 11)).unwrap();

        // gap: prev_seq 15 != stored 11
        let err = rec.apply_incremental("t.inc", "X", &update(15, 20)).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidDepth { .. }));
        assert!(!rec.is_ready("t.inc"));

        // next frame restarts the bootstrap, then a fresh cycle recovers
        assert!(matches!(
            rec.apply_incremental("t.inc", "X", &update(20, 21)).unwrap(),
            Reconciled::NeedSnapshot
        ));
        rec.apply_snapshot("t.inc", snapshot(21));
        match rec.apply_incremental("t.inc", "X", &update(21, 22)).unwrap() {
            Reconciled::Book(view) => assert_eq!(view.seq, 22),
            other => panic!("expected merged book, got {:?}", other),
        }
    }

    #[test]
    fn test_level_size_is_last_nonstale_update() {
        let mut rec = DepthReconciler::new();
        rec.apply_snapshot("t.inc", snapshot(1));
        rec.apply_incremental("t.inc", "X", &update(1, 2)).unwrap();
        let view = match rec.apply_incremental("t.inc", "X", &update(2, 3)).unwrap() {
            Reconciled::Book(view) => view,
            other => panic!("expected merged book, got {:?}", other),
        };
        assert_eq!(view.bids[0].size, dec!(2));
        assert_eq!(view.seq, 3);
    }

    #[test]
    fn test_refresh_and_incremental_topics_never_share_state() {
        let mut rec = DepthReconciler::new();

        // refresh stream for a symbol holds seq 100
        rec.apply_refresh("t.refresh", "BTC/USDT", snapshot(100)).unwrap();

        // the incremental stream for the same symbol runs independently
        rec.apply_snapshot("t.inc", snapshot(60));
        let err = rec
            .apply_incremental("t.inc", "BTC/USDT", &update(50, 55))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidDepth { .. }));
        assert!(!rec.is_ready("t.inc"));

        // the gap above cleared only the incremental topic: a stale
        // refresh snapshot is still rejected against the stored seq 100
        let err = rec
            .apply_refresh("t.refresh", "BTC/USDT", snapshot(90))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidDepth { .. }));
        let view = rec
            .apply_refresh("t.refresh", "BTC/USDT", snapshot(101))
            .unwrap();
        assert_eq!(view.seq, 101);
    }

    #[test]
    fn test_clear_forgets_all_topics() {
        let mut rec = DepthReconciler::new();
        rec.apply_snapshot("t.x", snapshot(1));
        rec.apply_snapshot("t.y", snapshot(1));
        rec.clear();
        assert!(!rec.is_ready("t.x"));
        assert!(!rec.is_ready("t.y"));
    }
}
