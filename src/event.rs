//! Domain events and delivery queues
//!
//! A delivery queue is an unbounded mpsc channel of [`Event`]s: many
//! connections may feed one queue, publishing never blocks, and events
//! from one connection arrive in the order its read loop produced them.

use tokio::sync::mpsc;

use crate::error::ExchangeError;
use crate::orderbook::OrderBook;
use crate::types::{BalanceUpdate, KLine, MarkPrice, Order, Position, Ticker, Trade};

/// Everything a consumer can receive on a delivery queue.
///
/// `Reconnected`, `Disconnected`, `Closed` and `Error` are control events
/// injected by the connection itself, not translated exchange traffic.
/// An order-book corruption arrives as `OrderBook(Err(_))` so book
/// subscribers see it in-band and can decide whether to wait, resubscribe
/// or surface the failure.
#[derive(Debug, Clone)]
pub enum Event {
    OrderBook(Result<OrderBook, ExchangeError>),
    Ticker(Ticker),
    Trade(Trade),
    KLine(KLine),
    Balance(BalanceUpdate),
    Order(Order),
    Position(Position),
    MarkPrice(MarkPrice),
    Reconnected,
    Disconnected,
    Closed,
    Error(ExchangeError),
}

impl Event {
    /// Short tag for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::OrderBook(_) => "order_book",
            Event::Ticker(_) => "ticker",
            Event::Trade(_) => "trade",
            Event::KLine(_) => "kline",
            Event::Balance(_) => "balance",
            Event::Order(_) => "order",
            Event::Position(_) => "position",
            Event::MarkPrice(_) => "mark_price",
            Event::Reconnected => "reconnected",
            Event::Disconnected => "disconnected",
            Event::Closed => "closed",
            Event::Error(_) => "error",
        }
    }
}

/// Producer half of a delivery queue; registered on connections.
pub type EventSender = mpsc::UnboundedSender<Event>;
/// Consumer half of a delivery queue.
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Create a delivery queue.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(Event::Reconnected.kind(), "reconnected");
        assert_eq!(
            Event::Error(ExchangeError::ReadTimeout).kind(),
            "error"
        );
    }

    #[test]
    fn test_queue_preserves_order() {
        tokio_test::block_on(async {
            let (tx, mut rx) = event_channel();
            tx.send(Event::Reconnected).unwrap();
            tx.send(Event::Disconnected).unwrap();
            assert!(matches!(rx.recv().await, Some(Event::Reconnected)));
            assert!(matches!(rx.recv().await, Some(Event::Disconnected)));
        });
    }
}
