//! Binance streaming adapter
//!
//! Connects to the combined-stream endpoint and manages topics with
//! in-band SUBSCRIBE/UNSUBSCRIBE frames. Incremental depth bootstraps
//! from the REST snapshot; deltas are aligned to the snapshot with the
//! exchange's published synchronization rule before they reach the
//! reconciler. Mark price pushes come from the separate futures host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{MarketRegistry, Options, StreamExchange, SubKind, SubTopic, TopicTable};
use crate::error::{ExchangeError, Result};
use crate::event::{Event, EventSender};
use crate::metrics;
use crate::orderbook::{DepthReconciler, DepthSnapshot, DepthUpdate, Level, Reconciled};
use crate::types::{KLine, KLineInterval, MarkPrice, Ticker, Trade, TradeSide};
use crate::websocket::{ConnectOptions, Connection, ConnectionManager, WsHandler};

const DEFAULT_WS_HOST: &str = "wss://stream.binance.com:9443";
const DEFAULT_FUTURES_WS_HOST: &str = "wss://fstream.binance.com";
const DEFAULT_REST_HOST: &str = "https://api.binance.com";

const REFRESH_LEVELS: [usize; 3] = [5, 10, 20];
const SNAPSHOT_LIMIT: u32 = 1000;

struct BinanceState {
    options: Options,
    markets: MarketRegistry,
    manager: ConnectionManager,
    topics: TopicTable,
    /// One reconciler per endpoint, so losing the futures socket never
    /// touches spot books (and vice versa).
    books: Mutex<HashMap<String, DepthReconciler>>,
    /// Snapshot sequence per endpoint and stream, held until the first
    /// delta that spans it has been merged.
    bootstraps: Mutex<HashMap<String, HashMap<String, u64>>>,
    next_id: AtomicU64,
    http: reqwest::Client,
}

/// Binance spot streaming adapter (plus the futures mark-price feed).
pub struct BinanceStream {
    state: Arc<BinanceState>,
}

impl BinanceStream {
    pub fn new(options: Options) -> Self {
        let markets = MarketRegistry::new(options.markets.clone());
        Self {
            state: Arc::new(BinanceState {
                options,
                markets,
                manager: ConnectionManager::new(),
                topics: TopicTable::default(),
                books: Mutex::new(HashMap::new()),
                bootstraps: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                http: reqwest::Client::new(),
            }),
        }
    }

    fn spot_url(&self) -> String {
        let host = if self.state.options.ws_host.is_empty() {
            DEFAULT_WS_HOST
        } else {
            &self.state.options.ws_host
        };
        format!("{}/stream", host)
    }

    fn futures_url(&self) -> String {
        format!("{}/stream", DEFAULT_FUTURES_WS_HOST)
    }

    fn rest_host(&self) -> &str {
        if self.state.options.rest_host.is_empty() {
            DEFAULT_REST_HOST
        } else {
            &self.state.options.rest_host
        }
    }

    fn connect_options(&self, url: &str) -> ConnectOptions {
        let mut opts = ConnectOptions::new(url)
            .auto_reconnect(self.state.options.auto_reconnect)
            .reconnect(self.state.options.reconnect.clone());
        if let Some(read_timeout) = self.state.options.read_timeout {
            opts = opts.read_timeout(read_timeout);
        }
        opts
    }

    async fn connection(&self, url: &str) -> Result<Arc<Connection>> {
        let state = self.state.clone();
        let options = self.connect_options(url);
        self.state
            .manager
            .get_connection(url, Some(move || async move {
                let handler: Arc<dyn WsHandler> = Arc::new(BinanceHandler { state });
                Connection::connect(options, handler).await
            }))
            .await
    }

    async fn sub_stream(
        &self,
        url: &str,
        stream: &str,
        sub: SubTopic,
        queue: EventSender,
    ) -> Result<String> {
        let conn = self.connection(url).await?;
        self.state.topics.insert(stream, sub);
        conn.subscribe(queue.clone());
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = conn.send_json(&json!({
            "method": "SUBSCRIBE",
            "params": [stream],
            "id": id,
        })) {
            self.state.topics.remove(stream);
            conn.unsubscribe(&queue);
            return Err(err);
        }
        Ok(stream.to_string())
    }
}

#[async_trait]
impl StreamExchange for BinanceStream {
    async fn subscribe_order_book(
        &self,
        symbol: &str,
        level: usize,
        incremental: bool,
        queue: EventSender,
    ) -> Result<String> {
        let market = self.state.markets.by_symbol(symbol).await?;
        let id = market.symbol_id.to_lowercase();

        let (stream, kind) = if incremental {
            (book_stream(&id, 0, true), SubKind::OrderBookIncremental)
        } else {
            if !REFRESH_LEVELS.contains(&level) {
                return Err(ExchangeError::BadRequest(format!(
                    "partial depth level {} not in {:?}",
                    level, REFRESH_LEVELS
                )));
            }
            (book_stream(&id, level, false), SubKind::OrderBookRefresh)
        };

        let url = self.spot_url();
        let sub = SubTopic {
            symbol: market.symbol.clone(),
            kind,
            url: url.clone(),
        };
        self.sub_stream(&url, &stream, sub, queue).await
    }

    async fn subscribe_ticker(&self, symbol: &str, queue: EventSender) -> Result<String> {
        let market = self.state.markets.by_symbol(symbol).await?;
        let stream = format!("{}@ticker", market.symbol_id.to_lowercase());
        let url = self.spot_url();
        let sub = SubTopic {
            symbol: market.symbol.clone(),
            kind: SubKind::Ticker,
            url: url.clone(),
        };
        self.sub_stream(&url, &stream, sub, queue).await
    }

    async fn subscribe_trades(&self, symbol: &str, queue: EventSender) -> Result<String> {
        let market = self.state.markets.by_symbol(symbol).await?;
        let stream = format!("{}@trade", market.symbol_id.to_lowercase());
        let url = self.spot_url();
        let sub = SubTopic {
            symbol: market.symbol.clone(),
            kind: SubKind::Trade,
            url: url.clone(),
        };
        self.sub_stream(&url, &stream, sub, queue).await
    }

    async fn subscribe_kline(
        &self,
        symbol: &str,
        interval: KLineInterval,
        queue: EventSender,
    ) -> Result<String> {
        let market = self.state.markets.by_symbol(symbol).await?;
        let stream = format!(
            "{}@kline_{}",
            market.symbol_id.to_lowercase(),
            stream_interval(interval)
        );
        let url = self.spot_url();
        let sub = SubTopic {
            symbol: market.symbol.clone(),
            kind: SubKind::KLine(interval),
            url: url.clone(),
        };
        self.sub_stream(&url, &stream, sub, queue).await
    }

    async fn subscribe_mark_price(&self, symbol: &str, queue: EventSender) -> Result<String> {
        let market = self.state.markets.by_symbol(symbol).await?;
        let stream = format!("{}@markPrice", market.symbol_id.to_lowercase());
        let url = self.futures_url();
        let sub = SubTopic {
            symbol: market.symbol.clone(),
            kind: SubKind::MarkPrice,
            url: url.clone(),
        };
        self.sub_stream(&url, &stream, sub, queue).await
    }

    async fn unsubscribe(&self, topic: &str, queue: &EventSender) -> Result<()> {
        let sub = self
            .state
            .topics
            .remove(topic)
            .ok_or_else(|| ExchangeError::BadRequest(format!("unknown topic {}", topic)))?;
        let conn = self
            .state
            .manager
            .get_connection::<NoConnect, _>(&sub.url, None)
            .await?;
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        conn.send_json(&json!({
            "method": "UNSUBSCRIBE",
            "params": [topic],
            "id": id,
        }))?;
        conn.unsubscribe(queue);
        if let Some(rec) = self.state.books.lock().expect("book lock").get_mut(&sub.url) {
            rec.invalidate(topic);
        }
        if let Some(pending) = self
            .state
            .bootstraps
            .lock()
            .expect("bootstrap lock")
            .get_mut(&sub.url)
        {
            pending.remove(topic);
        }
        Ok(())
    }
}

type NoConnect = fn() -> std::future::Ready<Result<Arc<Connection>>>;

struct BinanceHandler {
    state: Arc<BinanceState>,
}

impl BinanceHandler {
    async fn publish(&self, url: &str, event: Event) {
        self.state.manager.publish(url, event).await;
    }

    async fn handle(&self, url: &str, frame: &[u8]) -> Result<()> {
        let msg: Value = serde_json::from_slice(frame)?;

        // SUBSCRIBE/UNSUBSCRIBE ack: {"result":null,"id":n}
        if msg.get("id").is_some() && msg.get("stream").is_none() {
            debug!(id = ?msg.get("id"), result = ?msg.get("result"), "request ack");
            return Ok(());
        }

        let Some(stream) = msg.get("stream").and_then(Value::as_str) else {
            warn!(url = %url, "frame without stream tag");
            self.publish(url, Event::Error(ExchangeError::Protocol(msg.to_string())))
                .await;
            return Ok(());
        };
        let Some(sub) = self.state.topics.get(stream) else {
            warn!(stream = %stream, "push for unknown stream");
            self.publish(
                url,
                Event::Error(ExchangeError::ChannelNotSupported(stream.to_string())),
            )
            .await;
            return Ok(());
        };
        let data = msg
            .get("data")
            .ok_or_else(|| ExchangeError::Parse("combined frame missing data".to_string()))?;

        match sub.kind {
            SubKind::OrderBookRefresh => self.on_partial_depth(url, stream, &sub, data).await?,
            SubKind::OrderBookIncremental => {
                self.on_depth_update(url, stream, &sub, data).await?
            }
            SubKind::Trade => {
                let push: TradePush = from_value(data)?;
                let trade = Trade {
                    symbol: sub.symbol.clone(),
                    timestamp: push.trade_time,
                    price: push.price,
                    amount: push.quantity,
                    // the buyer being the maker means the taker sold
                    side: if push.buyer_is_maker {
                        TradeSide::Sell
                    } else {
                        TradeSide::Buy
                    },
                };
                self.publish(url, Event::Trade(trade)).await;
            }
            SubKind::Ticker => {
                let push: TickerPush = from_value(data)?;
                let ticker = Ticker {
                    symbol: sub.symbol.clone(),
                    timestamp: push.event_time,
                    open: push.open,
                    last: push.last,
                    high: push.high,
                    low: push.low,
                    volume: push.volume,
                    best_bid: Some(push.best_bid),
                    best_bid_size: Some(push.best_bid_qty),
                    best_ask: Some(push.best_ask),
                    best_ask_size: Some(push.best_ask_qty),
                };
                self.publish(url, Event::Ticker(ticker)).await;
            }
            SubKind::KLine(interval) => {
                let push: KlinePush = from_value(data)?;
                let kline = KLine {
                    symbol: sub.symbol.clone(),
                    timestamp: push.k.open_time,
                    interval,
                    open: push.k.open,
                    close: push.k.close,
                    high: push.k.high,
                    low: push.k.low,
                    volume: push.k.volume,
                };
                self.publish(url, Event::KLine(kline)).await;
            }
            SubKind::MarkPrice => {
                let push: MarkPricePush = from_value(data)?;
                let mark = MarkPrice {
                    symbol: sub.symbol.clone(),
                    mark_price: push.mark_price,
                    index_price: push.index_price,
                    funding_rate: push.funding_rate,
                    timestamp: push.event_time,
                };
                self.publish(url, Event::MarkPrice(mark)).await;
            }
            _ => {}
        }
        Ok(())
    }

    /// Partial book stream: every frame is a complete top-N snapshot.
    async fn on_partial_depth(
        &self,
        url: &str,
        stream: &str,
        sub: &SubTopic,
        data: &Value,
    ) -> Result<()> {
        let push: PartialDepth = from_value(data)?;
        let snapshot = DepthSnapshot {
            seq: push.last_update_id,
            timestamp: 0,
            bids: levels(&push.bids),
            asks: levels(&push.asks),
        };
        let outcome = self
            .state
            .books
            .lock()
            .expect("book lock")
            .entry(url.to_string())
            .or_default()
            .apply_refresh(stream, &sub.symbol, snapshot);
        match outcome {
            Ok(view) => self.publish(url, Event::OrderBook(Ok(view))).await,
            Err(err) => {
                metrics::book_corruptions(&sub.symbol);
                self.publish(url, Event::OrderBook(Err(err))).await;
            }
        }
        Ok(())
    }

    /// Diff stream. Deltas already covered by the REST snapshot are
    /// dropped; the delta spanning the snapshot is realigned so the
    /// reconciler's contiguity check matches the exchange's
    /// `first_update_id == last_seq + 1` rule.
    async fn on_depth_update(
        &self,
        url: &str,
        stream: &str,
        sub: &SubTopic,
        data: &Value,
    ) -> Result<()> {
        let push: DepthDiff = from_value(data)?;
        let mut prev_seq = push.first_update_id.saturating_sub(1);

        {
            let mut bootstraps = self.state.bootstraps.lock().expect("bootstrap lock");
            if let Some(pending) = bootstraps.get_mut(url) {
                if let Some(&snap_seq) = pending.get(stream) {
                    if push.last_update_id <= snap_seq {
                        // entirely covered by the snapshot
                        return Ok(());
                    }
                    if push.first_update_id <= snap_seq + 1 {
                        prev_seq = snap_seq;
                        pending.remove(stream);
                    }
                }
            }
        }

        let update = DepthUpdate {
            prev_seq,
            seq: push.last_update_id,
            timestamp: push.event_time,
            bids: levels(&push.bids),
            asks: levels(&push.asks),
        };
        let outcome = self
            .state
            .books
            .lock()
            .expect("book lock")
            .entry(url.to_string())
            .or_default()
            .apply_incremental(stream, &sub.symbol, &update);
        match outcome {
            Ok(Reconciled::Book(view)) => self.publish(url, Event::OrderBook(Ok(view))).await,
            Ok(Reconciled::NeedSnapshot) => self.spawn_snapshot_fetch(url, stream, sub),
            Ok(Reconciled::Discarded) => {}
            Err(err) => {
                metrics::book_corruptions(&sub.symbol);
                self.publish(url, Event::OrderBook(Err(err))).await;
                // state is cleared; the next delta restarts the bootstrap
            }
        }
        Ok(())
    }

    /// Fetch the REST depth snapshot off the read loop and install it.
    fn spawn_snapshot_fetch(&self, url: &str, stream: &str, sub: &SubTopic) {
        let state = self.state.clone();
        let url = url.to_string();
        let stream = stream.to_string();
        let symbol = sub.symbol.clone();
        let endpoint = {
            let rest_host = if state.options.rest_host.is_empty() {
                DEFAULT_REST_HOST
            } else {
                &state.options.rest_host
            };
            // REST wants the uppercase native id, streams the lowercase one
            let native = stream
                .split('@')
                .next()
                .unwrap_or_default()
                .to_uppercase();
            format!(
                "{}/api/v3/depth?symbol={}&limit={}",
                rest_host, native, SNAPSHOT_LIMIT
            )
        };

        tokio::spawn(async move {
            debug!(symbol = %symbol, endpoint = %endpoint, "fetching depth snapshot");
            let fetched: Result<RestDepth> = async {
                let resp = state.http.get(&endpoint).send().await?;
                let resp = resp.error_for_status()?;
                Ok(resp.json::<RestDepth>().await?)
            }
            .await;

            match fetched {
                Ok(depth) => {
                    let snapshot = DepthSnapshot {
                        seq: depth.last_update_id,
                        timestamp: 0,
                        bids: levels(&depth.bids),
                        asks: levels(&depth.asks),
                    };
                    state
                        .books
                        .lock()
                        .expect("book lock")
                        .entry(url.clone())
                        .or_default()
                        .apply_snapshot(&stream, snapshot);
                    state
                        .bootstraps
                        .lock()
                        .expect("bootstrap lock")
                        .entry(url.clone())
                        .or_default()
                        .insert(stream.clone(), depth.last_update_id);
                    debug!(symbol = %symbol, seq = depth.last_update_id, "depth snapshot installed");
                }
                Err(err) => {
                    warn!(symbol = %symbol, error = %err, "depth snapshot fetch failed");
                    // forget the pending bootstrap so the next delta retries
                    if let Some(rec) = state.books.lock().expect("book lock").get_mut(&url) {
                        rec.invalidate(&stream);
                    }
                    state.manager.publish(&url, Event::Error(err)).await;
                }
            }
        });
    }
}

#[async_trait]
impl WsHandler for BinanceHandler {
    async fn on_message(&self, url: &str, frame: Bytes) {
        if let Err(err) = self.handle(url, &frame).await {
            warn!(url = %url, error = %err, "message handling failed");
            self.publish(url, Event::Error(err)).await;
        }
    }

    async fn on_error(&self, url: &str, err: ExchangeError) {
        self.publish(url, Event::Error(err)).await;
    }

    async fn on_disconnected(&self, url: &str, err: ExchangeError) {
        warn!(url = %url, error = %err, "disconnected, dropping endpoint book state");
        // only this endpoint's books died with the socket
        self.state.books.lock().expect("book lock").remove(url);
        self.state.bootstraps.lock().expect("bootstrap lock").remove(url);
        self.publish(url, Event::Disconnected).await;
    }

    async fn on_reconnected(&self, url: &str) {
        self.state
            .manager
            .publish_after_clear(url, Event::Reconnected)
            .await;
    }

    async fn on_closed(&self, url: &str) {
        self.publish(url, Event::Closed).await;
        self.state.manager.remove_connection(url).await;
    }
}

fn from_value<T: serde::de::DeserializeOwned>(data: &Value) -> Result<T> {
    Ok(serde_json::from_value(data.clone())?)
}

fn levels(pairs: &[(Decimal, Decimal)]) -> Vec<Level> {
    pairs
        .iter()
        .map(|&(price, size)| Level::new(price, size))
        .collect()
}

fn book_stream(id: &str, level: usize, incremental: bool) -> String {
    if incremental {
        format!("{}@depth@100ms", id)
    } else {
        format!("{}@depth{}", id, level)
    }
}

fn stream_interval(interval: KLineInterval) -> &'static str {
    match interval {
        KLineInterval::Min1 => "1m",
        KLineInterval::Min5 => "5m",
        KLineInterval::Min15 => "15m",
        KLineInterval::Min30 => "30m",
        KLineInterval::Hour1 => "1h",
        KLineInterval::Hour4 => "4h",
        KLineInterval::Day1 => "1d",
        KLineInterval::Week1 => "1w",
    }
}

#[derive(Debug, Deserialize)]
struct DepthDiff {
    #[serde(rename = "E")]
    event_time: u64,
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    last_update_id: u64,
    #[serde(rename = "b", default)]
    bids: Vec<(Decimal, Decimal)>,
    #[serde(rename = "a", default)]
    asks: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
struct PartialDepth {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    #[serde(default)]
    bids: Vec<(Decimal, Decimal)>,
    #[serde(default)]
    asks: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
struct RestDepth {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    #[serde(default)]
    bids: Vec<(Decimal, Decimal)>,
    #[serde(default)]
    asks: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
struct TradePush {
    #[serde(rename = "T")]
    trade_time: u64,
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "q")]
    quantity: Decimal,
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

#[derive(Debug, Deserialize)]
struct TickerPush {
    #[serde(rename = "E")]
    event_time: u64,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "c")]
    last: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
    #[serde(rename = "b")]
    best_bid: Decimal,
    #[serde(rename = "B")]
    best_bid_qty: Decimal,
    #[serde(rename = "a")]
    best_ask: Decimal,
    #[serde(rename = "A")]
    best_ask_qty: Decimal,
}

#[derive(Debug, Deserialize)]
struct KlinePush {
    k: KlineBody,
}

#[derive(Debug, Deserialize)]
struct KlineBody {
    #[serde(rename = "t")]
    open_time: u64,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "c")]
    close: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
}

#[derive(Debug, Deserialize)]
struct MarkPricePush {
    #[serde(rename = "E")]
    event_time: u64,
    #[serde(rename = "p")]
    mark_price: Decimal,
    #[serde(rename = "i")]
    index_price: Option<Decimal>,
    #[serde(rename = "r")]
    funding_rate: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_stream_intervals() {
        assert_eq!(stream_interval(KLineInterval::Min1), "1m");
        assert_eq!(stream_interval(KLineInterval::Hour4), "4h");
        assert_eq!(stream_interval(KLineInterval::Week1), "1w");
    }

    #[test]
    fn test_book_streams() {
        assert_eq!(book_stream("btcusdt", 20, false), "btcusdt@depth20");
        assert_eq!(book_stream("btcusdt", 0, true), "btcusdt@depth@100ms");
    }

    #[test]
    fn test_depth_diff_parses_string_decimals() {
        let data: Value = serde_json::from_str(
            r#"{"e":"depthUpdate","E":1684000000000,"s":"BTCUSDT",
                "U":157,"u":160,
                "b":[["30000.50","0.2"],["29999.00","0"]],
                "a":[["30001.10","1.5"]]}"#,
        )
        .unwrap();
        let diff: DepthDiff = from_value(&data).unwrap();
        assert_eq!(diff.first_update_id, 157);
        assert_eq!(diff.last_update_id, 160);
        assert_eq!(diff.bids[0], (dec!(30000.50), dec!(0.2)));
        assert_eq!(diff.bids[1].1, dec!(0));
    }

    #[test]
    fn test_trade_push_maps_maker_flag_to_side() {
        let data: Value = serde_json::from_str(
            r#"{"e":"trade","E":1,"s":"BTCUSDT","t":7,
                "p":"30000.5","q":"0.01","T":1684000000000,"m":true}"#,
        )
        .unwrap();
        let push: TradePush = from_value(&data).unwrap();
        assert!(push.buyer_is_maker);
        assert_eq!(push.price, dec!(30000.5));
    }

    #[test]
    fn test_ticker_push_parses() {
        let data: Value = serde_json::from_str(
            r#"{"e":"24hrTicker","E":2,"s":"BTCUSDT",
                "o":"29000","c":"30000","h":"30500","l":"28900","v":"1234.5",
                "b":"29999.9","B":"2","a":"30000.1","A":"3"}"#,
        )
        .unwrap();
        let push: TickerPush = from_value(&data).unwrap();
        assert_eq!(push.last, dec!(30000));
        assert_eq!(push.best_bid, dec!(29999.9));
    }

    #[tokio::test]
    async fn test_depth_level_validated_before_any_network_work() {
        let binance = BinanceStream::new(Options {
            markets: vec![crate::types::Market {
                symbol: "BTC/USDT".to_string(),
                symbol_id: "BTCUSDT".to_string(),
                base: "BTC".to_string(),
                quote: "USDT".to_string(),
                price_precision: 2,
                amount_precision: 6,
                min_amount: dec!(0.0001),
            }],
            ..Options::default()
        });

        // no connection is established for an invalid level, so the
        // returned error proves validation runs before any network work
        let (tx, _rx) = crate::event::event_channel();
        let err = binance
            .subscribe_order_book("BTC/USDT", 7, false, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_subscribe_rejects_unknown_market() {
        let binance = BinanceStream::new(Options::default());
        let (tx, _rx) = crate::event::event_channel();
        let err = binance.subscribe_ticker("ETH/USDT", tx).await.unwrap_err();
        assert!(matches!(err, ExchangeError::MarketNotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_stream_push_is_surfaced() {
        let binance = BinanceStream::new(Options::default());
        let url = binance.spot_url();
        let conn = binance.state.manager.insert_stub(&url).await;
        let (tx, mut rx) = crate::event::event_channel();
        conn.subscribe(tx);

        let handler = BinanceHandler {
            state: binance.state.clone(),
        };
        handler
            .on_message(&url, Bytes::from_static(br#"{"stream":"ethusdt@trade","data":{}}"#))
            .await;

        match rx.try_recv() {
            Ok(Event::Error(ExchangeError::ChannelNotSupported(stream))) => {
                assert_eq!(stream, "ethusdt@trade");
            }
            other => panic!("expected channel error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_clears_only_the_affected_endpoint() {
        let handler = BinanceHandler {
            state: BinanceStream::new(Options::default()).state,
        };
        let spot = "wss://stream.binance.com:9443/stream".to_string();
        let futures = "wss://fstream.binance.com/stream".to_string();
        {
            let mut books = handler.state.books.lock().unwrap();
            books.entry(spot.clone()).or_default().apply_snapshot(
                "btcusdt@depth@100ms",
                DepthSnapshot {
                    seq: 100,
                    timestamp: 0,
                    bids: vec![Level::new(dec!(30000), dec!(1))],
                    asks: vec![Level::new(dec!(30001), dec!(1))],
                },
            );
            books.entry(futures.clone()).or_default();
        }

        handler
            .on_disconnected(&futures, ExchangeError::ReadTimeout)
            .await;

        let books = handler.state.books.lock().unwrap();
        assert!(!books.contains_key(&futures));
        assert!(books.contains_key(&spot));
    }
}
