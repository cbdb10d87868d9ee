//! Huobi streaming adapter
//!
//! Three endpoints on one host: `/ws` for gzip-compressed market data,
//! `/feed` for incremental depth, `/ws/v2` for authenticated private
//! channels. JSON-level pings ride inside the payload on all of them, so
//! heartbeats are answered here rather than in the transport.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use flate2::read::GzDecoder;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{Options, StreamExchange, SubKind, SubTopic, TopicTable, MarketRegistry};
use crate::error::{ExchangeError, Result};
use crate::event::{Event, EventSender};
use crate::metrics;
use crate::orderbook::{DepthReconciler, DepthSnapshot, DepthUpdate, Level, Reconciled};
use crate::types::{
    Balance, BalanceUpdate, KLine, KLineInterval, Order, OrderStatus, OrderType, Ticker, Trade,
    TradeSide,
};
use crate::websocket::{ConnectOptions, Connection, ConnectionManager, WsHandler};

const DEFAULT_WS_HOST: &str = "wss://api.huobi.pro";
const LOGIN_TIMEOUT_SECS: u64 = 5;

const REFRESH_LEVELS: [usize; 3] = [5, 10, 20];
const INCREMENTAL_LEVELS: [usize; 3] = [5, 150, 400];

type HmacSha256 = Hmac<Sha256>;

struct LoginState {
    authed: bool,
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

struct HuobiState {
    options: Options,
    markets: MarketRegistry,
    manager: ConnectionManager,
    topics: TopicTable,
    /// One reconciler per endpoint; a socket loss on one endpoint must
    /// not disturb books fed by another.
    books: Mutex<HashMap<String, DepthReconciler>>,
    login: Mutex<LoginState>,
}

impl HuobiState {
    fn ws_host(&self) -> &str {
        if self.options.ws_host.is_empty() {
            DEFAULT_WS_HOST
        } else {
            &self.options.ws_host
        }
    }

    /// Gzip-compressed public market data.
    fn market_url(&self) -> String {
        format!("{}/ws", self.ws_host())
    }

    /// Incremental depth feed.
    fn feed_url(&self) -> String {
        format!("{}/feed", self.ws_host())
    }

    /// Authenticated v2 channel.
    fn private_url(&self) -> String {
        format!("{}/ws/v2", self.ws_host())
    }
}

/// Huobi spot streaming adapter.
pub struct HuobiStream {
    state: Arc<HuobiState>,
}

impl HuobiStream {
    pub fn new(options: Options) -> Self {
        let markets = MarketRegistry::new(options.markets.clone());
        Self {
            state: Arc::new(HuobiState {
                options,
                markets,
                manager: ConnectionManager::new(),
                topics: TopicTable::default(),
                books: Mutex::new(HashMap::new()),
                login: Mutex::new(LoginState {
                    authed: false,
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    fn market_url(&self) -> String {
        self.state.market_url()
    }

    fn feed_url(&self) -> String {
        self.state.feed_url()
    }

    fn private_url(&self) -> String {
        self.state.private_url()
    }

    fn connect_options(&self, url: &str) -> ConnectOptions {
        let mut opts = ConnectOptions::new(url)
            .auto_reconnect(self.state.options.auto_reconnect)
            .compression(true)
            .reconnect(self.state.options.reconnect.clone());
        if let Some(read_timeout) = self.state.options.read_timeout {
            opts = opts.read_timeout(read_timeout);
        }
        opts
    }

    /// Return the shared connection for `url`, establishing it on first
    /// use.
    async fn connection(&self, url: &str) -> Result<Arc<Connection>> {
        let state = self.state.clone();
        let options = self.connect_options(url);
        self.state
            .manager
            .get_connection(url, Some(move || async move {
                let handler: Arc<dyn WsHandler> = Arc::new(HuobiHandler { state });
                Connection::connect(options, handler).await
            }))
            .await
    }

    /// Subscribe `queue` to one public market-data topic. The topic is
    /// recorded only once the connection exists, and rolled back if the
    /// subscribe frame cannot be sent, so failures leave no orphaned
    /// routing entry.
    async fn sub_market_topic(
        &self,
        url: &str,
        topic: &str,
        sub: SubTopic,
        queue: EventSender,
    ) -> Result<String> {
        let conn = self.connection(url).await?;
        self.state.topics.insert(topic, sub);
        conn.subscribe(queue.clone());
        if let Err(err) = conn.send_json(&json!({ "sub": topic, "id": topic })) {
            self.state.topics.remove(topic);
            conn.unsubscribe(&queue);
            return Err(err);
        }
        Ok(topic.to_string())
    }

    /// Subscribe `queue` to one v2 private topic, logging in first. A
    /// login failure leaves no trace of the attempted topic.
    async fn sub_private_topic(
        &self,
        topic: &str,
        sub: SubTopic,
        queue: EventSender,
    ) -> Result<String> {
        let url = self.private_url();
        let conn = self.connection(&url).await?;
        self.ensure_login(&conn).await?;
        self.state.topics.insert(topic, sub);
        conn.subscribe(queue.clone());
        if let Err(err) = conn.send_json(&json!({ "action": "sub", "ch": topic })) {
            self.state.topics.remove(topic);
            conn.unsubscribe(&queue);
            return Err(err);
        }
        Ok(topic.to_string())
    }

    /// Send the auth request and wait for the server's verdict.
    async fn ensure_login(&self, conn: &Connection) -> Result<()> {
        let rx = {
            let mut login = self.state.login.lock().expect("login lock");
            if login.authed {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            login.waiters.push(tx);
            rx
        };

        conn.send_json(&self.auth_request()?)?;

        match timeout(Duration::from_secs(LOGIN_TIMEOUT_SECS), rx).await {
            Err(_) => Err(ExchangeError::LoginTimeout(LOGIN_TIMEOUT_SECS)),
            Ok(Err(_)) => Err(ExchangeError::Connection(
                "login dropped before completion".to_string(),
            )),
            Ok(Ok(outcome)) => outcome,
        }
    }

    fn auth_request(&self) -> Result<Value> {
        let host = host_of(self.state.ws_host());
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let signature = sign_v2(
            &self.state.options.access_key,
            &self.state.options.secret_key,
            &host,
            &timestamp,
        )?;
        Ok(json!({
            "action": "req",
            "ch": "auth",
            "params": {
                "authType": "api",
                "accessKey": self.state.options.access_key,
                "signatureMethod": "HmacSHA256",
                "signatureVersion": "2.1",
                "timestamp": timestamp,
                "signature": signature,
            }
        }))
    }
}

#[async_trait]
impl StreamExchange for HuobiStream {
    async fn subscribe_order_book(
        &self,
        symbol: &str,
        level: usize,
        incremental: bool,
        queue: EventSender,
    ) -> Result<String> {
        let market = self.state.markets.by_symbol(symbol).await?;
        let id = market.symbol_id.to_lowercase();

        let (topic, url, kind) = if incremental {
            if !INCREMENTAL_LEVELS.contains(&level) {
                return Err(ExchangeError::BadRequest(format!(
                    "incremental depth level {} not in {:?}",
                    level, INCREMENTAL_LEVELS
                )));
            }
            (
                book_topic(&id, level, true),
                self.feed_url(),
                SubKind::OrderBookIncremental,
            )
        } else {
            if !REFRESH_LEVELS.contains(&level) {
                return Err(ExchangeError::BadRequest(format!(
                    "refresh depth level {} not in {:?}",
                    level, REFRESH_LEVELS
                )));
            }
            (
                book_topic(&id, level, false),
                self.market_url(),
                SubKind::OrderBookRefresh,
            )
        };

        let sub = SubTopic {
            symbol: market.symbol.clone(),
            kind,
            url: url.clone(),
        };
        self.sub_market_topic(&url, &topic, sub, queue).await
    }

    async fn subscribe_ticker(&self, symbol: &str, queue: EventSender) -> Result<String> {
        let market = self.state.markets.by_symbol(symbol).await?;
        let topic = format!("market.{}.detail", market.symbol_id.to_lowercase());
        let url = self.market_url();
        let sub = SubTopic {
            symbol: market.symbol.clone(),
            kind: SubKind::Ticker,
            url: url.clone(),
        };
        self.sub_market_topic(&url, &topic, sub, queue).await
    }

    async fn subscribe_trades(&self, symbol: &str, queue: EventSender) -> Result<String> {
        let market = self.state.markets.by_symbol(symbol).await?;
        let topic = format!("market.{}.trade.detail", market.symbol_id.to_lowercase());
        let url = self.market_url();
        let sub = SubTopic {
            symbol: market.symbol.clone(),
            kind: SubKind::Trade,
            url: url.clone(),
        };
        self.sub_market_topic(&url, &topic, sub, queue).await
    }

    async fn subscribe_kline(
        &self,
        symbol: &str,
        interval: KLineInterval,
        queue: EventSender,
    ) -> Result<String> {
        let market = self.state.markets.by_symbol(symbol).await?;
        let topic = format!(
            "market.{}.kline.{}",
            market.symbol_id.to_lowercase(),
            interval_period(interval)
        );
        let url = self.market_url();
        let sub = SubTopic {
            symbol: market.symbol.clone(),
            kind: SubKind::KLine(interval),
            url: url.clone(),
        };
        self.sub_market_topic(&url, &topic, sub, queue).await
    }

    async fn subscribe_balance(&self, queue: EventSender) -> Result<String> {
        let topic = "accounts.update#2".to_string();
        let sub = SubTopic {
            symbol: String::new(),
            kind: SubKind::Balance,
            url: self.private_url(),
        };
        self.sub_private_topic(&topic, sub, queue).await
    }

    async fn subscribe_order(&self, symbol: &str, queue: EventSender) -> Result<String> {
        let market = self.state.markets.by_symbol(symbol).await?;
        let topic = format!("orders#{}", market.symbol_id.to_lowercase());
        let sub = SubTopic {
            symbol: market.symbol.clone(),
            kind: SubKind::Order,
            url: self.private_url(),
        };
        self.sub_private_topic(&topic, sub, queue).await
    }

    async fn unsubscribe(&self, topic: &str, queue: &EventSender) -> Result<()> {
        let sub = self
            .state
            .topics
            .remove(topic)
            .ok_or_else(|| ExchangeError::BadRequest(format!("unknown topic {}", topic)))?;
        let conn = self.state.manager.get_connection::<NoConnect, _>(&sub.url, None).await?;
        if sub.url == self.private_url() {
            conn.send_json(&json!({ "action": "unsub", "ch": topic }))?;
        } else {
            conn.send_json(&json!({ "unsub": topic, "id": topic }))?;
        }
        conn.unsubscribe(queue);
        if let Some(rec) = self.state.books.lock().expect("book lock").get_mut(&sub.url) {
            rec.invalidate(topic);
        }
        Ok(())
    }
}

type NoConnect = fn() -> std::future::Ready<Result<Arc<Connection>>>;

/// Per-frame message handling shared by all three Huobi endpoints.
struct HuobiHandler {
    state: Arc<HuobiState>,
}

impl HuobiHandler {
    async fn send(&self, url: &str, value: &Value) {
        if let Ok(conn) = self
            .state
            .manager
            .get_connection::<NoConnect, _>(url, None)
            .await
        {
            if let Err(err) = conn.send_json(value) {
                warn!(url = %url, error = %err, "heartbeat reply failed");
            }
        }
    }

    async fn publish(&self, url: &str, event: Event) {
        self.state.manager.publish(url, event).await;
    }

    fn resolve(&self, ch: &str) -> Option<SubTopic> {
        self.state.topics.get(ch)
    }

    async fn handle(&self, url: &str, frame: &[u8]) -> Result<()> {
        let msg: Value = serde_json::from_slice(frame)?;

        // market-endpoint heartbeat: {"ping": n} -> {"pong": n}
        if let Some(n) = msg.get("ping").and_then(Value::as_u64) {
            self.send(url, &json!({ "pong": n })).await;
            return Ok(());
        }

        match msg.get("action").and_then(Value::as_str) {
            // v2 heartbeat
            Some("ping") => {
                let ts = msg
                    .pointer("/data/ts")
                    .and_then(Value::as_u64)
                    .unwrap_or_default();
                self.send(url, &json!({ "action": "pong", "data": { "ts": ts } }))
                    .await;
                return Ok(());
            }
            Some("req") => {
                if msg.get("ch").and_then(Value::as_str) == Some("auth") {
                    self.finish_login(&msg);
                }
                return Ok(());
            }
            Some("sub") => {
                debug!(ch = ?msg.get("ch"), code = ?msg.get("code"), "subscription ack");
                return Ok(());
            }
            Some("push") => {
                if let Some(ch) = msg.get("ch").and_then(Value::as_str) {
                    let ch = ch.to_string();
                    return self.handle_private_push(url, &ch, &msg).await;
                }
                return Ok(());
            }
            _ => {}
        }

        // market-endpoint subscription ack
        if msg.get("subbed").is_some() || msg.get("unsubbed").is_some() {
            debug!(status = ?msg.get("status"), "subscription ack");
            return Ok(());
        }

        // snapshot reply for an incremental depth bootstrap
        if let Some(rep) = msg.get("rep").and_then(Value::as_str) {
            let rep = rep.to_string();
            return self.handle_snapshot_reply(url, &rep, &msg).await;
        }

        if let Some(ch) = msg.get("ch").and_then(Value::as_str) {
            let ch = ch.to_string();
            return self.handle_market_push(url, &ch, &msg).await;
        }

        // unparsed exchange-side frame; surfaced rather than dropped
        warn!(url = %url, "unhandled frame");
        self.publish(
            url,
            Event::Error(ExchangeError::Protocol(msg.to_string())),
        )
        .await;
        Ok(())
    }

    fn finish_login(&self, msg: &Value) {
        let code = msg.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let outcome = if code == 200 {
            Ok(())
        } else {
            Err(ExchangeError::AuthFailed(format!("code {}", code)))
        };
        let mut login = self.state.login.lock().expect("login lock");
        login.authed = outcome.is_ok();
        for waiter in login.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn handle_snapshot_reply(&self, url: &str, rep: &str, msg: &Value) -> Result<()> {
        if !rep.contains(".mbp.") {
            return Ok(());
        }
        let Some(sub) = self.resolve(rep) else {
            return Ok(());
        };
        let tick: MbpTick = parse_field(msg, "data")?;
        let snapshot = DepthSnapshot {
            seq: tick.seq_num,
            timestamp: msg.get("ts").and_then(Value::as_u64).unwrap_or_default(),
            bids: levels(&tick.bids),
            asks: levels(&tick.asks),
        };
        self.state
            .books
            .lock()
            .expect("book lock")
            .entry(url.to_string())
            .or_default()
            .apply_snapshot(rep, snapshot);
        debug!(url = %url, symbol = %sub.symbol, seq = tick.seq_num, "depth snapshot installed");
        // the next contiguous diff produces the first published view
        Ok(())
    }

    async fn handle_market_push(&self, url: &str, ch: &str, msg: &Value) -> Result<()> {
        let Some(sub) = self.resolve(ch) else {
            warn!(ch = %ch, "push for unrecognized channel");
            self.publish(
                url,
                Event::Error(ExchangeError::ChannelNotSupported(ch.to_string())),
            )
            .await;
            return Ok(());
        };
        let ts = msg.get("ts").and_then(Value::as_u64).unwrap_or_default();

        match sub.kind {
            SubKind::OrderBookRefresh => {
                let tick: MbpTick = parse_field(msg, "tick")?;
                let snapshot = DepthSnapshot {
                    seq: tick.seq_num,
                    timestamp: ts,
                    bids: levels(&tick.bids),
                    asks: levels(&tick.asks),
                };
                let outcome = self
                    .state
                    .books
                    .lock()
                    .expect("book lock")
                    .entry(url.to_string())
                    .or_default()
                    .apply_refresh(ch, &sub.symbol, snapshot);
                match outcome {
                    Ok(view) => self.publish(url, Event::OrderBook(Ok(view))).await,
                    Err(err) => {
                        metrics::book_corruptions(&sub.symbol);
                        self.publish(url, Event::OrderBook(Err(err))).await;
                    }
                }
            }
            SubKind::OrderBookIncremental => {
                let tick: MbpTick = parse_field(msg, "tick")?;
                let update = DepthUpdate {
                    prev_seq: tick.prev_seq_num.unwrap_or_default(),
                    seq: tick.seq_num,
                    timestamp: ts,
                    bids: levels(&tick.bids),
                    asks: levels(&tick.asks),
                };
                let outcome = self
                    .state
                    .books
                    .lock()
                    .expect("book lock")
                    .entry(url.to_string())
                    .or_default()
                    .apply_incremental(ch, &sub.symbol, &update);
                match outcome {
                    Ok(Reconciled::Book(view)) => {
                        self.publish(url, Event::OrderBook(Ok(view))).await
                    }
                    Ok(Reconciled::NeedSnapshot) => {
                        debug!(ch = %ch, "requesting depth snapshot");
                        self.send(url, &json!({ "req": ch, "id": ch })).await;
                    }
                    Ok(Reconciled::Discarded) => {}
                    Err(err) => {
                        metrics::book_corruptions(&sub.symbol);
                        self.publish(url, Event::OrderBook(Err(err))).await;
                        // re-bootstrap immediately rather than waiting for
                        // the next diff
                        self.send(url, &json!({ "req": ch, "id": ch })).await;
                    }
                }
            }
            SubKind::Trade => {
                let tick: TradeTick = parse_field(msg, "tick")?;
                for item in tick.data {
                    let trade = Trade {
                        symbol: sub.symbol.clone(),
                        timestamp: item.ts,
                        price: item.price,
                        amount: item.amount,
                        side: side_of(&item.direction),
                    };
                    self.publish(url, Event::Trade(trade)).await;
                }
            }
            SubKind::Ticker => {
                let tick: DetailTick = parse_field(msg, "tick")?;
                let ticker = Ticker {
                    symbol: sub.symbol.clone(),
                    timestamp: ts,
                    open: tick.open,
                    last: tick.close,
                    high: tick.high,
                    low: tick.low,
                    volume: tick.amount,
                    best_bid: None,
                    best_bid_size: None,
                    best_ask: None,
                    best_ask_size: None,
                };
                self.publish(url, Event::Ticker(ticker)).await;
            }
            SubKind::KLine(interval) => {
                let tick: KlineTick = parse_field(msg, "tick")?;
                let kline = KLine {
                    symbol: sub.symbol.clone(),
                    // bucket id is in seconds
                    timestamp: tick.id * 1000,
                    interval,
                    open: tick.open,
                    close: tick.close,
                    high: tick.high,
                    low: tick.low,
                    volume: tick.amount,
                };
                self.publish(url, Event::KLine(kline)).await;
            }
            _ => {}
        }
        Ok(())
    }

    async fn handle_private_push(&self, url: &str, ch: &str, msg: &Value) -> Result<()> {
        if ch.starts_with("orders#") {
            let Some(sub) = self.resolve(ch) else {
                self.publish(
                    url,
                    Event::Error(ExchangeError::ChannelNotSupported(ch.to_string())),
                )
                .await;
                return Ok(());
            };
            let push: OrderPush = parse_field(msg, "data")?;
            let order = Order {
                id: push.order_id.to_string(),
                client_id: push.client_order_id.unwrap_or_default(),
                symbol: sub.symbol.clone(),
                price: push.order_price.unwrap_or_default(),
                amount: push.order_size.unwrap_or_default(),
                filled: push.exec_amt.unwrap_or_default(),
                cost: push.total_value.unwrap_or_default(),
                side: order_side(&push.order_type),
                order_type: order_type(&push.order_type),
                status: order_status(&push.order_status),
                create_time: push.order_create_time.unwrap_or_default(),
                transaction_time: msg.get("ts").and_then(Value::as_u64).unwrap_or_default(),
            };
            self.publish(url, Event::Order(order)).await;
            return Ok(());
        }

        if ch.starts_with("accounts.update") {
            let push: AccountPush = parse_field(msg, "data")?;
            let asset = push.currency.to_uppercase();
            let balance = Balance {
                asset: asset.clone(),
                available: push.available.unwrap_or_default(),
                frozen: push.balance.unwrap_or_default() - push.available.unwrap_or_default(),
            };
            let mut update = BalanceUpdate {
                timestamp: push.change_time.unwrap_or_default(),
                balances: Default::default(),
            };
            update.balances.insert(asset, balance);
            self.publish(url, Event::Balance(update)).await;
            return Ok(());
        }

        warn!(ch = %ch, "private push for unrecognized channel");
        self.publish(
            url,
            Event::Error(ExchangeError::ChannelNotSupported(ch.to_string())),
        )
        .await;
        Ok(())
    }
}

#[async_trait]
impl WsHandler for HuobiHandler {
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
        warn!(url = %url, error = %err, "disconnected, dropping endpoint state");
        // only this endpoint's books died with the socket
        self.state.books.lock().expect("book lock").remove(url);
        if url == self.state.private_url() {
            let mut login = self.state.login.lock().expect("login lock");
            login.authed = false;
            for waiter in login.waiters.drain(..) {
                let _ = waiter.send(Err(ExchangeError::Connection(
                    "disconnected during login".to_string(),
                )));
            }
        }
        self.publish(url, Event::Disconnected).await;
    }

    async fn on_reconnected(&self, url: &str) {
        // exchange-side subscriptions died with the socket; consumers must
        // resubscribe, so their queues are dropped after the notice
        self.state
            .manager
            .publish_after_clear(url, Event::Reconnected)
            .await;
    }

    async fn on_closed(&self, url: &str) {
        self.publish(url, Event::Closed).await;
        self.state.manager.remove_connection(url).await;
    }

    /// Market endpoints gzip every frame; v2 does not. The magic bytes
    /// distinguish them.
    fn decompress(&self, payload: Vec<u8>) -> Result<Bytes> {
        if payload.len() < 2 || payload[0] != 0x1f || payload[1] != 0x8b {
            return Ok(Bytes::from(payload));
        }
        let mut out = Vec::with_capacity(payload.len() * 4);
        GzDecoder::new(&payload[..]).read_to_end(&mut out)?;
        Ok(Bytes::from(out))
    }
}

fn parse_field<T: serde::de::DeserializeOwned>(msg: &Value, field: &str) -> Result<T> {
    let value = msg
        .get(field)
        .ok_or_else(|| ExchangeError::Parse(format!("missing field {}", field)))?;
    Ok(serde_json::from_value(value.clone())?)
}

fn levels(pairs: &[(Decimal, Decimal)]) -> Vec<Level> {
    pairs
        .iter()
        .map(|&(price, size)| Level::new(price, size))
        .collect()
}

fn side_of(direction: &str) -> TradeSide {
    if direction.eq_ignore_ascii_case("buy") {
        TradeSide::Buy
    } else {
        TradeSide::Sell
    }
}

fn order_side(order_type: &str) -> TradeSide {
    if order_type.starts_with("buy") {
        TradeSide::Buy
    } else {
        TradeSide::Sell
    }
}

fn order_type(order_type: &str) -> OrderType {
    if order_type.ends_with("ioc") {
        OrderType::Ioc
    } else if order_type.ends_with("market") {
        OrderType::Market
    } else {
        OrderType::Limit
    }
}

fn order_status(status: &str) -> OrderStatus {
    match status {
        "submitted" | "created" => OrderStatus::Open,
        "partial-filled" => OrderStatus::PartiallyFilled,
        "filled" => OrderStatus::Filled,
        "canceled" | "partial-canceled" => OrderStatus::Canceled,
        _ => OrderStatus::Unknown,
    }
}

fn book_topic(id: &str, level: usize, incremental: bool) -> String {
    if incremental {
        format!("market.{}.mbp.{}", id, level)
    } else {
        format!("market.{}.mbp.refresh.{}", id, level)
    }
}

fn interval_period(interval: KLineInterval) -> &'static str {
    match interval {
        KLineInterval::Min1 => "1min",
        KLineInterval::Min5 => "5min",
        KLineInterval::Min15 => "15min",
        KLineInterval::Min30 => "30min",
        KLineInterval::Hour1 => "60min",
        KLineInterval::Hour4 => "4hour",
        KLineInterval::Day1 => "1day",
        KLineInterval::Week1 => "1week",
    }
}

fn host_of(ws_host: &str) -> String {
    ws_host
        .trim_start_matches("wss://")
        .trim_start_matches("ws://")
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// v2.1 request signature: canonical query over sorted params, signed
/// with HMAC-SHA256 and base64-encoded.
fn sign_v2(access_key: &str, secret_key: &str, host: &str, timestamp: &str) -> Result<String> {
    let query = format!(
        "accessKey={}&signatureMethod=HmacSHA256&signatureVersion=2.1&timestamp={}",
        access_key,
        timestamp.replace(':', "%3A")
    );
    let payload = format!("GET\n{}\n/ws/v2\n{}", host, query);
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|e| ExchangeError::AuthFailed(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Deserialize)]
struct MbpTick {
    #[serde(rename = "seqNum")]
    seq_num: u64,
    #[serde(rename = "prevSeqNum")]
    prev_seq_num: Option<u64>,
    #[serde(default)]
    bids: Vec<(Decimal, Decimal)>,
    #[serde(default)]
    asks: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
struct TradeTick {
    data: Vec<TradeItem>,
}

#[derive(Debug, Deserialize)]
struct TradeItem {
    ts: u64,
    price: Decimal,
    amount: Decimal,
    direction: String,
}

#[derive(Debug, Deserialize)]
struct DetailTick {
    open: Decimal,
    close: Decimal,
    high: Decimal,
    low: Decimal,
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct KlineTick {
    id: u64,
    open: Decimal,
    close: Decimal,
    high: Decimal,
    low: Decimal,
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct OrderPush {
    #[serde(rename = "orderId")]
    order_id: u64,
    #[serde(rename = "clientOrderId")]
    client_order_id: Option<String>,
    #[serde(rename = "type", default)]
    order_type: String,
    #[serde(rename = "orderStatus", default)]
    order_status: String,
    #[serde(rename = "orderPrice")]
    order_price: Option<Decimal>,
    #[serde(rename = "orderSize")]
    order_size: Option<Decimal>,
    #[serde(rename = "execAmt")]
    exec_amt: Option<Decimal>,
    #[serde(rename = "totalValue")]
    total_value: Option<Decimal>,
    #[serde(rename = "orderCreateTime")]
    order_create_time: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AccountPush {
    currency: String,
    available: Option<Decimal>,
    balance: Option<Decimal>,
    #[serde(rename = "changeTime")]
    change_time: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_interval_periods() {
        assert_eq!(interval_period(KLineInterval::Min1), "1min");
        assert_eq!(interval_period(KLineInterval::Hour1), "60min");
        assert_eq!(interval_period(KLineInterval::Week1), "1week");
    }

    #[test]
    fn test_book_topics() {
        assert_eq!(book_topic("btcusdt", 20, false), "market.btcusdt.mbp.refresh.20");
        assert_eq!(book_topic("btcusdt", 150, true), "market.btcusdt.mbp.150");
    }

    #[test]
    fn test_host_extraction() {
        assert_eq!(host_of("wss://api.huobi.pro"), "api.huobi.pro");
        assert_eq!(host_of("wss://api.huobi.pro/ws"), "api.huobi.pro");
    }

    #[test]
    fn test_signature_is_deterministic() {
        let a = sign_v2("ak", "sk", "api.huobi.pro", "2023-01-01T00:00:00").unwrap();
        let b = sign_v2("ak", "sk", "api.huobi.pro", "2023-01-01T00:00:00").unwrap();
        assert_eq!(a, b);
        // base64 of a 32-byte digest
        assert_eq!(a.len(), 44);
    }

    #[test]
    fn test_gzip_frames_are_unwrapped_and_plain_passthrough() {
        let handler = HuobiHandler {
            state: HuobiStream::new(Options::default()).state,
        };

        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"{\"ping\":1}").unwrap();
        let packed = enc.finish().unwrap();
        assert_eq!(&handler.decompress(packed).unwrap()[..], b"{\"ping\":1}");

        // v2 frames arrive uncompressed
        let plain = b"{\"action\":\"ping\"}".to_vec();
        assert_eq!(&handler.decompress(plain).unwrap()[..], b"{\"action\":\"ping\"}");
    }

    #[test]
    fn test_mbp_tick_parses() {
        let msg: Value = serde_json::from_str(
            r#"{"ch":"market.btcusdt.mbp.150","ts":1684000000000,
                "tick":{"seqNum":200,"prevSeqNum":199,
                        "bids":[[30000.5,0.2],[30000.0,0]],"asks":[[30001.1,1.5]]}}"#,
        )
        .unwrap();
        let tick: MbpTick = parse_field(&msg, "tick").unwrap();
        assert_eq!(tick.seq_num, 200);
        assert_eq!(tick.prev_seq_num, Some(199));
        assert_eq!(tick.bids[0], (dec!(30000.5), dec!(0.2)));
        assert_eq!(tick.bids[1].1, dec!(0));
    }

    #[test]
    fn test_trade_tick_parses() {
        let msg: Value = serde_json::from_str(
            r#"{"ch":"market.btcusdt.trade.detail","ts":1,
                "tick":{"data":[{"ts":1684000000000,"price":30000.5,
                                 "amount":0.01,"direction":"buy"}]}}"#,
        )
        .unwrap();
        let tick: TradeTick = parse_field(&msg, "tick").unwrap();
        assert_eq!(tick.data.len(), 1);
        assert_eq!(side_of(&tick.data[0].direction), TradeSide::Buy);
    }

    #[test]
    fn test_order_type_mapping() {
        assert_eq!(order_type("buy-limit"), OrderType::Limit);
        assert_eq!(order_type("sell-market"), OrderType::Market);
        assert_eq!(order_type("buy-ioc"), OrderType::Ioc);
        assert_eq!(order_side("sell-limit"), TradeSide::Sell);
    }

    #[test]
    fn test_order_status_mapping() {
        assert_eq!(order_status("submitted"), OrderStatus::Open);
        assert_eq!(order_status("partial-filled"), OrderStatus::PartiallyFilled);
        assert_eq!(order_status("filled"), OrderStatus::Filled);
        assert_eq!(order_status("canceled"), OrderStatus::Canceled);
        assert_eq!(order_status("whatever"), OrderStatus::Unknown);
    }

    fn btc_market() -> crate::types::Market {
        crate::types::Market {
            symbol: "BTC/USDT".to_string(),
            symbol_id: "btcusdt".to_string(),
            base: "BTC".to_string(),
            quote: "USDT".to_string(),
            price_precision: 2,
            amount_precision: 6,
            min_amount: dec!(0.0001),
        }
    }

    fn small_snapshot(seq: u64) -> DepthSnapshot {
        DepthSnapshot {
            seq,
            timestamp: 0,
            bids: vec![Level::new(dec!(30000), dec!(1))],
            asks: vec![Level::new(dec!(30001), dec!(1))],
        }
    }

    #[tokio::test]
    async fn test_disconnect_clears_only_the_affected_endpoint() {
        let handler = HuobiHandler {
            state: HuobiStream::new(Options::default()).state,
        };
        let feed = handler.state.feed_url();
        let market = handler.state.market_url();
        {
            let mut books = handler.state.books.lock().unwrap();
            books
                .entry(feed.clone())
                .or_default()
                .apply_snapshot("market.btcusdt.mbp.150", small_snapshot(100));
            books
                .entry(market.clone())
                .or_default()
                .apply_snapshot("market.btcusdt.mbp.refresh.20", small_snapshot(50));
        }

        handler.on_disconnected(&feed, ExchangeError::ReadTimeout).await;

        let books = handler.state.books.lock().unwrap();
        assert!(!books.contains_key(&feed));
        // the other endpoint's socket is still up; its book survives
        assert!(books.contains_key(&market));
    }

    #[tokio::test]
    async fn test_unknown_channel_push_is_surfaced() {
        let huobi = HuobiStream::new(Options::default());
        let url = huobi.state.market_url();
        let conn = huobi.state.manager.insert_stub(&url).await;
        let (tx, mut rx) = crate::event::event_channel();
        conn.subscribe(tx);

        let handler = HuobiHandler {
            state: huobi.state.clone(),
        };
        handler
            .on_message(
                &url,
                Bytes::from_static(
                    br#"{"ch":"market.ethusdt.trade.detail","ts":1,"tick":{"data":[]}}"#,
                ),
            )
            .await;

        match rx.try_recv() {
            Ok(Event::Error(ExchangeError::ChannelNotSupported(ch))) => {
                assert_eq!(ch, "market.ethusdt.trade.detail");
            }
            other => panic!("expected channel error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_login_leaves_no_topic_behind() {
        let huobi = HuobiStream::new(Options {
            markets: vec![btc_market()],
            ..Options::default()
        });
        // a stub has no read loop, so the auth request cannot be sent
        let url = huobi.state.private_url();
        huobi.state.manager.insert_stub(&url).await;

        let (tx, _rx) = crate::event::event_channel();
        let err = huobi.subscribe_order("BTC/USDT", tx).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Connection(_)));
        assert!(huobi.state.topics.get("orders#btcusdt").is_none());
    }

    #[tokio::test]
    async fn test_subscribe_rejects_unknown_market() {
        let huobi = HuobiStream::new(Options::default());
        let (tx, _rx) = crate::event::event_channel();
        let err = huobi
            .subscribe_order_book("BTC/USDT", 150, true, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::MarketNotFound(_)));
    }

    #[tokio::test]
    async fn test_depth_level_validation() {
        let huobi = HuobiStream::new(Options {
            markets: vec![btc_market()],
            ..Options::default()
        });
        let (tx, _rx) = crate::event::event_channel();
        let err = huobi
            .subscribe_order_book("BTC/USDT", 7, true, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::BadRequest(_)));
    }
}
