//! One physical streaming session to one endpoint
//!
//! A `Connection` owns the socket, a read loop driven in its own task,
//! a channel-based write path that is safe to use concurrently with the
//! read loop, and the set of delivery queues fanned out to from this
//! socket. Socket loss drives the
//! `Connecting -> Open -> {Reconnecting -> Open}* -> Closed` state
//! machine, with lifecycle hooks supplied by the exchange adapter.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::{ExchangeError, Result};
use crate::event::{Event, EventSender};
use crate::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle and message hooks supplied by an exchange adapter.
///
/// Hook errors never terminate the read loop; the adapter reports its own
/// failures through the queues it publishes to.
#[async_trait]
pub trait WsHandler: Send + Sync + 'static {
    /// One decompressed inbound frame.
    async fn on_message(&self, url: &str, frame: Bytes);

    /// Transport-level failure that did not take the connection down.
    async fn on_error(&self, url: &str, err: ExchangeError);

    /// Socket lost. Runs to completion before any reconnect attempt, so
    /// adapters invalidate caches and login state here.
    async fn on_disconnected(&self, url: &str, err: ExchangeError);

    /// New socket handshake succeeded after a disconnect. Exchange-side
    /// subscriptions are gone; adapters notify and clear subscribers here.
    async fn on_reconnected(&self, url: &str);

    /// Connection is gone for good.
    async fn on_closed(&self, url: &str);

    /// Payload decompression for binary frames. Default is passthrough.
    fn decompress(&self, payload: Vec<u8>) -> Result<Bytes> {
        Ok(Bytes::from(payload))
    }
}

/// Reconnect backoff: capped exponential doubling starting at
/// `initial_delay`. `max_attempts` of zero retries forever.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_delay
            .saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
        base.min(self.max_delay)
    }
}

/// Connection construction parameters.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub url: String,
    pub auto_reconnect: bool,
    /// Run binary frames through the handler's decompress hook.
    pub compression: bool,
    /// Longest the read loop waits for any server traffic before the
    /// socket is treated as dead.
    pub read_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ConnectOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_reconnect: true,
            compression: false,
            read_timeout: Duration::from_secs(60),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Connecting = 0,
    Open = 1,
    Reconnecting = 2,
    Closed = 3,
}

enum Command {
    Send(Message),
    Close,
}

/// One streaming session plus its subscriber fan-out set.
pub struct Connection {
    url: String,
    options: ConnectOptions,
    handler: Option<Arc<dyn WsHandler>>,
    state: AtomicU8,
    subscribers: Mutex<Vec<EventSender>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Perform the initial handshake and spawn the read loop. A handshake
    /// failure is returned to the caller and nothing is registered.
    pub async fn connect(
        options: ConnectOptions,
        handler: Arc<dyn WsHandler>,
    ) -> Result<Arc<Self>> {
        let ws = Self::handshake(&options.url).await?;
        info!(url = %options.url, "websocket connected");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            url: options.url.clone(),
            options,
            handler: Some(handler),
            state: AtomicU8::new(ConnState::Open as u8),
            subscribers: Mutex::new(Vec::new()),
            cmd_tx,
        });

        let runner = conn.clone();
        tokio::spawn(async move { runner.run(ws, cmd_rx).await });

        Ok(conn)
    }

    async fn handshake(url: &str) -> Result<WsStream> {
        let (ws, response) = connect_async(url)
            .await
            .map_err(|e| ExchangeError::Connection(format!("{}: {}", url, e)))?;
        debug!(url = %url, status = ?response.status(), "handshake complete");
        Ok(ws)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnState {
        match self.state.load(Ordering::Acquire) {
            0 => ConnState::Connecting,
            1 => ConnState::Open,
            2 => ConnState::Reconnecting,
            _ => ConnState::Closed,
        }
    }

    fn set_state(&self, state: ConnState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Register a delivery queue on this connection's fan-out set.
    pub fn subscribe(&self, queue: EventSender) {
        let mut subs = self.subscribers.lock().expect("subscriber lock");
        if !subs.iter().any(|s| s.same_channel(&queue)) {
            subs.push(queue);
        }
        metrics::active_subscriptions(&self.url, subs.len() as i64);
    }

    /// Remove a delivery queue; safe while a publish is in progress.
    pub fn unsubscribe(&self, queue: &EventSender) {
        let mut subs = self.subscribers.lock().expect("subscriber lock");
        subs.retain(|s| !s.same_channel(queue));
        metrics::active_subscriptions(&self.url, subs.len() as i64);
    }

    /// Deliver `event` to every registered queue. Unbounded sends never
    /// block, so one slow consumer cannot stall the others; queues whose
    /// receiver is gone are pruned.
    pub fn publish(&self, event: Event) {
        let mut subs = self.subscribers.lock().expect("subscriber lock");
        subs.retain(|queue| queue.send(event.clone()).is_ok());
        metrics::events_published(event.kind(), subs.len() as u64);
    }

    /// Discard the whole fan-out set.
    pub fn clear_subscribers(&self) {
        self.subscribers.lock().expect("subscriber lock").clear();
        metrics::active_subscriptions(&self.url, 0);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscriber lock").len()
    }

    /// Serialize `value` as JSON and queue it on the write path.
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.send_text(text)
    }

    /// Queue a text frame on the write path.
    pub fn send_text(&self, text: String) -> Result<()> {
        self.cmd_tx
            .send(Command::Send(Message::Text(text)))
            .map_err(|_| ExchangeError::Connection(format!("{} is closed", self.url)))
    }

    /// Ask the read loop to close the socket and finish.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }

    async fn run(self: Arc<Self>, mut ws: WsStream, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        let handler = self
            .handler
            .clone()
            .expect("connection spawned without handler");
        loop {
            match self.drive(&mut ws, &mut cmd_rx, &handler).await {
                // explicit close
                Ok(()) => {
                    self.set_state(ConnState::Closed);
                    handler.on_closed(&self.url).await;
                    self.clear_subscribers();
                    return;
                }
                Err(err) => {
                    warn!(url = %self.url, error = %err, "websocket read loop failed");
                    if !self.options.auto_reconnect {
                        self.set_state(ConnState::Closed);
                        handler.on_closed(&self.url).await;
                        self.clear_subscribers();
                        return;
                    }

                    self.set_state(ConnState::Reconnecting);
                    // cache invalidation must finish before any retry
                    handler.on_disconnected(&self.url, err).await;

                    match self.reconnect().await {
                        Some(new_ws) => {
                            ws = new_ws;
                            self.set_state(ConnState::Open);
                            metrics::reconnects(&self.url);
                            handler.on_reconnected(&self.url).await;
                        }
                        None => {
                            error!(url = %self.url, "reconnect attempts exhausted");
                            self.set_state(ConnState::Closed);
                            handler.on_closed(&self.url).await;
                            self.clear_subscribers();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Pump one socket until it fails or a close is requested. `Ok(())`
    /// means explicit close, `Err` means socket-level failure.
    async fn drive(
        &self,
        ws: &mut WsStream,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
        handler: &Arc<dyn WsHandler>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(msg)) => ws.send(msg).await?,
                    Some(Command::Close) | None => {
                        let _ = ws.close(None).await;
                        return Ok(());
                    }
                },
                inbound = timeout(self.options.read_timeout, ws.next()) => match inbound {
                    Err(_) => return Err(ExchangeError::ReadTimeout),
                    Ok(None) => return Err(ExchangeError::WebSocket("stream ended".to_string())),
                    Ok(Some(Err(e))) => return Err(e.into()),
                    Ok(Some(Ok(msg))) => self.dispatch(ws, msg, handler).await?,
                },
            }
        }
    }

    async fn dispatch(
        &self,
        ws: &mut WsStream,
        msg: Message,
        handler: &Arc<dyn WsHandler>,
    ) -> Result<()> {
        match msg {
            Message::Text(text) => {
                metrics::frames_received(&self.url);
                handler.on_message(&self.url, Bytes::from(text)).await;
            }
            Message::Binary(data) => {
                metrics::frames_received(&self.url);
                let payload = if self.options.compression {
                    match handler.decompress(data) {
                        Ok(payload) => payload,
                        Err(err) => {
                            // one bad frame must not take the loop down
                            handler.on_error(&self.url, err).await;
                            return Ok(());
                        }
                    }
                } else {
                    Bytes::from(data)
                };
                handler.on_message(&self.url, payload).await;
            }
            Message::Ping(data) => {
                debug!(url = %self.url, "ping -> pong");
                ws.send(Message::Pong(data)).await?;
            }
            Message::Pong(_) => {}
            Message::Close(frame) => {
                warn!(url = %self.url, frame = ?frame, "server sent close frame");
                return Err(ExchangeError::WebSocket("server closed".to_string()));
            }
            Message::Frame(_) => {}
        }
        Ok(())
    }

    async fn reconnect(&self) -> Option<WsStream> {
        let policy = &self.options.reconnect;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if policy.max_attempts > 0 && attempt > policy.max_attempts {
                return None;
            }
            let delay = policy.delay_for(attempt);
            info!(
                url = %self.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );
            sleep(delay).await;
            match Self::handshake(&self.url).await {
                Ok(ws) => return Some(ws),
                Err(e) => warn!(url = %self.url, attempt, error = %e, "reconnect attempt failed"),
            }
        }
    }

    /// Detached connection for registry and fan-out tests; the write path
    /// reports closed because no read loop is running.
    #[cfg(test)]
    pub(crate) fn stub(url: &str) -> Arc<Self> {
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            url: url.to_string(),
            options: ConnectOptions::new(url),
            handler: None,
            state: AtomicU8::new(ConnState::Open as u8),
            subscribers: Mutex::new(Vec::new()),
            cmd_tx,
        })
    }
}
