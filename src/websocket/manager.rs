//! URL-keyed connection registry
//!
//! Lazily creates, reuses and tears down [`Connection`]s so many
//! subscribers share a small number of sockets. Publishing goes through
//! the registry so adapters never hold connection references of their
//! own. No network I/O happens here.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::connection::{ConnState, Connection};
use crate::error::{ExchangeError, Result};
use crate::event::Event;

/// Registry of live connections keyed by endpoint URL.
#[derive(Default)]
pub struct ConnectionManager {
    conns: Mutex<HashMap<String, Arc<Connection>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the connection for `url`, building it with `connect` if
    /// absent. Pass `None` when a connection must already exist. The
    /// registry lock covers only the map lookups; the handshake runs
    /// outside it, so a slow connect to one endpoint never stalls
    /// publishes and lookups on the others. Two callers racing the same
    /// endpoint both handshake; the loser's socket is closed and the
    /// registered one is returned.
    pub async fn get_connection<F, Fut>(
        &self,
        url: &str,
        connect: Option<F>,
    ) -> Result<Arc<Connection>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<Connection>>>,
    {
        {
            let mut conns = self.conns.lock().await;
            if let Some(conn) = conns.get(url) {
                if conn.state() != ConnState::Closed {
                    return Ok(conn.clone());
                }
                conns.remove(url);
            }
        }
        let Some(connect) = connect else {
            return Err(ExchangeError::ConnectionNotFound(url.to_string()));
        };
        let conn = connect().await?;

        let mut conns = self.conns.lock().await;
        if let Some(existing) = conns.get(url) {
            if existing.state() != ConnState::Closed {
                debug!(url = %url, "lost connect race, keeping registered connection");
                conn.close();
                return Ok(existing.clone());
            }
        }
        conns.insert(url.to_string(), conn.clone());
        info!(url = %url, "connection registered");
        Ok(conn)
    }

    /// Deliver `event` to every queue subscribed on `url`. Unknown URLs
    /// are a no-op; per-queue delivery never blocks.
    pub async fn publish(&self, url: &str, event: Event) {
        if let Some(conn) = self.conns.lock().await.get(url) {
            conn.publish(event);
        }
    }

    /// Deliver `event`, then discard the connection's entire subscriber
    /// set. Used on the reconnect path: exchange-side subscriptions died
    /// with the old socket, so every consumer must resubscribe with fresh
    /// state.
    pub async fn publish_after_clear(&self, url: &str, event: Event) {
        if let Some(conn) = self.conns.lock().await.get(url) {
            conn.publish(event);
            conn.clear_subscribers();
            debug!(url = %url, "subscribers cleared after publish");
        }
    }

    /// Close and drop the entry for `url`; idempotent.
    pub async fn remove_connection(&self, url: &str) {
        if let Some(conn) = self.conns.lock().await.remove(url) {
            conn.close();
            info!(url = %url, "connection removed");
        }
    }

    pub async fn len(&self) -> usize {
        self.conns.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conns.lock().await.is_empty()
    }

    #[cfg(test)]
    pub(crate) async fn insert_stub(&self, url: &str) -> Arc<Connection> {
        let conn = Connection::stub(url);
        self.conns.lock().await.insert(url.to_string(), conn.clone());
        conn
    }
}
