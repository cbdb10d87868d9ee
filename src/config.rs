//! Configuration for the streaming binary

use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::websocket::ReconnectPolicy;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Which adapter to run ("huobi" or "binance")
    pub exchange: String,

    /// Unified symbols to subscribe to (e.g., ["BTC/USDT", "ETH/USDT"])
    pub symbols: Vec<String>,

    /// WebSocket host override; empty uses the exchange default
    pub ws_endpoint: String,

    /// REST host override for snapshot fetches; empty uses the default
    pub rest_endpoint: String,

    /// Order book depth levels to subscribe
    pub depth_levels: usize,

    /// Incremental depth mode instead of per-message refresh
    pub incremental: bool,

    /// Seconds without server traffic before a socket is declared dead
    pub read_timeout_secs: u64,

    /// Reconnection settings
    pub reconnect_delay_ms: u64,
    pub reconnect_max_delay_secs: u64,
    pub max_reconnect_attempts: u32,

    /// Credentials for private channels; empty runs public-only
    pub access_key: String,
    pub secret_key: String,

    /// Port for the health/metrics endpoint
    pub health_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let symbols: Vec<String> = env::var("SYMBOLS")
            .unwrap_or_else(|_| "BTC/USDT,ETH/USDT".to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .collect();

        Ok(Self {
            exchange: env::var("EXCHANGE")
                .unwrap_or_else(|_| "binance".to_string())
                .to_lowercase(),
            symbols,
            ws_endpoint: env::var("WS_ENDPOINT").unwrap_or_default(),
            rest_endpoint: env::var("REST_ENDPOINT").unwrap_or_default(),
            depth_levels: env::var("DEPTH_LEVELS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),
            incremental: env::var("INCREMENTAL")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            read_timeout_secs: env::var("READ_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            reconnect_delay_ms: env::var("RECONNECT_DELAY_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .unwrap_or(500),
            reconnect_max_delay_secs: env::var("RECONNECT_MAX_DELAY_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            max_reconnect_attempts: env::var("MAX_RECONNECT_ATTEMPTS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0),
            access_key: env::var("ACCESS_KEY").unwrap_or_default(),
            secret_key: env::var("SECRET_KEY").unwrap_or_default(),
            health_port: env::var("HEALTH_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse()
                .unwrap_or(9090),
        })
    }

    /// Reconnect policy derived from the delay settings.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            initial_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_delay: Duration::from_secs(self.reconnect_max_delay_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: "binance".to_string(),
            symbols: vec!["BTC/USDT".to_string()],
            ws_endpoint: String::new(),
            rest_endpoint: String::new(),
            depth_levels: 20,
            incremental: false,
            read_timeout_secs: 60,
            reconnect_delay_ms: 500,
            reconnect_max_delay_secs: 60,
            max_reconnect_attempts: 0,
            access_key: String::new(),
            secret_key: String::new(),
            health_port: 9090,
        }
    }
}
