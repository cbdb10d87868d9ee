//! Error types shared by the transport core and the exchange adapters

use thiserror::Error;

/// Errors surfaced by connections, reconcilers and adapters.
///
/// Variants are `Clone` so they can ride inside [`crate::event::Event`]
/// payloads as well as being returned from synchronous calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("not implemented")]
    NotImplemented,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("no connection registered for {0}")]
    ConnectionNotFound(String),

    #[error("login failed: {0}")]
    AuthFailed(String),

    #[error("login timed out after {0}s")]
    LoginTimeout(u64),

    #[error("failed to parse message: {0}")]
    Parse(String),

    #[error("invalid depth for {symbol}: {message}")]
    InvalidDepth { symbol: String, message: String },

    #[error("{0} market not found")]
    MarketNotFound(String),

    #[error("channel not supported: {0}")]
    ChannelNotSupported(String),

    #[error("exchange error: {0}")]
    Protocol(String),

    #[error("read deadline expired")]
    ReadTimeout,

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("bad response: {0}")]
    BadResponse(String),
}

impl ExchangeError {
    /// Numeric code carried on error events, grouped the way the original
    /// wire taxonomy groups them: 10xxx generic, 20xxx business, 30xxx network.
    pub fn code(&self) -> u32 {
        match self {
            ExchangeError::NotImplemented => 10000,
            ExchangeError::Protocol(_) => 10001,
            ExchangeError::Parse(_) => 20001,
            ExchangeError::AuthFailed(_) | ExchangeError::LoginTimeout(_) => 20002,
            ExchangeError::MarketNotFound(_) => 20008,
            ExchangeError::ChannelNotSupported(_) => 20009,
            ExchangeError::InvalidDepth { .. } => 20010,
            ExchangeError::ReadTimeout => 30001,
            ExchangeError::Connection(_) | ExchangeError::ConnectionNotFound(_) => 30002,
            ExchangeError::WebSocket(_) => 30003,
            ExchangeError::BadRequest(_) => 30004,
            ExchangeError::BadResponse(_) => 30005,
        }
    }

    /// Symbol the error is scoped to, when it is scoped to one.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            ExchangeError::InvalidDepth { symbol, .. } => Some(symbol),
            ExchangeError::MarketNotFound(symbol) => Some(symbol),
            _ => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ExchangeError::WebSocket(err.to_string())
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        ExchangeError::BadResponse(err.to_string())
    }
}

impl From<std::io::Error> for ExchangeError {
    fn from(err: std::io::Error) -> Self {
        ExchangeError::WebSocket(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_depth_carries_symbol() {
        let err = ExchangeError::InvalidDepth {
            symbol: "BTC/USDT".to_string(),
            message: "prev_seq 15 != seq 11".to_string(),
        };
        assert_eq!(err.symbol(), Some("BTC/USDT"));
        assert_eq!(err.code(), 20010);
    }

    #[test]
    fn test_code_groups() {
        assert_eq!(ExchangeError::NotImplemented.code() / 10000, 1);
        assert_eq!(ExchangeError::Parse("x".into()).code() / 10000, 2);
        assert_eq!(ExchangeError::ReadTimeout.code() / 10000, 3);
    }

    #[test]
    fn test_display() {
        let err = ExchangeError::ConnectionNotFound("wss://x".to_string());
        assert_eq!(err.to_string(), "no connection registered for wss://x");
    }
}
