//! Market data feed types

use crate::candle::{Candle, Interval};
use crate::execution::{AccountBalance, Fill};
use crate::ws::WsError;
use thiserror::Error;

/// Market data transport errors
#[derive(Debug, Error)]
pub enum FeedError {
    /// Request could not be sent or the connection dropped
    #[error("Transport error: {0}")]
    Transport(String),
    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// Payload did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),
    /// Bounded retry exhausted, fatal for the session
    #[error("{what} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        what: String,
        attempts: u32,
        last_error: String,
    },
    #[error(transparent)]
    Ws(#[from] WsError),
}

impl FeedError {
    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            FeedError::Transport(_) => true,
            FeedError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Ends the session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FeedError::RetriesExhausted { .. } | FeedError::Ws(WsError::MaxReconnectsExceeded(_))
        )
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FeedError::Parse(e.to_string())
        } else {
            FeedError::Transport(e.to_string())
        }
    }
}

/// Typed message from the streaming feed
#[derive(Debug, Clone)]
pub enum StreamMessage {
    /// Kline update, `closed` once the exchange finalised it
    Candle {
        symbol: String,
        interval: Interval,
        candle: Candle,
        closed: bool,
    },
    /// Fill reported by the venue
    OrderUpdate(Fill),
    /// Account balance pushed by the venue
    AccountUpdate(AccountBalance),
    /// Stream ended; `Some` carries the fatal cause
    Disconnected(Option<String>),
}

impl StreamMessage {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            StreamMessage::Candle { symbol, .. } => Some(symbol),
            StreamMessage::OrderUpdate(fill) => Some(&fill.symbol),
            _ => None,
        }
    }
}
