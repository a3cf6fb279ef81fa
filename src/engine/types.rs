//! Engine types

use crate::candle::DataError;
use crate::execution::ExecutionError;
use crate::feed::FeedError;
use crate::risk::{ClosedTrade, PositionKey, RejectReason, RiskError};
use crate::signal::Signal;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Everything that can stop a tick
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Risk(#[from] RiskError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// Journal or snapshot write failed
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl EngineError {
    /// Halts the session and triggers a ledger dump
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Data(DataError::DataAlignment { .. }) => true,
            EngineError::Data(_) => false,
            // Ordering violations are bugs, liquidation is terminal
            EngineError::Risk(_) => true,
            EngineError::Feed(e) => e.is_fatal(),
            EngineError::Execution(ExecutionError::Transport(_)) => true,
            EngineError::Execution(_) => false,
            EngineError::Persistence(_) => true,
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        EngineError::Persistence(format!("{:#}", e))
    }
}

/// Outcome of one engine step
#[derive(Debug, Clone)]
pub struct TickReport {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    /// Trades closed on this tick, stops first
    pub closed: Vec<ClosedTrade>,
    pub opened: Option<PositionKey>,
    pub rejected: Option<RejectReason>,
    /// Amount moved into the reserve
    pub swept: Option<Decimal>,
    /// Approved strategy signal, if any
    pub signal: Option<Signal>,
}

impl TickReport {
    pub(crate) fn new(symbol: &str, timestamp: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp,
            price,
            closed: Vec::new(),
            opened: None,
            rejected: None,
            swept: None,
            signal: None,
        }
    }

    /// Nothing happened beyond repricing
    pub fn is_quiet(&self) -> bool {
        self.closed.is_empty()
            && self.opened.is_none()
            && self.rejected.is_none()
            && self.swept.is_none()
    }
}
