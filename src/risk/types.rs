//! Risk management types

use super::LedgerSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Risk management errors.
///
/// `InvalidPosition` and `NoOpenPosition` are ordering bugs; `MarginExhausted`
/// simulates liquidation and halts the session.
#[derive(Debug, Error)]
pub enum RiskError {
    /// Position rejected at open or used in the wrong state
    #[error("Invalid position: {0}")]
    InvalidPosition(String),
    /// Close requested for a symbol/side with nothing open
    #[error("No open position for {symbol} {side}")]
    NoOpenPosition { symbol: String, side: PositionSide },
    /// Available balance went negative
    #[error("Margin exhausted: available balance {}", .0.available_balance)]
    MarginExhausted(Box<LedgerSnapshot>),
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn opposite(&self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of an open position in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub symbol: String,
    pub side: PositionSide,
}

impl PositionKey {
    pub fn new(symbol: impl Into<String>, side: PositionSide) -> Self {
        Self {
            symbol: symbol.into(),
            side,
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_opposite() {
        assert_eq!(PositionSide::Long.opposite(), PositionSide::Short);
        assert_eq!(PositionSide::Short.opposite(), PositionSide::Long);
    }

    #[test]
    fn test_key_display() {
        let key = PositionKey::new("BTCUSDT", PositionSide::Short);
        assert_eq!(key.to_string(), "BTCUSDT:short");
    }

    #[test]
    fn test_no_open_position_display() {
        let err = RiskError::NoOpenPosition {
            symbol: "ETHUSDT".to_string(),
            side: PositionSide::Long,
        };
        assert_eq!(err.to_string(), "No open position for ETHUSDT long");
    }
}
