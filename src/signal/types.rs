//! Signal types

use crate::risk::PositionSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What the strategy wants done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalIntent {
    /// Open a new position on `side`
    Open,
    /// Close the open position on `side`
    Close,
}

/// Strategy output for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Whether the strategy wants any action
    pub approved: bool,
    pub symbol: String,
    pub side: PositionSide,
    /// Identifies the rule that fired, scopes loss-streak tracking
    pub scenario_id: String,
    /// Strategy-defined score in [0, 1]
    pub confidence: Decimal,
    pub intent: SignalIntent,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// No action this tick
    pub fn none(symbol: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            approved: false,
            symbol: symbol.into(),
            side: PositionSide::Long,
            scenario_id: String::new(),
            confidence: Decimal::ZERO,
            intent: SignalIntent::Open,
            timestamp,
        }
    }

    /// Request a new position
    pub fn open(
        symbol: impl Into<String>,
        side: PositionSide,
        scenario_id: impl Into<String>,
        confidence: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            approved: true,
            symbol: symbol.into(),
            side,
            scenario_id: scenario_id.into(),
            confidence,
            intent: SignalIntent::Open,
            timestamp,
        }
    }

    /// Request the position on `side` be closed
    pub fn close(
        symbol: impl Into<String>,
        side: PositionSide,
        scenario_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            approved: true,
            symbol: symbol.into(),
            side,
            scenario_id: scenario_id.into(),
            confidence: Decimal::ONE,
            intent: SignalIntent::Close,
            timestamp,
        }
    }

    pub fn is_open(&self) -> bool {
        self.approved && self.intent == SignalIntent::Open
    }

    pub fn is_close(&self) -> bool {
        self.approved && self.intent == SignalIntent::Close
    }
}
