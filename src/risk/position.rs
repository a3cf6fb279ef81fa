//! Position state machine
//!
//! A position is created in `Opening`, confirmed by a fill into `Open`, re-priced on
//! every tick, optionally marked `Closing` while the exit order is in flight and
//! finally frozen into a [`ClosedTrade`].

use super::{PositionSide, RiskError};
use crate::config::{StopLossConfig, StopPolicyKind};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionState {
    Opening,
    Open,
    Closing,
    Closed,
}

/// Stop-loss policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StopPolicy {
    /// Trailing stop `stop_rate` away from the watermark
    Static { stop_rate: Decimal },
    /// Starts `initial_stop_rate` away from entry, shrinking by `decay_rate` every
    /// `decay_interval_ms`, blended toward the trailing stop as it decays
    Scaled {
        stop_rate: Decimal,
        initial_stop_rate: Decimal,
        decay_rate: Decimal,
        decay_interval_ms: i64,
    },
}

impl StopPolicy {
    pub fn from_config(config: &StopLossConfig) -> Self {
        match config.policy {
            StopPolicyKind::Static => StopPolicy::Static {
                stop_rate: config.stop_rate,
            },
            StopPolicyKind::Scaled => StopPolicy::Scaled {
                stop_rate: config.stop_rate,
                initial_stop_rate: config.initial_stop_rate,
                decay_rate: config.decay_rate,
                decay_interval_ms: config.decay_interval().num_milliseconds(),
            },
        }
    }

    pub fn stop_rate(&self) -> Decimal {
        match self {
            StopPolicy::Static { stop_rate } | StopPolicy::Scaled { stop_rate, .. } => *stop_rate,
        }
    }

    /// Whether the stop also moves with elapsed time
    pub fn is_dynamic(&self) -> bool {
        matches!(self, StopPolicy::Scaled { .. })
    }
}

/// Outcome of a reprice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCheck {
    Hold,
    Triggered,
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    Signal,
    EndOfReplay,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "stop_loss",
            CloseReason::Signal => "signal",
            CloseReason::EndOfReplay => "end_of_replay",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Parameters of a new position
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub symbol: String,
    pub side: PositionSide,
    pub scenario_id: String,
    pub quantity: Decimal,
    pub leverage: u32,
    pub entry_price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub fee_rate: Decimal,
    pub policy: StopPolicy,
}

/// A single leveraged position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub scenario_id: String,
    pub state: PositionState,
    pub quantity: Decimal,
    pub leverage: u32,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub high_watermark: Decimal,
    pub low_watermark: Decimal,
    pub entry_time: DateTime<Utc>,
    pub last_time: DateTime<Utc>,
    pub stop_price: Decimal,
    pub stop_rate: Decimal,
    pub dynamic_decay_enabled: bool,
    pub policy: StopPolicy,
    pub fee_rate: Decimal,
    pub entry_fee: Decimal,
    pub exit_fee: Decimal,
    /// Price move times quantity, signed by side
    pub net_pnl: Decimal,
    /// `net_pnl` minus entry and exit fees
    pub gross_pnl: Decimal,
    pub stop_triggered: bool,
}

impl Position {
    /// Validate a request and create the position in `Opening`
    pub fn open(request: OpenRequest) -> Result<Self, RiskError> {
        if request.entry_price <= Decimal::ZERO {
            return Err(RiskError::InvalidPosition(format!(
                "{} entry price {} must be positive",
                request.symbol, request.entry_price
            )));
        }
        if request.leverage < 1 {
            return Err(RiskError::InvalidPosition(format!(
                "{} leverage {} must be at least 1",
                request.symbol, request.leverage
            )));
        }
        if request.quantity <= Decimal::ZERO {
            return Err(RiskError::InvalidPosition(format!(
                "{} quantity {} must be positive",
                request.symbol, request.quantity
            )));
        }

        let mut position = Self {
            id: Uuid::new_v4(),
            symbol: request.symbol,
            side: request.side,
            scenario_id: request.scenario_id,
            state: PositionState::Opening,
            quantity: request.quantity,
            leverage: request.leverage,
            entry_price: request.entry_price,
            current_price: request.entry_price,
            high_watermark: request.entry_price,
            low_watermark: request.entry_price,
            entry_time: request.timestamp,
            last_time: request.timestamp,
            stop_price: Decimal::ZERO,
            stop_rate: request.policy.stop_rate(),
            dynamic_decay_enabled: request.policy.is_dynamic(),
            policy: request.policy,
            fee_rate: request.fee_rate,
            entry_fee: Decimal::ZERO,
            exit_fee: Decimal::ZERO,
            net_pnl: Decimal::ZERO,
            gross_pnl: Decimal::ZERO,
            stop_triggered: false,
        };
        position.stop_price = position.candidate_stop();
        position.recompute();
        Ok(position)
    }

    /// Apply the entry fill and move to `Open`
    pub fn confirm(&mut self, fill_price: Decimal, timestamp: DateTime<Utc>) -> Result<(), RiskError> {
        if self.state != PositionState::Opening {
            return Err(RiskError::InvalidPosition(format!(
                "{} cannot confirm from {:?}",
                self.symbol, self.state
            )));
        }
        if fill_price <= Decimal::ZERO {
            return Err(RiskError::InvalidPosition(format!(
                "{} fill price {} must be positive",
                self.symbol, fill_price
            )));
        }

        self.state = PositionState::Open;
        self.entry_price = fill_price;
        self.current_price = fill_price;
        self.high_watermark = fill_price;
        self.low_watermark = fill_price;
        self.entry_time = timestamp;
        self.last_time = timestamp;
        self.stop_price = self.candidate_stop();
        self.recompute();
        Ok(())
    }

    /// Mark the exit order as in flight
    pub fn begin_close(&mut self) -> Result<(), RiskError> {
        match self.state {
            PositionState::Open | PositionState::Closing => {
                self.state = PositionState::Closing;
                Ok(())
            }
            state => Err(RiskError::InvalidPosition(format!(
                "{} cannot begin close from {:?}",
                self.symbol, state
            ))),
        }
    }

    /// Re-price the position and re-evaluate its stop
    pub fn reprice(&mut self, price: Decimal, timestamp: DateTime<Utc>) -> Result<StopCheck, RiskError> {
        if !self.is_live() {
            return Err(RiskError::InvalidPosition(format!(
                "{} cannot reprice from {:?}",
                self.symbol, self.state
            )));
        }
        if price <= Decimal::ZERO {
            return Err(RiskError::InvalidPosition(format!(
                "{} price {} must be positive",
                self.symbol, price
            )));
        }

        self.current_price = price;
        self.last_time = self.last_time.max(timestamp);
        self.high_watermark = self.high_watermark.max(price);
        self.low_watermark = self.low_watermark.min(price);

        let candidate = self.candidate_stop();
        self.stop_price = match self.side {
            PositionSide::Long => self.stop_price.max(candidate),
            PositionSide::Short => self.stop_price.min(candidate),
        };
        self.recompute();

        Ok(if self.stop_triggered {
            StopCheck::Triggered
        } else {
            StopCheck::Hold
        })
    }

    /// Final reprice at `exit_price`, then freeze into a closed trade
    pub fn close(
        &mut self,
        exit_price: Decimal,
        timestamp: DateTime<Utc>,
        reason: CloseReason,
    ) -> Result<ClosedTrade, RiskError> {
        self.reprice(exit_price, timestamp)?;
        self.state = PositionState::Closed;

        Ok(ClosedTrade {
            id: self.id,
            symbol: self.symbol.clone(),
            side: self.side,
            scenario_id: self.scenario_id.clone(),
            quantity: self.quantity,
            leverage: self.leverage,
            entry_price: self.entry_price,
            exit_price,
            entry_time: self.entry_time,
            last_time: self.last_time,
            high_watermark: self.high_watermark,
            low_watermark: self.low_watermark,
            stop_price: self.stop_price,
            entry_fee: self.entry_fee,
            exit_fee: self.exit_fee,
            net_pnl: self.net_pnl,
            gross_pnl: self.gross_pnl,
            initial_value: self.initial_value(),
            reason,
        })
    }

    /// Open or closing
    pub fn is_live(&self) -> bool {
        matches!(self.state, PositionState::Open | PositionState::Closing)
    }

    /// Margin committed: entry notional over leverage
    pub fn initial_value(&self) -> Decimal {
        self.entry_price * self.quantity / Decimal::from(self.leverage)
    }

    /// Current notional exposure
    pub fn notional(&self) -> Decimal {
        self.current_price * self.quantity
    }

    /// Watermark anchoring the trailing stop
    pub fn watermark(&self) -> Decimal {
        match self.side {
            PositionSide::Long => self.high_watermark,
            PositionSide::Short => self.low_watermark,
        }
    }

    fn recompute(&mut self) {
        self.entry_fee = self.entry_price * self.quantity * self.fee_rate;
        self.exit_fee = self.current_price * self.quantity * self.fee_rate;

        let move_pnl = (self.current_price - self.entry_price) * self.quantity;
        self.net_pnl = match self.side {
            PositionSide::Long => move_pnl,
            PositionSide::Short => -move_pnl,
        };
        self.gross_pnl = self.net_pnl - (self.entry_fee + self.exit_fee);

        self.stop_triggered = match self.side {
            PositionSide::Long => self.current_price <= self.stop_price,
            PositionSide::Short => self.current_price >= self.stop_price,
        };
    }

    fn candidate_stop(&self) -> Decimal {
        let watermark = self.watermark();
        match self.policy {
            StopPolicy::Static { stop_rate } => match self.side {
                PositionSide::Long => watermark * (Decimal::ONE - stop_rate),
                PositionSide::Short => watermark * (Decimal::ONE + stop_rate),
            },
            StopPolicy::Scaled {
                stop_rate,
                initial_stop_rate,
                decay_rate,
                decay_interval_ms,
            } => {
                let elapsed_ms = (self.last_time - self.entry_time).num_milliseconds().max(0);
                let steps = if decay_interval_ms > 0 {
                    elapsed_ms / decay_interval_ms
                } else {
                    0
                };
                let effective =
                    (initial_stop_rate - decay_rate * Decimal::from(steps)).max(Decimal::ZERO);
                let weight = if initial_stop_rate > Decimal::ZERO {
                    Decimal::ONE - effective / initial_stop_rate
                } else {
                    Decimal::ONE
                };

                let (adjusted_entry, trailing) = match self.side {
                    PositionSide::Long => (
                        self.entry_price * (Decimal::ONE - effective),
                        watermark * (Decimal::ONE - stop_rate),
                    ),
                    PositionSide::Short => (
                        self.entry_price * (Decimal::ONE + effective),
                        watermark * (Decimal::ONE + stop_rate),
                    ),
                };
                adjusted_entry + (trailing - adjusted_entry) * weight
            }
        }
    }
}

/// Immutable snapshot of a position at close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub scenario_id: String,
    pub quantity: Decimal,
    pub leverage: u32,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub last_time: DateTime<Utc>,
    pub high_watermark: Decimal,
    pub low_watermark: Decimal,
    pub stop_price: Decimal,
    pub entry_fee: Decimal,
    pub exit_fee: Decimal,
    pub net_pnl: Decimal,
    pub gross_pnl: Decimal,
    pub initial_value: Decimal,
    pub reason: CloseReason,
}

impl ClosedTrade {
    pub fn is_loss(&self) -> bool {
        self.gross_pnl < Decimal::ZERO
    }

    pub fn duration(&self) -> Duration {
        self.last_time - self.entry_time
    }

    pub fn fees(&self) -> Decimal {
        self.entry_fee + self.exit_fee
    }
}
