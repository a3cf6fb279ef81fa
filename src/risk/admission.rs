//! Admission control
//!
//! Concurrency limits, one position per symbol (unless hedging) and a loss-streak
//! cooldown per (symbol, scenario).

use super::{Allocation, PortfolioLedger, PositionSide};
use crate::config::AdmissionConfig;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Why an open was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    MaxPositions { open: usize, limit: usize },
    SymbolBusy { symbol: String },
    LossStreak { losses: usize, limit: usize },
    /// Margin plus round-trip fees exceed the available balance
    InsufficientMargin { required: Decimal, available: Decimal },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MaxPositions { open, limit } => {
                write!(f, "{} positions open, limit {}", open, limit)
            }
            RejectReason::SymbolBusy { symbol } => write!(f, "{} already has a position", symbol),
            RejectReason::LossStreak { losses, limit } => {
                write!(f, "{} recent losses, limit {}", losses, limit)
            }
            RejectReason::InsufficientMargin {
                required,
                available,
            } => write!(f, "requires {} margin, {} available", required, available),
        }
    }
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MaxPositions { .. } => "max_positions",
            RejectReason::SymbolBusy { .. } => "symbol_busy",
            RejectReason::LossStreak { .. } => "loss_streak",
            RejectReason::InsufficientMargin { .. } => "insufficient_margin",
        }
    }
}

/// Admission outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Approved,
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_approved(&self) -> bool {
        matches!(self, Admission::Approved)
    }
}

/// Gatekeeper for new positions
#[derive(Debug, Clone)]
pub struct AdmissionGuard {
    max_open_positions: usize,
    loss_streak_limit: usize,
    recovery_window: Duration,
}

impl AdmissionGuard {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            max_open_positions: config.max_open_positions,
            loss_streak_limit: config.loss_streak_limit,
            recovery_window: config.recovery_window(),
        }
    }

    /// Check against the configured concurrency limit
    pub fn check(
        &self,
        ledger: &PortfolioLedger,
        symbol: &str,
        side: PositionSide,
        scenario_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Admission {
        self.check_with_capacity(
            ledger,
            symbol,
            side,
            scenario_id,
            timestamp,
            self.max_open_positions,
        )
    }

    /// Check with the concurrency limit tightened by the current allocation
    pub fn check_allocation(
        &self,
        ledger: &PortfolioLedger,
        allocation: &Allocation,
        symbol: &str,
        side: PositionSide,
        scenario_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Admission {
        self.check_with_capacity(
            ledger,
            symbol,
            side,
            scenario_id,
            timestamp,
            self.max_open_positions.min(allocation.max_positions),
        )
    }

    fn check_with_capacity(
        &self,
        ledger: &PortfolioLedger,
        symbol: &str,
        side: PositionSide,
        scenario_id: &str,
        timestamp: DateTime<Utc>,
        limit: usize,
    ) -> Admission {
        let open = ledger.open_count();
        if open >= limit {
            return Admission::Rejected(RejectReason::MaxPositions { open, limit });
        }

        let busy = if ledger.hedging() {
            ledger.is_open(symbol, side)
        } else {
            ledger.has_symbol(symbol)
        };
        if busy {
            return Admission::Rejected(RejectReason::SymbolBusy {
                symbol: symbol.to_string(),
            });
        }

        let losses = self.recent_losses(ledger, symbol, scenario_id, timestamp);
        if losses >= self.loss_streak_limit {
            return Admission::Rejected(RejectReason::LossStreak {
                losses,
                limit: self.loss_streak_limit,
            });
        }

        Admission::Approved
    }

    /// Boolean form of [`AdmissionGuard::check`]
    pub fn can_open(
        &self,
        ledger: &PortfolioLedger,
        symbol: &str,
        side: PositionSide,
        scenario_id: &str,
        timestamp: DateTime<Utc>,
    ) -> bool {
        self.check(ledger, symbol, side, scenario_id, timestamp)
            .is_approved()
    }

    /// Losing trades for (symbol, scenario) that ended inside the recovery window
    pub fn recent_losses(
        &self,
        ledger: &PortfolioLedger,
        symbol: &str,
        scenario_id: &str,
        timestamp: DateTime<Utc>,
    ) -> usize {
        let since = timestamp - self.recovery_window;
        ledger
            .closed_trades()
            .iter()
            .filter(|t| t.symbol == symbol && t.scenario_id == scenario_id)
            .filter(|t| t.is_loss())
            .filter(|t| t.last_time >= since && t.last_time <= timestamp)
            .count()
    }
}
