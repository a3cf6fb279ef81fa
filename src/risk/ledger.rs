//! Portfolio ledger
//!
//! Owns every open position (keyed by symbol and side) and the closed trade history.
//! Aggregates are always recomputed by summation so they cannot drift from the
//! positions they describe.

use super::{CloseReason, ClosedTrade, Position, PositionKey, PositionSide, PositionState, RiskError};
use crate::config::LedgerConfig;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Serialisable ledger state, used for resume and post-mortem dumps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub initial_balance: Decimal,
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub active_margin: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub reserved_profit: Decimal,
    pub sweep_threshold: Decimal,
    pub hedging: bool,
    pub open_positions: Vec<Position>,
    pub closed_trades: Vec<ClosedTrade>,
    /// Index of the first closed trade inside the active accounting window
    pub window_start: usize,
}

/// Per-session portfolio state
#[derive(Debug, Clone)]
pub struct PortfolioLedger {
    initial_balance: Decimal,
    total_balance: Decimal,
    available_balance: Decimal,
    active_margin: Decimal,
    realized_pnl: Decimal,
    unrealized_pnl: Decimal,
    reserved_profit: Decimal,
    sweep_threshold: Decimal,
    hedging: bool,
    positions: HashMap<PositionKey, Position>,
    closed_trades: Vec<ClosedTrade>,
    window_start: usize,
}

impl PortfolioLedger {
    pub fn new(config: &LedgerConfig, hedging: bool) -> Self {
        Self {
            initial_balance: config.initial_balance,
            total_balance: config.initial_balance,
            available_balance: config.initial_balance,
            active_margin: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            reserved_profit: Decimal::ZERO,
            sweep_threshold: config.sweep_threshold,
            hedging,
            positions: HashMap::new(),
            closed_trades: Vec::new(),
            window_start: 0,
        }
    }

    /// Rebuild a ledger from a snapshot
    pub fn restore(snapshot: LedgerSnapshot) -> Result<Self, RiskError> {
        let mut positions = HashMap::with_capacity(snapshot.open_positions.len());
        for position in snapshot.open_positions {
            let key = PositionKey::new(position.symbol.clone(), position.side);
            if positions.insert(key.clone(), position).is_some() {
                return Err(RiskError::InvalidPosition(format!(
                    "snapshot holds {} twice",
                    key
                )));
            }
        }

        let mut ledger = Self {
            initial_balance: snapshot.initial_balance,
            total_balance: snapshot.total_balance,
            available_balance: snapshot.available_balance,
            active_margin: snapshot.active_margin,
            realized_pnl: snapshot.realized_pnl,
            unrealized_pnl: snapshot.unrealized_pnl,
            reserved_profit: snapshot.reserved_profit,
            sweep_threshold: snapshot.sweep_threshold,
            hedging: snapshot.hedging,
            positions,
            window_start: snapshot.window_start.min(snapshot.closed_trades.len()),
            closed_trades: snapshot.closed_trades,
        };
        ledger.recompute()?;
        Ok(ledger)
    }

    /// Seed closed history from a journal. Seeded trades feed admission checks
    /// but stay outside the accounting window.
    pub fn load_history(&mut self, mut trades: Vec<ClosedTrade>) {
        let count = trades.len();
        trades.append(&mut self.closed_trades);
        self.closed_trades = trades;
        self.window_start += count;
        debug!(count, "Seeded closed trade history");
    }

    /// Admit an open position
    pub fn apply_open(&mut self, position: Position) -> Result<(), RiskError> {
        if position.state != PositionState::Open {
            return Err(RiskError::InvalidPosition(format!(
                "{} must be open to enter the ledger, found {:?}",
                position.symbol, position.state
            )));
        }

        let key = PositionKey::new(position.symbol.clone(), position.side);
        if self.positions.contains_key(&key) {
            return Err(RiskError::InvalidPosition(format!(
                "position already open for {}",
                key
            )));
        }
        let opposite = PositionKey::new(position.symbol.clone(), position.side.opposite());
        if !self.hedging && self.positions.contains_key(&opposite) {
            return Err(RiskError::InvalidPosition(format!(
                "{} already open and hedging is disabled",
                opposite
            )));
        }

        info!(
            key = %key,
            entry = %position.entry_price,
            quantity = %position.quantity,
            margin = %position.initial_value(),
            "Position opened"
        );
        self.positions.insert(key, position);
        self.recompute()
    }

    /// Record a closed trade, dropping its position from the open map
    pub fn apply_close(&mut self, trade: ClosedTrade) -> Result<(), RiskError> {
        let key = PositionKey::new(trade.symbol.clone(), trade.side);
        if let Some(position) = self.positions.get(&key) {
            if position.id == trade.id {
                self.positions.remove(&key);
            }
        }

        info!(
            key = %key,
            exit = %trade.exit_price,
            gross_pnl = %trade.gross_pnl,
            reason = ?trade.reason,
            "Position closed"
        );
        self.closed_trades.push(trade);
        self.recompute()
    }

    /// Close the open position under `key` at `exit_price`
    pub fn close_position(
        &mut self,
        key: &PositionKey,
        exit_price: Decimal,
        timestamp: DateTime<Utc>,
        reason: CloseReason,
    ) -> Result<ClosedTrade, RiskError> {
        let mut position = self.positions.remove(key).ok_or_else(|| RiskError::NoOpenPosition {
            symbol: key.symbol.clone(),
            side: key.side,
        })?;

        let trade = match position.close(exit_price, timestamp, reason) {
            Ok(trade) => trade,
            Err(e) => {
                self.positions.insert(key.clone(), position);
                return Err(e);
            }
        };
        self.apply_close(trade.clone())?;
        Ok(trade)
    }

    /// Mark the position under `key` as closing
    pub fn begin_close(&mut self, key: &PositionKey) -> Result<(), RiskError> {
        self.positions
            .get_mut(key)
            .ok_or_else(|| RiskError::NoOpenPosition {
                symbol: key.symbol.clone(),
                side: key.side,
            })?
            .begin_close()
    }

    /// Re-price every position on `symbol`, returning the keys whose stop triggered
    pub fn reprice_symbol(
        &mut self,
        symbol: &str,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<PositionKey>, RiskError> {
        let mut triggered = Vec::new();
        for side in [PositionSide::Long, PositionSide::Short] {
            let key = PositionKey::new(symbol, side);
            if let Some(position) = self.positions.get_mut(&key) {
                if position.reprice(price, timestamp)? == super::StopCheck::Triggered {
                    debug!(key = %key, price = %price, stop = %position.stop_price, "Stop triggered");
                    triggered.push(key);
                }
            }
        }
        self.recompute()?;
        Ok(triggered)
    }

    /// Move profit above the baseline into the reserve once flat.
    /// Returns the swept amount.
    pub fn try_sweep(&mut self) -> Option<Decimal> {
        if !self.positions.is_empty() {
            return None;
        }
        let excess = self.total_balance - self.initial_balance;
        if excess <= Decimal::ZERO || excess <= self.sweep_threshold {
            return None;
        }

        self.reserved_profit += excess;
        self.window_start = self.closed_trades.len();
        self.realized_pnl = Decimal::ZERO;
        self.unrealized_pnl = Decimal::ZERO;
        self.total_balance = self.initial_balance;
        self.available_balance = self.initial_balance;

        info!(
            swept = %excess,
            reserved = %self.reserved_profit,
            "Profit swept into reserve"
        );
        Some(excess)
    }

    fn recompute(&mut self) -> Result<(), RiskError> {
        self.realized_pnl = self.closed_trades[self.window_start..]
            .iter()
            .map(|t| t.gross_pnl)
            .sum();
        self.unrealized_pnl = self.positions.values().map(|p| p.gross_pnl).sum();
        self.active_margin = self.positions.values().map(|p| p.initial_value()).sum();
        self.total_balance = self.initial_balance + self.realized_pnl + self.unrealized_pnl;
        self.available_balance = self.total_balance - self.active_margin;

        if self.available_balance < Decimal::ZERO {
            return Err(RiskError::MarginExhausted(Box::new(self.snapshot())));
        }
        Ok(())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut open_positions: Vec<Position> = self.positions.values().cloned().collect();
        open_positions.sort_by(|a, b| (&a.symbol, a.side.as_str()).cmp(&(&b.symbol, b.side.as_str())));

        LedgerSnapshot {
            initial_balance: self.initial_balance,
            total_balance: self.total_balance,
            available_balance: self.available_balance,
            active_margin: self.active_margin,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl,
            reserved_profit: self.reserved_profit,
            sweep_threshold: self.sweep_threshold,
            hedging: self.hedging,
            open_positions,
            closed_trades: self.closed_trades.clone(),
            window_start: self.window_start,
        }
    }

    pub fn initial_balance(&self) -> Decimal {
        self.initial_balance
    }

    pub fn total_balance(&self) -> Decimal {
        self.total_balance
    }

    pub fn available_balance(&self) -> Decimal {
        self.available_balance
    }

    pub fn active_margin(&self) -> Decimal {
        self.active_margin
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.unrealized_pnl
    }

    pub fn reserved_profit(&self) -> Decimal {
        self.reserved_profit
    }

    /// Total balance plus the swept reserve
    pub fn equity(&self) -> Decimal {
        self.total_balance + self.reserved_profit
    }

    /// Notional exposure across open positions
    pub fn exposure(&self) -> Decimal {
        self.positions.values().map(|p| p.notional()).sum()
    }

    pub fn hedging(&self) -> bool {
        self.hedging
    }

    pub fn position(&self, key: &PositionKey) -> Option<&Position> {
        self.positions.get(key)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn open_keys(&self) -> Vec<PositionKey> {
        let mut keys: Vec<PositionKey> = self.positions.keys().cloned().collect();
        keys.sort_by(|a, b| (&a.symbol, a.side.as_str()).cmp(&(&b.symbol, b.side.as_str())));
        keys
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.positions.keys().any(|k| k.symbol == symbol)
    }

    pub fn is_open(&self, symbol: &str, side: PositionSide) -> bool {
        self.positions.contains_key(&PositionKey::new(symbol, side))
    }

    /// Full closed history, seeded trades included
    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed_trades
    }

    /// Closed trades of the active accounting window
    pub fn window_trades(&self) -> &[ClosedTrade] {
        &self.closed_trades[self.window_start..]
    }
}
