//! Trading engine: one step per base tick

use super::{EngineError, TickReport};
use crate::candle::MarketView;
use crate::config::{Config, MarginMode};
use crate::data::{write_snapshot, TradeJournal};
use crate::execution::{ExecutionEngine, Fill, OrderRequest, OrderSide};
use crate::risk::{
    Admission, AdmissionGuard, CapitalAllocator, CloseReason, ClosedTrade, LedgerSnapshot,
    OpenRequest, PortfolioLedger, Position, PositionKey, RejectReason, RiskError, StopPolicy,
};
use crate::signal::{Signal, SignalIntent, Strategy};
use crate::telemetry::{self, LatencyMetric};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Quantity precision sent to the venue
const QUANTITY_DP: u32 = 6;

/// Per-session trading parameters
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub leverage: u32,
    pub fee_rate: Decimal,
    pub margin_mode: MarginMode,
}

/// Wires ledger, sizing, admission and execution together.
///
/// Every collaborator is injected; the engine is the single writer of the ledger.
pub struct TradingEngine {
    ledger: PortfolioLedger,
    allocator: CapitalAllocator,
    guard: AdmissionGuard,
    policy: StopPolicy,
    execution: Arc<dyn ExecutionEngine>,
    settings: EngineSettings,
    journal: Option<TradeJournal>,
    dump_path: Option<PathBuf>,
    /// Symbols whose leverage and margin mode were pushed to the venue
    prepared: HashSet<String>,
}

impl TradingEngine {
    pub fn new(
        ledger: PortfolioLedger,
        allocator: CapitalAllocator,
        guard: AdmissionGuard,
        policy: StopPolicy,
        execution: Arc<dyn ExecutionEngine>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            ledger,
            allocator,
            guard,
            policy,
            execution,
            settings,
            journal: None,
            dump_path: None,
            prepared: HashSet::new(),
        }
    }

    /// Build every component from configuration around a fresh ledger
    pub fn from_config(config: &Config, execution: Arc<dyn ExecutionEngine>) -> Self {
        Self::new(
            PortfolioLedger::new(&config.ledger, config.engine.hedging),
            CapitalAllocator::new(config.allocator.clone()),
            AdmissionGuard::new(&config.admission),
            StopPolicy::from_config(&config.stop_loss),
            execution,
            EngineSettings {
                leverage: config.engine.leverage,
                fee_rate: config.engine.fee_rate,
                margin_mode: config.engine.margin_mode,
            },
        )
    }

    /// Append every closed trade to `journal`
    pub fn with_journal(mut self, journal: TradeJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Write the ledger here on fatal errors and on [`TradingEngine::save_snapshot`]
    pub fn with_dump_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dump_path = Some(path.into());
        self
    }

    /// Replace the ledger, e.g. with a restored snapshot
    pub fn with_ledger(mut self, ledger: PortfolioLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn ledger(&self) -> &PortfolioLedger {
        &self.ledger
    }

    /// Seed admission history from earlier sessions
    pub fn load_history(&mut self, trades: Vec<ClosedTrade>) {
        self.ledger.load_history(trades);
    }

    /// Run one base tick for `symbol`.
    ///
    /// Order: mark update, reprice, stop closes, sweep, strategy, then either a
    /// signal close or an admission-checked open.
    pub async fn on_tick(
        &mut self,
        symbol: &str,
        price: Decimal,
        timestamp: DateTime<Utc>,
        view: &MarketView<'_>,
        strategy: &mut dyn Strategy,
    ) -> Result<TickReport, EngineError> {
        let mut report = TickReport::new(symbol, timestamp, price);

        self.execution.update_mark(symbol, price, timestamp).await;

        let triggered = self.ledger.reprice_symbol(symbol, price, timestamp)?;
        for key in triggered {
            let trade = self.close(&key, CloseReason::StopLoss).await?;
            report.closed.push(trade);
        }

        report.swept = self.ledger.try_sweep();

        let started = Instant::now();
        let signal = strategy.evaluate(view).await;
        telemetry::record_latency(LatencyMetric::SignalGeneration, started.elapsed());

        if signal.approved {
            if signal.symbol != symbol {
                warn!(
                    strategy = strategy.name(),
                    expected = symbol,
                    got = %signal.symbol,
                    "Ignoring signal for another symbol"
                );
            } else {
                self.apply_signal(&signal, price, timestamp, &mut report)
                    .await?;
                report.signal = Some(signal);
            }
        }

        telemetry::record_ledger(&self.ledger);
        Ok(report)
    }

    async fn apply_signal(
        &mut self,
        signal: &Signal,
        price: Decimal,
        timestamp: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), EngineError> {
        match signal.intent {
            SignalIntent::Close => {
                let key = PositionKey::new(signal.symbol.clone(), signal.side);
                if self.ledger.position(&key).is_some() {
                    let trade = self.close(&key, CloseReason::Signal).await?;
                    report.closed.push(trade);
                } else {
                    debug!(key = %key, "Close signal with nothing open");
                }
            }
            SignalIntent::Open => match self.open(signal, price, timestamp).await? {
                Ok(key) => report.opened = Some(key),
                Err(reason) => {
                    debug!(symbol = %signal.symbol, scenario = %signal.scenario_id, %reason, "Open rejected");
                    telemetry::record_rejection(&reason);
                    report.rejected = Some(reason);
                }
            },
        }
        Ok(())
    }

    /// Admission, sizing, order and ledger entry for an open signal.
    /// The inner result carries ordinary rejections.
    async fn open(
        &mut self,
        signal: &Signal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<Result<PositionKey, RejectReason>, EngineError> {
        let allocation = self.allocator.allocate(self.ledger.total_balance());
        if let Admission::Rejected(reason) = self.guard.check_allocation(
            &self.ledger,
            &allocation,
            &signal.symbol,
            signal.side,
            &signal.scenario_id,
            timestamp,
        ) {
            return Ok(Err(reason));
        }

        let margin = allocation.per_trade_amount;
        let leverage = Decimal::from(self.settings.leverage);
        let notional = margin * leverage;
        let required = margin + notional * self.settings.fee_rate * Decimal::TWO;
        let available = self.ledger.available_balance();
        if required > available {
            return Ok(Err(RejectReason::InsufficientMargin {
                required,
                available,
            }));
        }

        let quantity = (notional / price).round_dp(QUANTITY_DP);
        if quantity <= Decimal::ZERO {
            return Ok(Err(RejectReason::InsufficientMargin {
                required,
                available,
            }));
        }

        self.prepare_symbol(&signal.symbol).await?;

        let mut position = Position::open(OpenRequest {
            symbol: signal.symbol.clone(),
            side: signal.side,
            scenario_id: signal.scenario_id.clone(),
            quantity,
            leverage: self.settings.leverage,
            entry_price: price,
            timestamp,
            fee_rate: self.settings.fee_rate,
            policy: self.policy.clone(),
        })?;

        let fill = self
            .submit(
                OrderRequest::market(signal.symbol.clone(), OrderSide::opening(signal.side), quantity)
                    .position_side(signal.side),
            )
            .await?;
        position.confirm(fill.price, fill.timestamp)?;

        let key = PositionKey::new(signal.symbol.clone(), signal.side);
        info!(
            key = %key,
            scenario = %signal.scenario_id,
            confidence = %signal.confidence,
            tier = %allocation.tier,
            margin = %margin,
            "Opening position"
        );
        self.ledger.apply_open(position)?;
        Ok(Ok(key))
    }

    /// Push leverage and margin mode once per symbol
    async fn prepare_symbol(&mut self, symbol: &str) -> Result<(), EngineError> {
        if self.prepared.contains(symbol) {
            return Ok(());
        }
        self.execution
            .set_leverage(symbol, self.settings.leverage)
            .await?;
        self.execution
            .set_margin_mode(symbol, self.settings.margin_mode)
            .await?;
        self.prepared.insert(symbol.to_string());
        Ok(())
    }

    async fn submit(&self, order: OrderRequest) -> Result<Fill, EngineError> {
        let started = Instant::now();
        let fill = self.execution.submit_order(order).await?;
        telemetry::record_latency(LatencyMetric::OrderSubmission, started.elapsed());
        Ok(fill)
    }

    /// Exit the position under `key` with a reduce-only market order
    async fn close(&mut self, key: &PositionKey, reason: CloseReason) -> Result<ClosedTrade, EngineError> {
        let quantity = self
            .ledger
            .position(key)
            .map(|p| p.quantity)
            .ok_or_else(|| RiskError::NoOpenPosition {
                symbol: key.symbol.clone(),
                side: key.side,
            })?;

        self.ledger.begin_close(key)?;
        let fill = self
            .submit(
                OrderRequest::market(key.symbol.clone(), OrderSide::closing(key.side), quantity)
                    .reduce_only()
                    .position_side(key.side),
            )
            .await?;
        let trade = self
            .ledger
            .close_position(key, fill.price, fill.timestamp, reason)?;

        if let Some(journal) = self.journal.as_mut() {
            journal.append(&trade)?;
        }
        telemetry::record_trade_closed(&trade);
        Ok(trade)
    }

    /// Close everything still open, in key order
    pub async fn close_all(&mut self, reason: CloseReason) -> Result<Vec<ClosedTrade>, EngineError> {
        let mut closed = Vec::new();
        for key in self.ledger.open_keys() {
            closed.push(self.close(&key, reason).await?);
        }
        if !closed.is_empty() {
            info!(count = closed.len(), ?reason, "Closed remaining positions");
        }
        self.ledger.try_sweep();
        telemetry::record_ledger(&self.ledger);
        Ok(closed)
    }

    /// Persist the ledger for resume
    pub fn save_snapshot(&self) -> Result<(), EngineError> {
        if let Some(path) = &self.dump_path {
            write_snapshot(path, &self.ledger.snapshot())?;
        }
        Ok(())
    }

    /// Log a full ledger dump for a fatal error and write it to the dump path
    pub fn dump(&self, cause: &EngineError) -> LedgerSnapshot {
        let snapshot = match cause {
            EngineError::Risk(RiskError::MarginExhausted(snapshot)) => (**snapshot).clone(),
            _ => self.ledger.snapshot(),
        };
        let rendered = serde_json::to_string(&snapshot).unwrap_or_else(|e| e.to_string());
        error!(error = %cause, ledger = %rendered, "Fatal engine error, session halted");

        if let Some(path) = &self.dump_path {
            if let Err(e) = write_snapshot(path, &snapshot) {
                error!(path = ?path, error = %e, "Failed to write ledger dump");
            }
        }
        snapshot
    }
}
