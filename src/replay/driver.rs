//! Deterministic replay over stored candles

use super::ReplayReport;
use crate::candle::{LookbackIndex, SyncedDataset};
use crate::config::{Config, ReplayConfig};
use crate::data::CandleStore;
use crate::engine::{EngineError, TradingEngine};
use crate::risk::CloseReason;
use crate::signal::Strategy;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

struct Market {
    dataset: SyncedDataset,
    index: LookbackIndex,
}

/// Drives every symbol's base ticks through the engine in one total order:
/// close time first, then symbol registration order.
pub struct ReplayDriver {
    markets: Vec<Market>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    close_at_end: bool,
}

impl ReplayDriver {
    pub fn new(config: &ReplayConfig) -> Self {
        Self {
            markets: Vec::new(),
            start: config.start,
            end: config.end,
            close_at_end: config.close_at_end,
        }
    }

    /// Register a symbol; its lookback index is built here, once
    pub fn add_dataset(&mut self, dataset: SyncedDataset, lookback: Duration) {
        let index = LookbackIndex::build(&dataset, lookback);
        info!(
            symbol = dataset.symbol(),
            ticks = dataset.len(),
            intervals = dataset.intervals().count(),
            "Replay dataset ready"
        );
        self.markets.push(Market { dataset, index });
    }

    /// Read every configured (symbol, interval) from the store and resample it
    pub fn load(store: &CandleStore, config: &Config) -> Result<Self, EngineError> {
        let mut driver = Self::new(&config.replay);
        let base_interval = config.engine.base_interval;

        for symbol in &config.engine.symbols {
            let base = store.read(symbol, base_interval)?;
            let coarser = config
                .engine
                .intervals
                .iter()
                .filter(|i| **i != base_interval)
                .map(|i| store.read(symbol, *i))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let dataset = SyncedDataset::build(&base, &coarser)?;
            driver.add_dataset(dataset, config.engine.lookback());
        }
        Ok(driver)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.markets.iter().map(|m| m.dataset.symbol())
    }

    fn in_range(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }

    /// (market, tick) pairs in replay order, range filter applied
    pub(crate) fn schedule(&self) -> Vec<(usize, usize)> {
        let mut cursors = vec![0usize; self.markets.len()];
        let mut order = Vec::with_capacity(self.markets.iter().map(|m| m.dataset.len()).sum());

        loop {
            let mut next: Option<(usize, DateTime<Utc>)> = None;
            for (m, market) in self.markets.iter().enumerate() {
                let Some(ts) = market.dataset.tick_time(cursors[m]) else {
                    continue;
                };
                // Strict comparison keeps the earlier-registered symbol on ties
                if next.map_or(true, |(_, best)| ts < best) {
                    next = Some((m, ts));
                }
            }
            let Some((m, ts)) = next else {
                break;
            };
            if self.in_range(ts) {
                order.push((m, cursors[m]));
            }
            cursors[m] += 1;
        }
        order
    }

    /// Replay to completion.
    ///
    /// Fatal errors dump the ledger and abort; anything else is logged and the
    /// tick skipped.
    pub async fn run(
        &self,
        engine: &mut TradingEngine,
        strategy: &mut dyn Strategy,
    ) -> Result<ReplayReport, EngineError> {
        let schedule = self.schedule();
        info!(
            ticks = schedule.len(),
            symbols = self.markets.len(),
            strategy = strategy.name(),
            "Starting replay"
        );

        let mut trades = Vec::new();
        let mut equity_curve: Vec<(DateTime<Utc>, Decimal)> = Vec::new();

        for &(m, tick) in &schedule {
            let market = &self.markets[m];
            let Some(view) = market.index.view(&market.dataset, tick) else {
                continue;
            };

            match engine
                .on_tick(view.symbol, view.price, view.time, &view, strategy)
                .await
            {
                Ok(report) => {
                    if !report.is_quiet() {
                        debug!(
                            symbol = %report.symbol,
                            time = %report.timestamp,
                            closed = report.closed.len(),
                            opened = report.opened.is_some(),
                            "Replay tick"
                        );
                    }
                    trades.extend(report.closed);
                }
                Err(e) if e.is_fatal() => {
                    engine.dump(&e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(symbol = view.symbol, time = %view.time, error = %e, "Tick skipped");
                }
            }

            let equity = engine.ledger().equity();
            match equity_curve.last_mut() {
                Some(last) if last.0 == view.time => last.1 = equity,
                _ => equity_curve.push((view.time, equity)),
            }
        }

        if self.close_at_end {
            match engine.close_all(CloseReason::EndOfReplay).await {
                Ok(closed) => trades.extend(closed),
                Err(e) => {
                    engine.dump(&e);
                    return Err(e);
                }
            }
            if let Some(last) = equity_curve.last_mut() {
                last.1 = engine.ledger().equity();
            }
        }

        let report = ReplayReport::new(
            trades,
            equity_curve,
            schedule.len(),
            engine.ledger().snapshot(),
        );
        info!(
            trades = report.summary.total_trades,
            net_pnl = %report.summary.net_pnl,
            reserved = %report.summary.reserved_profit,
            "Replay finished"
        );
        Ok(report)
    }
}
