//! Channel breakout reference strategy

use super::{Signal, Strategy};
use crate::candle::{Interval, MarketView};
use crate::risk::PositionSide;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::trace;

/// Enters when the base price clears the channel formed by the prior candles of a
/// confirmation interval, exits when it breaks the opposite side of the channel.
pub struct BreakoutStrategy {
    confirm_interval: Interval,
    side: PositionSide,
    min_bars: usize,
    scenario_id: String,
}

impl BreakoutStrategy {
    pub fn new(confirm_interval: Interval, side: PositionSide, min_bars: usize) -> Self {
        Self {
            confirm_interval,
            side,
            min_bars: min_bars.max(1),
            scenario_id: format!("breakout_{}_{}", confirm_interval, side),
        }
    }

    pub fn scenario_id(&self) -> &str {
        &self.scenario_id
    }

    /// Highest high and lowest low over the candles before the forming one
    fn channel(&self, view: &MarketView<'_>) -> Option<(Decimal, Decimal)> {
        let candles = view.candles(self.confirm_interval);
        let prior = candles.split_last()?.1;
        if prior.len() < self.min_bars {
            return None;
        }
        let high = prior.iter().map(|c| c.high).max()?;
        let low = prior.iter().map(|c| c.low).min()?;
        Some((high, low))
    }
}

#[async_trait]
impl Strategy for BreakoutStrategy {
    fn name(&self) -> &str {
        &self.scenario_id
    }

    async fn evaluate(&mut self, view: &MarketView<'_>) -> Signal {
        let Some((high, low)) = self.channel(view) else {
            return Signal::none(view.symbol, view.time);
        };
        let price = view.price;
        trace!(symbol = view.symbol, %price, %high, %low, "Breakout channel");

        let (entry, exit) = match self.side {
            PositionSide::Long => (price > high, price < low),
            PositionSide::Short => (price < low, price > high),
        };

        if entry {
            let width = high - low;
            let distance = match self.side {
                PositionSide::Long => price - high,
                PositionSide::Short => low - price,
            };
            let confidence = if width > Decimal::ZERO {
                (distance / width).min(Decimal::ONE)
            } else {
                Decimal::ONE
            };
            Signal::open(view.symbol, self.side, &self.scenario_id, confidence, view.time)
        } else if exit {
            Signal::close(view.symbol, self.side, &self.scenario_id, view.time)
        } else {
            Signal::none(view.symbol, view.time)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::series::tests::candle_at;
    use crate::candle::{CandleSeries, LookbackIndex, SyncedDataset};
    use crate::signal::SignalIntent;
    use chrono::Duration;

    /// 1m closes following `prices`, resampled to 5m
    fn dataset(prices: &[i64]) -> SyncedDataset {
        let base = CandleSeries::new(
            "BTCUSDT",
            Interval::M1,
            prices
                .iter()
                .enumerate()
                .map(|(i, p)| candle_at(Interval::M1, i as i64, *p))
                .collect(),
        )
        .unwrap();

        let coarse = CandleSeries::new(
            "BTCUSDT",
            Interval::M5,
            prices
                .chunks(5)
                .enumerate()
                .map(|(i, chunk)| {
                    let mut c = candle_at(Interval::M5, i as i64, chunk[0]);
                    c.high = rust_decimal::Decimal::from(*chunk.iter().max().unwrap() + 1);
                    c.low = rust_decimal::Decimal::from(*chunk.iter().min().unwrap() - 1);
                    c.close = rust_decimal::Decimal::from(*chunk.last().unwrap());
                    c
                })
                .collect(),
        )
        .unwrap();

        SyncedDataset::build(&base, &[coarse]).unwrap()
    }

    #[tokio::test]
    async fn test_no_signal_without_history() {
        let ds = dataset(&[100; 10]);
        let index = LookbackIndex::build(&ds, Duration::hours(1));
        let mut strategy = BreakoutStrategy::new(Interval::M5, PositionSide::Long, 2);

        let signal = strategy.evaluate(&index.view(&ds, 3).unwrap()).await;
        assert!(!signal.approved);
    }

    #[tokio::test]
    async fn test_long_breakout_and_exit() {
        let mut prices = vec![100; 10];
        prices.extend([100, 120, 100, 90, 80]);
        let ds = dataset(&prices);
        let index = LookbackIndex::build(&ds, Duration::hours(1));
        let mut strategy = BreakoutStrategy::new(Interval::M5, PositionSide::Long, 2);

        // Channel over the first two 5m bars is [99, 101]
        let hold = strategy.evaluate(&index.view(&ds, 10).unwrap()).await;
        assert!(!hold.approved);

        let entry = strategy.evaluate(&index.view(&ds, 11).unwrap()).await;
        assert!(entry.is_open());
        assert_eq!(entry.side, PositionSide::Long);
        assert_eq!(entry.scenario_id, "breakout_5m_long");
        assert_eq!(entry.confidence, Decimal::ONE);

        let exit = strategy.evaluate(&index.view(&ds, 13).unwrap()).await;
        assert_eq!(exit.intent, SignalIntent::Close);
        assert!(exit.is_close());
    }

    #[tokio::test]
    async fn test_short_breakdown() {
        let mut prices = vec![100; 10];
        prices.push(98);
        let ds = dataset(&prices);
        let index = LookbackIndex::build(&ds, Duration::hours(1));
        let mut strategy = BreakoutStrategy::new(Interval::M5, PositionSide::Short, 2);

        let entry = strategy.evaluate(&index.view(&ds, 10).unwrap()).await;
        assert!(entry.is_open());
        assert_eq!(entry.side, PositionSide::Short);
        // One unit below a two-unit channel
        assert_eq!(entry.confidence, Decimal::new(5, 1));
    }
}
