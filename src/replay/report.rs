//! Replay analytics and reporting

use crate::risk::{CloseReason, ClosedTrade, LedgerSnapshot};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// Summary statistics from a replay
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplaySummary {
    /// Price P&L before fees
    pub total_pnl: Decimal,
    /// P&L after fees
    pub net_pnl: Decimal,
    pub total_fees: Decimal,
    /// Profit swept out of the trading balance
    pub reserved_profit: Decimal,
    /// Trading balance at the end of the run
    pub final_balance: Decimal,
    /// Fraction of trades with positive P&L after fees
    pub win_rate: Decimal,
    /// Gross profit over gross loss, `None` when there were no losses
    pub profit_factor: Option<Decimal>,
    /// Maximum drawdown of equity (absolute)
    pub max_drawdown: Decimal,
    /// Maximum drawdown as a fraction of peak equity
    pub max_drawdown_pct: Decimal,
    pub total_trades: usize,
    pub stop_loss_exits: usize,
    /// Average time in trade, seconds
    pub avg_trade_duration_secs: i64,
}

impl ReplaySummary {
    pub fn from_run(
        trades: &[ClosedTrade],
        equity_curve: &[(DateTime<Utc>, Decimal)],
        snapshot: &LedgerSnapshot,
    ) -> Self {
        let mut gross_profit = Decimal::ZERO;
        let mut gross_loss = Decimal::ZERO;
        let mut wins = 0usize;
        for trade in trades {
            if trade.gross_pnl > Decimal::ZERO {
                wins += 1;
                gross_profit += trade.gross_pnl;
            } else if trade.gross_pnl < Decimal::ZERO {
                gross_loss += trade.gross_pnl;
            }
        }

        let total_trades = trades.len();
        let win_rate = if total_trades > 0 {
            Decimal::from(wins) / Decimal::from(total_trades)
        } else {
            Decimal::ZERO
        };
        let profit_factor = if gross_loss < Decimal::ZERO {
            Some(gross_profit / gross_loss.abs())
        } else {
            None
        };
        let avg_trade_duration_secs = if total_trades > 0 {
            trades.iter().map(|t| t.duration().num_seconds()).sum::<i64>() / total_trades as i64
        } else {
            0
        };
        let (max_drawdown, max_drawdown_pct) = max_drawdown(equity_curve);

        Self {
            total_pnl: trades.iter().map(|t| t.net_pnl).sum(),
            net_pnl: trades.iter().map(|t| t.gross_pnl).sum(),
            total_fees: trades.iter().map(|t| t.fees()).sum(),
            reserved_profit: snapshot.reserved_profit,
            final_balance: snapshot.total_balance,
            win_rate,
            profit_factor,
            max_drawdown,
            max_drawdown_pct,
            total_trades,
            stop_loss_exits: trades
                .iter()
                .filter(|t| t.reason == CloseReason::StopLoss)
                .count(),
            avg_trade_duration_secs,
        }
    }

    /// Format as table for CLI output
    pub fn format_table(&self) -> String {
        let profit_factor = self
            .profit_factor
            .map(|pf| format!("{:.2}", pf))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            r#"
══════════════════════════════════════════════════════
               REPLAY RESULTS
══════════════════════════════════════════════════════

PERFORMANCE
───────────────────────────────────────────────────────
Net P&L:          {:+.2}
Price P&L:        {:+.2}
Fees:             {:.2}
Reserved Profit:  {:.2}
Final Balance:    {:.2}
Max Drawdown:     {:.2} ({:.2}%)
Win Rate:         {:.1}%
Profit Factor:    {}

ACTIVITY
───────────────────────────────────────────────────────
Total Trades:     {}
Stop-loss Exits:  {}
Avg Duration:     {}s
══════════════════════════════════════════════════════
"#,
            self.net_pnl,
            self.total_pnl,
            self.total_fees,
            self.reserved_profit,
            self.final_balance,
            self.max_drawdown,
            self.max_drawdown_pct * dec!(100),
            self.win_rate * dec!(100),
            profit_factor,
            self.total_trades,
            self.stop_loss_exits,
            self.avg_trade_duration_secs,
        )
    }
}

/// Absolute and fractional drawdown from the running peak
fn max_drawdown(equity_curve: &[(DateTime<Utc>, Decimal)]) -> (Decimal, Decimal) {
    let Some(&(_, first)) = equity_curve.first() else {
        return (Decimal::ZERO, Decimal::ZERO);
    };

    let mut peak = first;
    let mut max_dd = Decimal::ZERO;
    let mut max_dd_pct = Decimal::ZERO;
    for &(_, equity) in equity_curve {
        peak = peak.max(equity);
        let dd = peak - equity;
        max_dd = max_dd.max(dd);
        if peak > Decimal::ZERO {
            max_dd_pct = max_dd_pct.max(dd / peak);
        }
    }
    (max_dd, max_dd_pct)
}

/// Complete replay results
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub summary: ReplaySummary,
    /// Closed trades of this run, in close order
    pub trades: Vec<ClosedTrade>,
    /// Equity (balance plus reserve) after each base tick time
    pub equity_curve: Vec<(DateTime<Utc>, Decimal)>,
    /// Base ticks driven through the engine
    pub ticks: usize,
    pub ledger: LedgerSnapshot,
}

impl ReplayReport {
    pub fn new(
        trades: Vec<ClosedTrade>,
        equity_curve: Vec<(DateTime<Utc>, Decimal)>,
        ticks: usize,
        ledger: LedgerSnapshot,
    ) -> Self {
        Self {
            summary: ReplaySummary::from_run(&trades, &equity_curve, &ledger),
            trades,
            equity_curve,
            ticks,
            ledger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::risk::position::tests::{open_position, t0};
    use crate::risk::{PortfolioLedger, PositionSide, StopPolicy};
    use chrono::Duration;

    fn trade(exit: Decimal, reason: CloseReason, minutes: i64) -> ClosedTrade {
        let mut position = open_position(
            PositionSide::Long,
            StopPolicy::Static {
                stop_rate: dec!(0.5),
            },
        );
        position
            .close(exit, t0() + Duration::minutes(minutes), reason)
            .unwrap()
    }

    fn snapshot() -> LedgerSnapshot {
        PortfolioLedger::new(
            &LedgerConfig {
                initial_balance: dec!(1000),
                sweep_threshold: dec!(0),
            },
            false,
        )
        .snapshot()
    }

    #[test]
    fn test_max_drawdown() {
        let curve = vec![
            (t0(), dec!(100)),
            (t0(), dec!(120)),
            (t0(), dec!(90)),
            (t0(), dec!(130)),
            (t0(), dec!(117)),
        ];
        let (dd, pct) = max_drawdown(&curve);
        assert_eq!(dd, dec!(30));
        assert_eq!(pct, dec!(0.25));
        assert_eq!(max_drawdown(&[]), (Decimal::ZERO, Decimal::ZERO));
    }

    #[test]
    fn test_summary_statistics() {
        // Entry 100, quantity 2, fee rate 0.001
        let trades = vec![
            trade(dec!(110), CloseReason::Signal, 10),
            trade(dec!(95), CloseReason::StopLoss, 20),
            trade(dec!(105), CloseReason::EndOfReplay, 30),
        ];
        let summary = ReplaySummary::from_run(&trades, &[], &snapshot());

        assert_eq!(summary.total_trades, 3);
        assert_eq!(summary.stop_loss_exits, 1);
        assert_eq!(summary.total_pnl, dec!(20));
        assert_eq!(summary.total_fees, dec!(1.22));
        assert_eq!(summary.net_pnl, summary.total_pnl - summary.total_fees);
        assert_eq!(summary.win_rate * dec!(3), dec!(2));
        assert_eq!(summary.avg_trade_duration_secs, 20 * 60);
        assert_eq!(
            summary.profit_factor,
            Some((dec!(19.58) + dec!(9.59)) / dec!(10.39))
        );
    }

    #[test]
    fn test_no_losses_has_no_profit_factor() {
        let trades = vec![trade(dec!(110), CloseReason::Signal, 5)];
        let summary = ReplaySummary::from_run(&trades, &[], &snapshot());
        assert_eq!(summary.profit_factor, None);
        assert!(summary.format_table().contains("n/a"));
    }

    #[test]
    fn test_empty_run() {
        let summary = ReplaySummary::from_run(&[], &[], &snapshot());
        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.win_rate, Decimal::ZERO);
        assert_eq!(summary.final_balance, dec!(1000));
    }
}
