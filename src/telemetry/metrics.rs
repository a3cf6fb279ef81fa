//! Prometheus metrics

use crate::risk::{ClosedTrade, PortfolioLedger, RejectReason};
use metrics_exporter_prometheus::PrometheusBuilder;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::time::Duration;

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// Candle poll round trip
    CandlePoll,
    /// Strategy evaluation
    SignalGeneration,
    /// Order submission until fill
    OrderSubmission,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Total balance plus reserved profit
    Equity,
    /// Unrealized P&L
    UnrealizedPnl,
    /// Realized P&L in the accounting window
    RealizedPnl,
    /// Profit swept into the reserve
    ReservedProfit,
    /// Open position count
    OpenPositions,
    /// Margin committed to open positions
    ActiveMargin,
}

impl GaugeMetric {
    fn name(&self) -> &'static str {
        match self {
            GaugeMetric::Equity => "perp_equity_usd",
            GaugeMetric::UnrealizedPnl => "perp_unrealized_pnl_usd",
            GaugeMetric::RealizedPnl => "perp_realized_pnl_usd",
            GaugeMetric::ReservedProfit => "perp_reserved_profit_usd",
            GaugeMetric::OpenPositions => "perp_open_positions",
            GaugeMetric::ActiveMargin => "perp_active_margin_usd",
        }
    }
}

/// Start the Prometheus scrape endpoint on `port`
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter: {}", e))?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    let metric_name = match metric {
        LatencyMetric::CandlePoll => "perp_candle_poll_latency_ms",
        LatencyMetric::SignalGeneration => "perp_signal_generation_latency_ms",
        LatencyMetric::OrderSubmission => "perp_order_submission_latency_ms",
    };
    metrics::histogram!(metric_name).record(duration.as_secs_f64() * 1000.0);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    metrics::gauge!(metric.name()).set(value);
}

fn as_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

/// Publish the ledger aggregates
pub fn record_ledger(ledger: &PortfolioLedger) {
    set_gauge(GaugeMetric::Equity, as_f64(ledger.equity()));
    set_gauge(GaugeMetric::UnrealizedPnl, as_f64(ledger.unrealized_pnl()));
    set_gauge(GaugeMetric::RealizedPnl, as_f64(ledger.realized_pnl()));
    set_gauge(GaugeMetric::ReservedProfit, as_f64(ledger.reserved_profit()));
    set_gauge(GaugeMetric::OpenPositions, ledger.open_count() as f64);
    set_gauge(GaugeMetric::ActiveMargin, as_f64(ledger.active_margin()));
}

/// Count a closed trade by close reason
pub fn record_trade_closed(trade: &ClosedTrade) {
    metrics::counter!("perp_trades_closed_total", "reason" => trade.reason.as_str()).increment(1);
    if trade.is_loss() {
        metrics::counter!("perp_losing_trades_total").increment(1);
    }
}

/// Count an admission rejection by reason
pub fn record_rejection(reason: &RejectReason) {
    metrics::counter!("perp_admission_rejections_total", "reason" => reason.as_str()).increment(1);
}
