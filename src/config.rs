//! Configuration types for perp-engine

use crate::candle::Interval;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub allocator: AllocatorConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub stop_loss: StopLossConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub data: DataConfig,
    pub telemetry: TelemetryConfig,
}

/// Markets and trading parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Symbols to trade (e.g. "BTCUSDT")
    pub symbols: Vec<String>,
    /// Finest interval, drives the tick loop
    pub base_interval: Interval,
    /// Coarser intervals resampled onto the base ticks
    #[serde(default)]
    pub intervals: Vec<Interval>,
    /// Lookback window handed to the strategy (hours)
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u64,
    /// Taker fee rate applied on entry and exit notional
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
    /// Leverage used for new positions
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub margin_mode: MarginMode,
    /// Allow a long and a short on the same symbol
    #[serde(default)]
    pub hedging: bool,
}

fn default_lookback_hours() -> u64 {
    24
}
fn default_fee_rate() -> Decimal {
    Decimal::new(4, 4) // 0.0004 = 4 bps
}
fn default_leverage() -> u32 {
    5
}

impl EngineConfig {
    pub fn lookback(&self) -> Duration {
        Duration::hours(self.lookback_hours as i64)
    }
}

/// Margin mode passed to the execution sink
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    #[default]
    Isolated,
    Cross,
}

/// Portfolio ledger configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Funded baseline balance
    pub initial_balance: Decimal,
    /// Excess over the baseline that must accumulate before a sweep
    #[serde(default)]
    pub sweep_threshold: Decimal,
}

/// Tiered capital allocation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AllocatorConfig {
    /// Smallest capital tier
    #[serde(default = "default_base_target")]
    pub base_target: Decimal,
    /// Multipliers applied in turn to climb tiers
    #[serde(default = "default_growth_factors")]
    pub growth_factors: Vec<Decimal>,
    /// Fraction of the tier held back
    #[serde(default = "default_safety_ratio")]
    pub safety_ratio: Decimal,
    /// Upper bound on concurrent positions
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_positions: usize,
    /// Smallest per-trade amount the exchange accepts
    #[serde(default = "default_min_trade_amount")]
    pub min_trade_amount: Decimal,
}

fn default_base_target() -> Decimal {
    Decimal::from(5)
}
fn default_growth_factors() -> Vec<Decimal> {
    vec![Decimal::from(2), Decimal::from(3)]
}
fn default_safety_ratio() -> Decimal {
    Decimal::new(2, 1) // 0.2
}
fn default_max_concurrent() -> usize {
    3
}
fn default_min_trade_amount() -> Decimal {
    Decimal::from(5)
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            base_target: default_base_target(),
            growth_factors: default_growth_factors(),
            safety_ratio: default_safety_ratio(),
            max_concurrent_positions: default_max_concurrent(),
            min_trade_amount: default_min_trade_amount(),
        }
    }
}

/// Admission control configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdmissionConfig {
    /// Maximum open positions across all symbols
    #[serde(default = "default_max_concurrent")]
    pub max_open_positions: usize,
    /// Losing trades per (symbol, scenario) tolerated inside the recovery window
    #[serde(default = "default_loss_streak_limit")]
    pub loss_streak_limit: usize,
    /// Recovery window (hours)
    #[serde(default = "default_recovery_window_hours")]
    pub recovery_window_hours: u64,
}

fn default_loss_streak_limit() -> usize {
    2
}
fn default_recovery_window_hours() -> u64 {
    24
}

impl AdmissionConfig {
    pub fn recovery_window(&self) -> Duration {
        Duration::hours(self.recovery_window_hours as i64)
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_open_positions: default_max_concurrent(),
            loss_streak_limit: default_loss_streak_limit(),
            recovery_window_hours: default_recovery_window_hours(),
        }
    }
}

/// Stop-loss policy selection
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StopPolicyKind {
    /// Trailing stop at a fixed distance from the watermark
    #[default]
    Static,
    /// Stop that also tightens with time in the trade
    Scaled,
}

/// Stop-loss configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StopLossConfig {
    #[serde(default)]
    pub policy: StopPolicyKind,
    /// Trailing distance from the watermark
    #[serde(default = "default_stop_rate")]
    pub stop_rate: Decimal,
    /// Starting distance below entry (scaled policy)
    #[serde(default = "default_initial_stop_rate")]
    pub initial_stop_rate: Decimal,
    /// Distance removed per decay interval (scaled policy)
    #[serde(default = "default_decay_rate")]
    pub decay_rate: Decimal,
    /// Decay step length in minutes (scaled policy)
    #[serde(default = "default_decay_interval_mins")]
    pub decay_interval_mins: u64,
}

fn default_stop_rate() -> Decimal {
    Decimal::new(2, 2) // 0.02
}
fn default_initial_stop_rate() -> Decimal {
    Decimal::new(5, 2) // 0.05
}
fn default_decay_rate() -> Decimal {
    Decimal::new(5, 3) // 0.005
}
fn default_decay_interval_mins() -> u64 {
    30
}

impl StopLossConfig {
    pub fn decay_interval(&self) -> Duration {
        Duration::minutes(self.decay_interval_mins as i64)
    }
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            policy: StopPolicyKind::Static,
            stop_rate: default_stop_rate(),
            initial_stop_rate: default_initial_stop_rate(),
            decay_rate: default_decay_rate(),
            decay_interval_mins: default_decay_interval_mins(),
        }
    }
}

/// Replay (backtest) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplayConfig {
    /// Close whatever is still open at the last tick
    #[serde(default = "default_true")]
    pub close_at_end: bool,
    /// Inclusive start filter on base ticks
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Inclusive end filter on base ticks
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            close_at_end: true,
            start: None,
            end: None,
        }
    }
}

/// Live (event driven) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiveConfig {
    /// Bounded queue capacity between producers and the consumer
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Timeout on every queue read, bounds stop-signal latency
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// Delay after an interval boundary before polling
    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,
    /// Account balance refresh period
    #[serde(default = "default_account_refresh_secs")]
    pub account_refresh_secs: u64,
    /// Subscribe to the streaming feed in addition to polling
    #[serde(default = "default_true")]
    pub streaming: bool,
    /// Close open positions on a clean shutdown instead of persisting them
    #[serde(default)]
    pub flatten_on_shutdown: bool,
}

fn default_queue_capacity() -> usize {
    1024
}
fn default_receive_timeout_ms() -> u64 {
    1000
}
fn default_poll_delay_ms() -> u64 {
    1500
}
fn default_account_refresh_secs() -> u64 {
    60
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            receive_timeout_ms: default_receive_timeout_ms(),
            poll_delay_ms: default_poll_delay_ms(),
            account_refresh_secs: default_account_refresh_secs(),
            streaming: true,
            flatten_on_shutdown: false,
        }
    }
}

/// Market data feed configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Candles per REST page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Attempts per request before escalating
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// WebSocket reconnects before escalating
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_rest_url() -> String {
    "https://fapi.binance.com".to_string()
}
fn default_ws_url() -> String {
    "wss://fstream.binance.com".to_string()
}
fn default_page_size() -> usize {
    1000
}
fn default_max_retries() -> u32 {
    5
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_max_reconnects() -> u32 {
    10
}
fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            ws_url: default_ws_url(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_reconnects: default_max_reconnects(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataConfig {
    /// Parquet candle directory
    #[serde(default = "default_candle_dir")]
    pub candle_dir: PathBuf,
    /// Append-only closed trade journal
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
    /// Ledger snapshot used for resume and post-mortem dumps
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

fn default_candle_dir() -> PathBuf {
    PathBuf::from("./data/candles")
}
fn default_journal_path() -> PathBuf {
    PathBuf::from("./data/trades.jsonl")
}
fn default_snapshot_path() -> PathBuf {
    PathBuf::from("./data/ledger.json")
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            candle_dir: default_candle_dir(),
            journal_path: default_journal_path(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    /// Prometheus exporter port, disabled when absent
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.engine.symbols.is_empty(), "engine.symbols is empty");
        anyhow::ensure!(self.engine.leverage >= 1, "engine.leverage must be >= 1");
        anyhow::ensure!(
            self.engine.fee_rate >= Decimal::ZERO,
            "engine.fee_rate must be non-negative"
        );
        for interval in &self.engine.intervals {
            anyhow::ensure!(
                *interval > self.engine.base_interval,
                "interval {} is not coarser than base {}",
                interval,
                self.engine.base_interval
            );
        }
        anyhow::ensure!(
            self.ledger.initial_balance > Decimal::ZERO,
            "ledger.initial_balance must be positive"
        );
        anyhow::ensure!(
            self.allocator.safety_ratio >= Decimal::ZERO && self.allocator.safety_ratio < Decimal::ONE,
            "allocator.safety_ratio must be in [0, 1)"
        );
        anyhow::ensure!(
            self.allocator.base_target > Decimal::ZERO,
            "allocator.base_target must be positive"
        );
        anyhow::ensure!(
            self.allocator.growth_factors.iter().all(|f| *f > Decimal::ONE),
            "allocator.growth_factors must all exceed 1"
        );
        anyhow::ensure!(
            self.allocator.max_concurrent_positions >= 1,
            "allocator.max_concurrent_positions must be >= 1"
        );
        anyhow::ensure!(
            self.admission.loss_streak_limit >= 1,
            "admission.loss_streak_limit must be >= 1"
        );
        anyhow::ensure!(
            self.stop_loss.stop_rate > Decimal::ZERO && self.stop_loss.stop_rate < Decimal::ONE,
            "stop_loss.stop_rate must be in (0, 1)"
        );
        if self.stop_loss.policy == StopPolicyKind::Scaled {
            anyhow::ensure!(
                self.stop_loss.decay_interval_mins > 0,
                "stop_loss.decay_interval_mins must be positive for the scaled policy"
            );
            anyhow::ensure!(
                self.stop_loss.initial_stop_rate < Decimal::ONE,
                "stop_loss.initial_stop_rate must be below 1"
            );
        }
        Ok(())
    }
}
