//! perp-engine: multi-resolution candle replay and risk engine for perpetual futures
//!
//! This library provides the core components for:
//! - Resampling base candles onto coarser intervals without look-ahead
//! - Precomputed lookback windows per base tick
//! - Position lifecycle, portfolio ledger and profit sweeping
//! - Tiered capital allocation and admission control
//! - Deterministic replay and event-driven live sessions
//! - Paper execution, Binance futures feeds and Parquet storage

pub mod candle;
pub mod cli;
pub mod config;
pub mod data;
pub mod engine;
pub mod execution;
pub mod feed;
pub mod live;
pub mod replay;
pub mod risk;
pub mod signal;
pub mod telemetry;
pub mod ws;
