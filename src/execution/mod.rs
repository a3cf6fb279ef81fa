//! Execution engine module
//!
//! Order execution sink (paper mode)

mod paper;
mod types;

pub use paper::PaperEngine;
pub use types::{
    AccountBalance, ExecutionError, Fill, OrderId, OrderRequest, OrderSide, OrderType,
};

use crate::config::MarginMode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Trait for execution engine implementations.
///
/// Every call may fail; callers issue one call per position transition.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Set leverage for a symbol
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExecutionError>;
    /// Set margin mode for a symbol
    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<(), ExecutionError>;
    /// Submit an order and wait for its fill
    async fn submit_order(&self, order: OrderRequest) -> Result<Fill, ExecutionError>;
    /// Current account balance
    async fn get_account_balance(&self) -> Result<AccountBalance, ExecutionError>;
    /// Feed the latest mark price, used by simulated venues
    async fn update_mark(&self, _symbol: &str, _price: Decimal, _timestamp: DateTime<Utc>) {}
}
