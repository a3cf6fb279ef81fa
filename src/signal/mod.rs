//! Signal module
//!
//! Strategy interface and the reference breakout strategy

mod breakout;
mod types;

pub use breakout::BreakoutStrategy;
pub use types::{Signal, SignalIntent};

use crate::candle::MarketView;
use async_trait::async_trait;

/// Decides whether to trade from a causal market view
#[async_trait]
pub trait Strategy: Send {
    /// Name used in logs
    fn name(&self) -> &str;
    /// Evaluate one base tick
    async fn evaluate(&mut self, view: &MarketView<'_>) -> Signal;
}
