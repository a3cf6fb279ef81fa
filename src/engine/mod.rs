//! Engine module
//!
//! Step logic shared by replay and live sessions

mod trading;
mod types;

pub use trading::{EngineSettings, TradingEngine};
pub use types::{EngineError, TickReport};

#[cfg(test)]
pub(crate) use trading::tests::{engine as test_engine, ScriptedStrategy};
