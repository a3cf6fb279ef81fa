//! Execution types

use crate::risk::PositionSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Order identifier
pub type OrderId = Uuid;

/// Execution sink failures
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Order rejected for {symbol}: {reason}")]
    Rejected { symbol: String, reason: String },
    #[error("No mark price for {0}")]
    NoMarkPrice(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Order direction on the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Side that opens a position
    pub fn opening(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Side that closes a position
    pub fn closing(side: PositionSide) -> Self {
        Self::opening(side.opposite())
    }

    fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    /// Signed quantity, buys positive
    pub fn signed(&self, quantity: Decimal) -> Decimal {
        self.sign() * quantity
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Market order (immediate execution)
    Market,
    /// Limit order (price specified)
    Limit,
}

/// An order to be submitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Limit price, ignored for market orders
    pub price: Option<Decimal>,
    /// Only reduce an existing position
    pub reduce_only: bool,
    /// Hedge-mode leg; `None` nets every fill on the symbol
    #[serde(default)]
    pub position_side: Option<PositionSide>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            id: OrderId::new_v4(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            reduce_only: false,
            position_side: None,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    /// Target one leg of a hedged symbol
    pub fn position_side(mut self, side: PositionSide) -> Self {
        self.position_side = Some(side);
        self
    }
}

/// A fill (executed trade)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Account state reported by the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub available: Decimal,
    pub total: Decimal,
    pub open_positions: usize,
    pub updated_at: DateTime<Utc>,
}
