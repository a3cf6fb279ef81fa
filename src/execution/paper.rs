//! Paper trading execution engine

use super::{
    AccountBalance, ExecutionEngine, ExecutionError, Fill, OrderRequest, OrderType,
};
use crate::config::MarginMode;
use crate::risk::PositionSide;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct NetPosition {
    /// Signed quantity, long positive
    quantity: Decimal,
    avg_price: Decimal,
}

#[derive(Debug)]
struct PaperState {
    marks: HashMap<String, (Decimal, DateTime<Utc>)>,
    leverage: HashMap<String, u32>,
    margin_modes: HashMap<String, MarginMode>,
    /// Keyed by symbol and hedge leg, `None` for one-way netting
    positions: HashMap<(String, Option<PositionSide>), NetPosition>,
    fills: Vec<Fill>,
    realized: Decimal,
    fees: Decimal,
}

/// Paper trading execution engine with simulated fills at the latest mark
pub struct PaperEngine {
    fee_rate: Decimal,
    initial_balance: Decimal,
    state: Arc<RwLock<PaperState>>,
}

impl PaperEngine {
    /// Create a new paper trading engine
    pub fn new(fee_rate: Decimal, initial_balance: Decimal) -> Self {
        Self {
            fee_rate,
            initial_balance,
            state: Arc::new(RwLock::new(PaperState {
                marks: HashMap::new(),
                leverage: HashMap::new(),
                margin_modes: HashMap::new(),
                positions: HashMap::new(),
                fills: vec![],
                realized: Decimal::ZERO,
                fees: Decimal::ZERO,
            })),
        }
    }

    /// All fills so far
    pub async fn fills(&self) -> Vec<Fill> {
        self.state.read().await.fills.clone()
    }

    pub async fn leverage(&self, symbol: &str) -> Option<u32> {
        self.state.read().await.leverage.get(symbol).copied()
    }

    pub async fn margin_mode(&self, symbol: &str) -> Option<MarginMode> {
        self.state.read().await.margin_modes.get(symbol).copied()
    }
}

#[async_trait]
impl ExecutionEngine for PaperEngine {
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExecutionError> {
        if leverage < 1 {
            return Err(ExecutionError::Rejected {
                symbol: symbol.to_string(),
                reason: format!("leverage {} below 1", leverage),
            });
        }
        self.state
            .write()
            .await
            .leverage
            .insert(symbol.to_string(), leverage);
        tracing::debug!(symbol, leverage, "Paper leverage set");
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<(), ExecutionError> {
        self.state
            .write()
            .await
            .margin_modes
            .insert(symbol.to_string(), mode);
        tracing::debug!(symbol, ?mode, "Paper margin mode set");
        Ok(())
    }

    async fn submit_order(&self, order: OrderRequest) -> Result<Fill, ExecutionError> {
        if order.quantity <= Decimal::ZERO {
            return Err(ExecutionError::Rejected {
                symbol: order.symbol,
                reason: format!("quantity {} must be positive", order.quantity),
            });
        }

        let mut state = self.state.write().await;
        let (mark, timestamp) = state
            .marks
            .get(&order.symbol)
            .copied()
            .ok_or_else(|| ExecutionError::NoMarkPrice(order.symbol.clone()))?;

        let price = match (order.order_type, order.price) {
            (OrderType::Limit, Some(limit)) => limit,
            _ => mark,
        };

        let signed = order.side.signed(order.quantity);
        let net = state
            .positions
            .entry((order.symbol.clone(), order.position_side))
            .or_default();
        if order.reduce_only
            && (net.quantity.is_zero() || net.quantity.is_sign_positive() == signed.is_sign_positive())
        {
            return Err(ExecutionError::Rejected {
                symbol: order.symbol,
                reason: "reduce-only order would increase exposure".to_string(),
            });
        }

        // Realize on the reduced part, re-average on the increased part
        let mut realized = Decimal::ZERO;
        if net.quantity.is_zero() || net.quantity.is_sign_positive() == signed.is_sign_positive() {
            let new_qty = net.quantity + signed;
            net.avg_price = (net.avg_price * net.quantity.abs() + price * signed.abs()) / new_qty.abs();
            net.quantity = new_qty;
        } else {
            let closed = net.quantity.abs().min(signed.abs());
            let direction = if net.quantity.is_sign_positive() {
                Decimal::ONE
            } else {
                Decimal::NEGATIVE_ONE
            };
            realized = (price - net.avg_price) * closed * direction;
            let new_qty = net.quantity + signed;
            if new_qty.is_zero() {
                net.avg_price = Decimal::ZERO;
            } else if new_qty.is_sign_positive() != net.quantity.is_sign_positive() {
                net.avg_price = price;
            }
            net.quantity = new_qty;
        }

        let fee = price * order.quantity * self.fee_rate;
        let fill = Fill {
            order_id: order.id,
            symbol: order.symbol,
            side: order.side,
            price,
            quantity: order.quantity,
            fee,
            timestamp,
        };

        state.realized += realized;
        state.fees += fee;
        state.fills.push(fill.clone());

        tracing::info!(order_id = ?fill.order_id, symbol = %fill.symbol, price = %fill.price, "Paper order filled");
        Ok(fill)
    }

    async fn get_account_balance(&self) -> Result<AccountBalance, ExecutionError> {
        let state = self.state.read().await;

        let mut unrealized = Decimal::ZERO;
        let mut open_positions = 0;
        for ((symbol, _), net) in &state.positions {
            if net.quantity.is_zero() {
                continue;
            }
            open_positions += 1;
            if let Some((mark, _)) = state.marks.get(symbol) {
                unrealized += (*mark - net.avg_price) * net.quantity;
            }
        }
        let updated_at = state
            .marks
            .values()
            .map(|(_, ts)| *ts)
            .max()
            .unwrap_or_else(Utc::now);

        let available = self.initial_balance + state.realized - state.fees;
        Ok(AccountBalance {
            available,
            total: available + unrealized,
            open_positions,
            updated_at,
        })
    }

    async fn update_mark(&self, symbol: &str, price: Decimal, timestamp: DateTime<Utc>) {
        self.state
            .write()
            .await
            .marks
            .insert(symbol.to_string(), (price, timestamp));
    }
}
