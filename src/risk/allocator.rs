//! Tiered capital allocation
//!
//! Sizing grows in discrete steps: the balance is mapped onto the highest tier
//! reachable from `base_target` by applying the growth factors in turn.

use crate::config::AllocatorConfig;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

/// Sizing decision for the current balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    /// Capital tier the balance resolved to
    pub tier: Decimal,
    /// Tier minus the safety buffer
    pub usable_amount: Decimal,
    /// Margin to commit per new position
    pub per_trade_amount: Decimal,
    /// Concurrent positions this allocation supports
    pub max_positions: usize,
    /// Balance is below the smallest tier and fixed minimums apply
    pub below_floor: bool,
}

/// Maps total balance to per-trade sizing
#[derive(Debug, Clone)]
pub struct CapitalAllocator {
    config: AllocatorConfig,
}

impl CapitalAllocator {
    pub fn new(config: AllocatorConfig) -> Self {
        Self { config }
    }

    /// Highest tier not exceeding `balance`, or `None` below the base target
    pub fn tier(&self, balance: Decimal) -> Option<Decimal> {
        if balance < self.config.base_target {
            return None;
        }

        let mut tier = self.config.base_target;
        if self.config.growth_factors.is_empty() {
            return Some(tier);
        }
        for factor in self.config.growth_factors.iter().cycle() {
            let next = tier * *factor;
            if next > balance || next <= tier {
                break;
            }
            tier = next;
        }
        Some(tier)
    }

    pub fn allocate(&self, balance: Decimal) -> Allocation {
        let Some(tier) = self.tier(balance) else {
            return Allocation {
                tier: self.config.base_target,
                usable_amount: self.config.min_trade_amount,
                per_trade_amount: self.config.min_trade_amount,
                max_positions: 1,
                below_floor: true,
            };
        };

        let usable_amount = tier * (Decimal::ONE - self.config.safety_ratio);
        let affordable = if self.config.min_trade_amount > Decimal::ZERO {
            (usable_amount / self.config.min_trade_amount)
                .floor()
                .to_usize()
                .unwrap_or(usize::MAX)
        } else {
            usize::MAX
        };
        let max_positions = self.config.max_concurrent_positions.min(affordable).max(1);
        let per_trade_amount = usable_amount / Decimal::from(max_positions);

        Allocation {
            tier,
            usable_amount,
            per_trade_amount,
            max_positions,
            below_floor: false,
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn allocator() -> CapitalAllocator {
        CapitalAllocator::new(AllocatorConfig::default())
    }

    #[test]
    fn test_tier_ladder() {
        let allocator = allocator();
        // 5 -> 10 -> 30 -> 60 -> 180 -> 360 -> 1080
        assert_eq!(allocator.tier(dec!(5)), Some(dec!(5)));
        assert_eq!(allocator.tier(dec!(29.99)), Some(dec!(10)));
        assert_eq!(allocator.tier(dec!(30)), Some(dec!(30)));
        assert_eq!(allocator.tier(dec!(1000)), Some(dec!(360)));
        assert_eq!(allocator.tier(dec!(1080)), Some(dec!(1080)));
        assert_eq!(allocator.tier(dec!(4.99)), None);
    }

    #[test]
    fn test_allocation_at_1000() {
        let allocation = allocator().allocate(dec!(1000));
        assert_eq!(allocation.tier, dec!(360));
        assert_eq!(allocation.usable_amount, dec!(288));
        assert_eq!(allocation.max_positions, 3);
        assert_eq!(allocation.per_trade_amount, dec!(96));
        assert!(!allocation.below_floor);

        // Same inputs, same answer
        assert_eq!(allocator().allocate(dec!(1000)), allocation);
    }

    #[test]
    fn test_allocation_at_floor() {
        let allocation = allocator().allocate(dec!(5));
        assert_eq!(allocation.tier, dec!(5));
        assert_eq!(allocation.max_positions, 1);
        assert_eq!(allocation.per_trade_amount, dec!(4));
    }

    #[test]
    fn test_allocation_below_floor() {
        let allocation = allocator().allocate(dec!(2));
        assert!(allocation.below_floor);
        assert_eq!(allocation.tier, dec!(5));
        assert_eq!(allocation.per_trade_amount, dec!(5));
        assert_eq!(allocation.max_positions, 1);
    }

    #[test]
    fn test_concurrency_limited_by_min_trade() {
        // Tier 10, usable 8: only one 5-unit trade fits
        let allocation = allocator().allocate(dec!(20));
        assert_eq!(allocation.tier, dec!(10));
        assert_eq!(allocation.max_positions, 1);
        assert_eq!(allocation.per_trade_amount, dec!(8));
    }

    #[test]
    fn test_sizing_is_stepwise() {
        let allocator = allocator();
        assert_eq!(
            allocator.allocate(dec!(400)).per_trade_amount,
            allocator.allocate(dec!(1000)).per_trade_amount
        );
        assert!(
            allocator.allocate(dec!(1100)).per_trade_amount
                > allocator.allocate(dec!(1000)).per_trade_amount
        );
    }
}
