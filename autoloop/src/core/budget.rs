//! Monetary budget enforcement across model calls.

use serde::Serialize;
use thiserror::Error;

use crate::core::cost::Cost;

/// Spending would pass (or has passed) a non-zero ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("budget exceeded: spent {spent} + {requested} > ceiling {ceiling}")]
pub struct BudgetExceeded {
    pub spent: Cost,
    pub requested: Cost,
    pub ceiling: Cost,
}

/// Accumulated spend against a ceiling. A zero ceiling means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BudgetTracker {
    ceiling: Cost,
    spent: Cost,
}

impl BudgetTracker {
    pub fn new(ceiling: Cost) -> Self {
        Self {
            ceiling,
            spent: Cost::ZERO,
        }
    }

    pub fn ceiling(&self) -> Cost {
        self.ceiling
    }

    pub fn spent(&self) -> Cost {
        self.spent
    }

    pub fn is_unlimited(&self) -> bool {
        self.ceiling.is_zero()
    }

    /// Remaining headroom, or `None` when unlimited.
    pub fn remaining(&self) -> Option<Cost> {
        if self.is_unlimited() {
            return None;
        }
        Some(Cost::from_micros(
            self.ceiling.micros().saturating_sub(self.spent.micros()),
        ))
    }

    /// Check whether a call estimated at `estimated` may proceed.
    pub fn precheck(&self, estimated: Cost) -> Result<(), BudgetExceeded> {
        if self.would_exceed(estimated) {
            return Err(self.exceeded(estimated));
        }
        Ok(())
    }

    /// Record an actual charge. Spend always increases, even when the result is an error.
    pub fn charge(&mut self, cost: Cost) -> Result<(), BudgetExceeded> {
        let before = self.spent;
        self.spent += cost;
        if !self.is_unlimited() && self.spent > self.ceiling {
            return Err(BudgetExceeded {
                spent: before,
                requested: cost,
                ceiling: self.ceiling,
            });
        }
        Ok(())
    }

    fn would_exceed(&self, amount: Cost) -> bool {
        !self.is_unlimited() && self.spent + amount > self.ceiling
    }

    fn exceeded(&self, requested: Cost) -> BudgetExceeded {
        BudgetExceeded {
            spent: self.spent,
            requested,
            ceiling: self.ceiling,
        }
    }
}
