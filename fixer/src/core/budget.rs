//! Token budget decision for the pre-request guard.

use std::time::Duration;

/// Ceiling and cooldown for the token budget guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub ceiling: u64,
    pub cooldown: Duration,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            ceiling: 50_000,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    Proceed,
    /// Wait this long, then send anyway.
    Cooldown(Duration),
}

impl TokenBudget {
    pub fn decide(&self, token_count: u64) -> BudgetDecision {
        if token_count > self.ceiling {
            BudgetDecision::Cooldown(self.cooldown)
        } else {
            BudgetDecision::Proceed
        }
    }

    /// Tokens left before the ceiling (zero when over).
    pub fn remaining(&self, token_count: u64) -> u64 {
        self.ceiling.saturating_sub(token_count)
    }
}
