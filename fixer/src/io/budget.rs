//! Token budget guard invoked immediately before every engine request.

use tracing::{info, instrument, warn};

use crate::core::budget::{BudgetDecision, TokenBudget};
use crate::io::engine::{Engine, EngineRequest};
use crate::io::sleep::Sleeper;

/// Best-effort guard: delays over-budget requests, never blocks them.
#[derive(Debug, Clone, Copy)]
pub struct TokenBudgetGuard {
    budget: TokenBudget,
}

impl TokenBudgetGuard {
    pub fn new(budget: TokenBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    /// Count the request's tokens and sleep through the cooldown if over budget.
    ///
    /// Returns the token count, or `None` when counting failed (the request then
    /// proceeds unguarded).
    #[instrument(skip_all, fields(ceiling = self.budget.ceiling))]
    pub fn before_request<E: Engine, S: Sleeper>(
        &self,
        engine: &E,
        sleeper: &S,
        request: &EngineRequest<'_>,
    ) -> Option<u64> {
        let tokens = match engine.count_tokens(request) {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(error = %err, "token count failed, sending without budget check");
                return None;
            }
        };
        info!(tokens, "conversation size");
        if let BudgetDecision::Cooldown(wait) = self.budget.decide(tokens) {
            warn!(
                tokens,
                wait_secs = wait.as_secs(),
                "token budget exceeded, cooling down"
            );
            sleeper.sleep(wait);
        }
        Some(tokens)
    }
}
