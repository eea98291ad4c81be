//! One live conversation with the reasoning engine.
//!
//! [`ConversationEngine`] owns the turn history and is the only place that talks
//! to the transport: every request goes through the token budget guard first, and
//! every assistant turn is appended before the caller sees it.

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::core::conversation::{AssistantTurn, Conversation, ToolResult};
use crate::io::budget::TokenBudgetGuard;
use crate::io::engine::{Engine, EngineError, EngineRequest};
use crate::io::sleep::Sleeper;
use crate::io::tools::{ToolRegistry, ToolSchema};
use crate::io::transport::RateLimitedTransport;

pub struct ConversationEngine<'a, E, S> {
    transport: &'a RateLimitedTransport<E, S>,
    guard: TokenBudgetGuard,
    tools: &'a [ToolSchema],
    system_prompt: &'a str,
    conversation: Conversation,
    requests: u32,
}

impl<'a, E: Engine, S: Sleeper> ConversationEngine<'a, E, S> {
    pub fn new(
        transport: &'a RateLimitedTransport<E, S>,
        guard: TokenBudgetGuard,
        tools: &'a [ToolSchema],
        system_prompt: &'a str,
    ) -> Self {
        Self {
            transport,
            guard,
            tools,
            system_prompt,
            conversation: Conversation::new(),
            requests: 0,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Engine requests sent so far (retries of one request count once).
    pub fn requests(&self) -> u32 {
        self.requests
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.conversation.push_user(content);
    }

    /// Send the history and append the assistant's reply.
    pub fn send(&mut self) -> Result<AssistantTurn, EngineError> {
        let request = EngineRequest {
            system: self.system_prompt,
            turns: self.conversation.turns(),
            tools: self.tools,
        };
        let tokens =
            self.guard
                .before_request(self.transport.engine(), self.transport.sleeper(), &request);
        let turn = self.transport.send(&request)?;
        self.requests += 1;
        debug!(
            request = self.requests,
            tokens = ?tokens,
            tool_calls = turn.tool_calls().len(),
            "assistant turn received"
        );
        self.conversation.push_assistant(turn.clone());
        Ok(turn)
    }

    /// Run every tool call of `turn` in order and append one tool-results turn.
    pub fn answer_tool_calls(
        &mut self,
        turn: &AssistantTurn,
        registry: &ToolRegistry,
    ) -> Result<Vec<ToolResult>> {
        let results: Vec<ToolResult> = turn
            .tool_calls()
            .into_iter()
            .map(|call| registry.dispatch(call))
            .collect();
        self.conversation
            .push_tool_results(results.clone())
            .map_err(|msg| anyhow!(msg))?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backoff::BackoffPolicy;
    use crate::core::budget::TokenBudget;
    use crate::core::conversation::{AssistantBlock, ToolCall, Turn};
    use crate::io::config::ToolsConfig;
    use crate::test_support::{RecordingSleeper, ScriptedEngine};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn guard_runs_before_each_send_and_history_is_kept() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("a.txt"), "alpha").expect("write");
        let registry = ToolRegistry::new(temp.path(), ToolsConfig::default()).expect("registry");

        let engine = ScriptedEngine::new();
        engine.push_token_count(Ok(70_000));
        engine.push_turn(AssistantTurn::new(vec![AssistantBlock::ToolCall(ToolCall {
            call_id: "tu_1".to_string(),
            name: "read_file".to_string(),
            arguments: json!({"file_path": "a.txt"}),
        })]));
        engine.push_token_count(Ok(100));
        engine.push_turn(AssistantTurn::new(vec![AssistantBlock::Text {
            text: "done".to_string(),
        }]));
        let sleeper = RecordingSleeper::default();
        let transport = RateLimitedTransport::new(&engine, &sleeper, BackoffPolicy::default());

        let mut session = ConversationEngine::new(
            &transport,
            TokenBudgetGuard::new(TokenBudget::default()),
            registry.schemas(),
            "sys",
        );
        session.push_user("read a.txt");
        let first = session.send().expect("first");
        let results = session
            .answer_tool_calls(&first, &registry)
            .expect("results");
        assert_eq!(results[0].text, "alpha");
        let second = session.send().expect("second");

        assert_eq!(second.text(), "done");
        assert_eq!(session.requests(), 2);
        assert_eq!(sleeper.slept(), vec![Duration::from_secs(60)]);
        assert_eq!(session.conversation().len(), 4);
        assert!(matches!(
            session.conversation().turns()[2],
            Turn::ToolResults { .. }
        ));
        // The second request carried the whole history.
        assert_eq!(engine.requests()[1].len(), 3);
    }
}
