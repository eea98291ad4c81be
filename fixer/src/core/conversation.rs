//! Append-only conversation history exchanged with the reasoning engine.
//!
//! The conversation is owned by one agent loop for the duration of one issue (or
//! one chat session). Turns are never removed or rewritten; the budget guard may
//! delay a request but never drops history.

use serde::Serialize;
use serde_json::Value;

/// A tool invocation requested by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// Output of one tool call, correlated by `call_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub call_id: String,
    pub text: String,
    pub is_error: bool,
}

/// One block of an assistant turn, in the order the engine produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantBlock {
    Text { text: String },
    ToolCall(ToolCall),
}

/// A complete assistant response.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AssistantTurn {
    pub blocks: Vec<AssistantBlock>,
}

impl AssistantTurn {
    pub fn new(blocks: Vec<AssistantBlock>) -> Self {
        Self { blocks }
    }

    /// Tool calls in emission order.
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                AssistantBlock::ToolCall(call) => Some(call),
                AssistantBlock::Text { .. } => None,
            })
            .collect()
    }

    /// All text blocks joined with newlines.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                AssistantBlock::Text { text } => Some(text.as_str()),
                AssistantBlock::ToolCall(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User { content: String },
    Assistant(AssistantTurn),
    ToolResults { results: Vec<ToolResult> },
}

/// Ordered turn history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::User {
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, turn: AssistantTurn) {
        self.turns.push(Turn::Assistant(turn));
    }

    /// Append the results for every tool call in the preceding assistant turn.
    ///
    /// Results must be in call order and cover each call exactly once.
    pub fn push_tool_results(&mut self, results: Vec<ToolResult>) -> Result<(), String> {
        let Some(Turn::Assistant(last)) = self.turns.last() else {
            return Err("tool results must follow an assistant turn".to_string());
        };
        let expected: Vec<&str> = last
            .tool_calls()
            .iter()
            .map(|call| call.call_id.as_str())
            .collect();
        let got: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        if expected != got {
            return Err(format!(
                "tool results {got:?} do not match tool calls {expected:?}"
            ));
        }
        self.turns.push(Turn::ToolResults { results });
        Ok(())
    }
}
