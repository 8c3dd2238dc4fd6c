use serde::{Deserialize, Serialize};

/// Reason the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of generation
    Stop,
    /// Model decided to call tools
    ToolCalls,
    /// Hit the `max_tokens` limit
    Length,
    /// Generation aborted by an upstream error
    Error,
    /// Any reason outside the canonical set
    Other,
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A complete tool call produced by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

/// Result of a non-streaming generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Assistant text, possibly empty when only tools were called
    pub text: String,
    /// Tool calls in the order the model produced them
    pub tool_calls: Vec<ToolInvocation>,
    pub finish: FinishReason,
    pub usage: Usage,
}

impl GenerationResult {
    /// Plain-text result with a `stop` finish
    pub fn text_only(text: impl Into<String>, usage: Usage) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            finish: FinishReason::Stop,
            usage,
        }
    }
}
