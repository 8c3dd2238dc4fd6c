use serde::{Deserialize, Serialize};

/// Canonical tool declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool parameters
    pub parameters: serde_json::Value,
}

/// How the model should select tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides whether to call tools
    Auto,
    /// Model will not call any tool
    None,
    /// Model must call at least one tool
    Required,
    /// Model must call the named tool
    Tool { name: String },
}
