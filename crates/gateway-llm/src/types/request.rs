use serde::{Deserialize, Serialize};

use super::message::{Message, Role};
use super::tool::{ToolChoice, ToolSpec};

/// Internal canonical generation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Upstream model id (the part after `provider/`)
    pub model: String,
    /// Conversation messages
    pub messages: Vec<Message>,
    /// System prompt supplied outside the message list (Anthropic surface)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Tool declarations available to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
    /// How the model should select tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Whether the client asked for a streaming response
    #[serde(default)]
    pub stream: bool,
}

impl GenerationRequest {
    /// Merged system text: the explicit field plus any system-role messages,
    /// joined with newlines
    pub fn system_text(&self) -> Option<String> {
        let mut sections: Vec<String> = Vec::new();
        if let Some(system) = &self.system
            && !system.is_empty()
        {
            sections.push(system.clone());
        }
        for msg in &self.messages {
            if msg.role == Role::System {
                let text = msg.text_content();
                if !text.is_empty() {
                    sections.push(text);
                }
            }
        }
        if sections.is_empty() { None } else { Some(sections.join("\n")) }
    }

    /// Messages excluding system-role entries (those travel via `system_text`)
    pub fn conversation(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    /// Whether any tools were declared
    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_text_merges_field_and_messages() {
        let req = GenerationRequest {
            system: Some("be brief".to_owned()),
            messages: vec![
                Message::text(Role::System, "be kind"),
                Message::text(Role::User, "hi"),
            ],
            ..GenerationRequest::default()
        };
        assert_eq!(req.system_text().as_deref(), Some("be brief\nbe kind"));
        assert_eq!(req.conversation().count(), 1);
    }

    #[test]
    fn no_system_yields_none() {
        let req = GenerationRequest {
            messages: vec![Message::text(Role::User, "hi")],
            ..GenerationRequest::default()
        };
        assert!(req.system_text().is_none());
    }
}
