use serde::{Deserialize, Serialize};

/// Role of a message participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// Tool result carrier
    Tool,
}

/// Canonical message: a role and an ordered list of parts
///
/// Within one assistant message, text parts precede tool-call parts. A tool
/// message carries only tool-result parts, each referencing a tool-call id
/// from a prior assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

/// Individual part within a canonical message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Text content
    Text {
        text: String,
    },
    /// Inline image (base64 data)
    Image {
        data: String,
        media_type: String,
    },
    /// Tool call issued by the assistant; arguments are a JSON string
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// Result for a prior tool call
    ToolResult {
        id: String,
        content: String,
    },
}

impl Message {
    /// Single-text-part message
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    /// Concatenated text content of this message
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool-call parts of this message, in order
    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.parts.iter().filter_map(|p| match p {
            Part::ToolCall { id, name, arguments } => Some((id.as_str(), name.as_str(), arguments.as_str())),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_skips_non_text_parts() {
        let msg = Message {
            role: Role::Assistant,
            parts: vec![
                Part::Text { text: "a".to_owned() },
                Part::ToolCall {
                    id: "c1".to_owned(),
                    name: "f".to_owned(),
                    arguments: "{}".to_owned(),
                },
                Part::Text { text: "b".to_owned() },
            ],
        };
        assert_eq!(msg.text_content(), "ab");
        assert_eq!(msg.tool_calls().count(), 1);
    }
}
