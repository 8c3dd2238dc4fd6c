use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};

use super::response::{FinishReason, GenerationResult, ToolInvocation, Usage};

/// Canonical stream-event alphabet emitted by every adapter
///
/// Exactly one terminal event per stream: a `Finish` at the end, or an
/// `Error` that cuts it short. `TextDelta` concatenation yields the assistant
/// text; a given `ToolCall` id appears at most once, and only after its
/// arguments are complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text
    TextDelta { delta: String },
    /// A complete tool call with fully accumulated JSON arguments
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// Normal end of stream
    Finish { reason: FinishReason, usage: Usage },
    /// Abnormal end of stream
    Error { message: String },
}

/// Boxed canonical event stream produced by an adapter
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Fold a finished event sequence into a non-streaming result
///
/// Used by adapters whose only upstream transport is a stream (Code-Assist,
/// the cursor subprocess) to implement `generate`.
pub fn collect_events(events: Vec<StreamEvent>) -> GenerationResult {
    let mut text = String::new();
    let mut tool_calls: Vec<ToolInvocation> = Vec::new();
    let mut finish = FinishReason::Other;
    let mut usage = Usage::default();

    for event in events {
        match event {
            StreamEvent::TextDelta { delta } => text.push_str(&delta),
            StreamEvent::ToolCall { id, name, arguments } => {
                tool_calls.push(ToolInvocation { id, name, arguments });
            }
            StreamEvent::Finish { reason, usage: u } => {
                finish = reason;
                usage = u;
            }
            StreamEvent::Error { .. } => finish = FinishReason::Error,
        }
    }

    GenerationResult {
        text,
        tool_calls,
        finish,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_concatenates_text_and_keeps_tool_order() {
        let result = collect_events(vec![
            StreamEvent::TextDelta { delta: "he".to_owned() },
            StreamEvent::TextDelta { delta: "llo".to_owned() },
            StreamEvent::ToolCall {
                id: "c1".to_owned(),
                name: "a".to_owned(),
                arguments: "{}".to_owned(),
            },
            StreamEvent::ToolCall {
                id: "c2".to_owned(),
                name: "b".to_owned(),
                arguments: "{}".to_owned(),
            },
            StreamEvent::Finish {
                reason: FinishReason::ToolCalls,
                usage: Usage {
                    prompt_tokens: 3,
                    completion_tokens: 7,
                },
            },
        ]);

        assert_eq!(result.text, "hello");
        assert_eq!(result.tool_calls.len(), 2);
        assert_eq!(result.tool_calls[0].id, "c1");
        assert_eq!(result.finish, FinishReason::ToolCalls);
        assert_eq!(result.usage.completion_tokens, 7);
    }
}
