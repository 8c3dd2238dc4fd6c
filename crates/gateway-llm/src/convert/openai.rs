//! Conversion between canonical types and the Chat Completions wire format

use std::collections::BTreeMap;

use crate::protocol::openai::{
    ChatChoice, ChatChoiceMessage, ChatContent, ChatContentPart, ChatFunction, ChatFunctionCall, ChatImageUrl,
    ChatMessage, ChatRequest, ChatResponse, ChatStreamChoice, ChatStreamChunk, ChatStreamDelta, ChatStreamToolCall,
    ChatTool, ChatToolCall, ChatUsage,
};
use crate::types::{
    FinishReason, GenerationRequest, GenerationResult, Message, Part, Role, StreamEvent, ToolChoice, ToolInvocation,
    ToolSpec, Usage,
};

// -- Inbound: chat wire -> canonical --

/// Decode an inbound Chat Completions request into canonical form
pub fn request_to_internal(req: ChatRequest) -> GenerationRequest {
    let messages = req.messages.into_iter().map(message_to_internal).collect();

    GenerationRequest {
        model: req.model,
        messages,
        system: None,
        tools: req.tools.map(|tools| tools.into_iter().map(tool_to_internal).collect()),
        tool_choice: req.tool_choice.as_ref().and_then(parse_tool_choice),
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: req.max_tokens,
        stream: req.stream.unwrap_or(false),
    }
}

fn message_to_internal(msg: ChatMessage) -> Message {
    let role = match msg.role.as_str() {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    };

    // A tool-role message is a single tool result
    if role == Role::Tool {
        let content = match msg.content {
            Some(ChatContent::Text(text)) => text,
            Some(ChatContent::Parts(parts)) => parts
                .into_iter()
                .filter_map(|p| match p {
                    ChatContentPart::Text { text } => Some(text),
                    ChatContentPart::ImageUrl { .. } => None,
                })
                .collect(),
            None => String::new(),
        };
        return Message {
            role,
            parts: vec![Part::ToolResult {
                id: msg.tool_call_id.unwrap_or_default(),
                content,
            }],
        };
    }

    let mut parts = Vec::new();

    match msg.content {
        Some(ChatContent::Text(text)) => parts.push(Part::Text { text }),
        Some(ChatContent::Parts(wire_parts)) => {
            for part in wire_parts {
                match part {
                    ChatContentPart::Text { text } => parts.push(Part::Text { text }),
                    ChatContentPart::ImageUrl { image_url } => {
                        let (data, media_type) = split_data_uri(&image_url.url);
                        parts.push(Part::Image { data, media_type });
                    }
                }
            }
        }
        None => {}
    }

    // Text parts precede tool calls within one assistant message
    if let Some(tool_calls) = msg.tool_calls {
        for tc in tool_calls {
            parts.push(Part::ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            });
        }
    }

    Message { role, parts }
}

/// Split a `data:` URI into payload and media type; non-data URLs pass
/// through with a generic type
fn split_data_uri(url: &str) -> (String, String) {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((mime_and_encoding, data)) = rest.split_once(',')
    {
        let media_type = mime_and_encoding.strip_suffix(";base64").unwrap_or(mime_and_encoding);
        return (data.to_owned(), media_type.to_owned());
    }
    (url.to_owned(), "image/png".to_owned())
}

fn tool_to_internal(tool: ChatTool) -> ToolSpec {
    ToolSpec {
        name: tool.function.name,
        description: tool.function.description,
        parameters: tool
            .function
            .parameters
            .unwrap_or_else(|| serde_json::json!({"type": "object"})),
    }
}

/// Parse the flexible `tool_choice` field
pub fn parse_tool_choice(value: &serde_json::Value) -> Option<ToolChoice> {
    match value {
        serde_json::Value::String(s) => match s.as_str() {
            "auto" => Some(ToolChoice::Auto),
            "none" => Some(ToolChoice::None),
            "required" => Some(ToolChoice::Required),
            _ => None,
        },
        serde_json::Value::Object(_) => value
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(|n| n.as_str())
            .map(|name| ToolChoice::Tool { name: name.to_owned() }),
        _ => None,
    }
}

// -- Outbound: canonical -> chat wire (for upstream calls) --

/// Build the native request sent to an OpenAI-compatible upstream
pub fn internal_to_request(req: &GenerationRequest) -> ChatRequest {
    let mut messages = Vec::new();

    if let Some(system) = req.system_text() {
        messages.push(ChatMessage {
            role: "system".to_owned(),
            content: Some(ChatContent::Text(system)),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for msg in req.conversation() {
        messages.extend(internal_message_to_wire(msg));
    }

    ChatRequest {
        model: req.model.clone(),
        messages,
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: req.max_tokens,
        stream: if req.stream { Some(true) } else { None },
        tools: req.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| ChatTool {
                    tool_type: "function".to_owned(),
                    function: ChatFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: Some(t.parameters.clone()),
                    },
                })
                .collect()
        }),
        tool_choice: req.tool_choice.as_ref().map(tool_choice_to_wire),
    }
}

fn internal_message_to_wire(msg: &Message) -> Vec<ChatMessage> {
    // Tool messages expand to one wire message per result
    if msg.role == Role::Tool {
        return msg
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolResult { id, content } => Some(ChatMessage {
                    role: "tool".to_owned(),
                    content: Some(ChatContent::Text(content.clone())),
                    tool_calls: None,
                    tool_call_id: Some(id.clone()),
                }),
                _ => None,
            })
            .collect();
    }

    let role = match msg.role {
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::User | Role::Tool => "user",
    };

    let mut content_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for part in &msg.parts {
        match part {
            Part::Text { text } => content_parts.push(ChatContentPart::Text { text: text.clone() }),
            Part::Image { data, media_type } => content_parts.push(ChatContentPart::ImageUrl {
                image_url: ChatImageUrl {
                    url: format!("data:{media_type};base64,{data}"),
                },
            }),
            Part::ToolCall { id, name, arguments } => tool_calls.push(ChatToolCall {
                id: id.clone(),
                tool_type: "function".to_owned(),
                function: ChatFunctionCall {
                    name: name.clone(),
                    arguments: arguments.clone(),
                },
            }),
            Part::ToolResult { .. } => {}
        }
    }

    // Collapse a single text part to string content
    let content = match content_parts.len() {
        0 => None,
        1 => match content_parts.into_iter().next() {
            Some(ChatContentPart::Text { text }) => Some(ChatContent::Text(text)),
            Some(other) => Some(ChatContent::Parts(vec![other])),
            None => None,
        },
        _ => Some(ChatContent::Parts(content_parts)),
    };

    vec![ChatMessage {
        role: role.to_owned(),
        content,
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
    }]
}

fn tool_choice_to_wire(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Auto => serde_json::Value::String("auto".to_owned()),
        ToolChoice::None => serde_json::Value::String("none".to_owned()),
        ToolChoice::Required => serde_json::Value::String("required".to_owned()),
        ToolChoice::Tool { name } => serde_json::json!({
            "type": "function",
            "function": {"name": name}
        }),
    }
}

// -- Response projection --

/// Map a non-streaming chat response to a canonical result
pub fn response_to_result(resp: ChatResponse) -> GenerationResult {
    let usage = resp.usage.map_or_else(Usage::default, |u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
    });

    let Some(choice) = resp.choices.into_iter().next() else {
        return GenerationResult::text_only(String::new(), usage);
    };

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolInvocation {
            id: tc.id,
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    GenerationResult {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish: choice
            .finish_reason
            .as_deref()
            .map_or(FinishReason::Stop, parse_finish_reason),
        usage,
    }
}

/// Build the non-streaming response the gateway returns on the chat surface
pub fn result_to_response(result: &GenerationResult, model: &str, id: &str, created: u64) -> ChatResponse {
    let tool_calls: Vec<ChatToolCall> = result
        .tool_calls
        .iter()
        .map(|tc| ChatToolCall {
            id: tc.id.clone(),
            tool_type: "function".to_owned(),
            function: ChatFunctionCall {
                name: tc.name.clone(),
                arguments: tc.arguments.clone(),
            },
        })
        .collect();

    ChatResponse {
        id: id.to_owned(),
        object: "chat.completion".to_owned(),
        created,
        model: model.to_owned(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatChoiceMessage {
                role: "assistant".to_owned(),
                content: Some(result.text.clone()),
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            },
            finish_reason: Some(finish_reason_to_wire(result.finish).to_owned()),
        }],
        usage: Some(ChatUsage {
            prompt_tokens: result.usage.prompt_tokens,
            completion_tokens: result.usage.completion_tokens,
            total_tokens: result.usage.prompt_tokens + result.usage.completion_tokens,
        }),
    }
}

/// Parse an upstream finish reason, tolerating common spelling variants
pub fn parse_finish_reason(s: &str) -> FinishReason {
    match s {
        "stop" | "end_turn" => FinishReason::Stop,
        "length" | "max_tokens" => FinishReason::Length,
        "tool_calls" | "tool-calls" | "tool_use" => FinishReason::ToolCalls,
        _ => FinishReason::Other,
    }
}

/// Canonical wire spelling of a finish reason
pub const fn finish_reason_to_wire(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::Length => "length",
        FinishReason::Error => "error",
        FinishReason::Other => "other",
    }
}

// -- Streaming: chat wire -> canonical events --

#[derive(Debug, Default)]
struct PendingCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Accumulates streaming tool-call fragments by index and emits each call
/// once its arguments are complete
///
/// A call is considered complete when a later index starts or when the
/// upstream signals a finish reason, whichever comes first.
#[derive(Debug, Default)]
pub struct ChatStreamState {
    pending: BTreeMap<u32, PendingCall>,
    finish: Option<FinishReason>,
    usage: Option<Usage>,
    emitted_tool_call: bool,
}

impl ChatStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one parsed chunk into canonical events
    pub fn push_chunk(&mut self, chunk: &ChatStreamChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        for choice in &chunk.choices {
            if let Some(content) = &choice.delta.content
                && !content.is_empty()
            {
                events.push(StreamEvent::TextDelta { delta: content.clone() });
            }

            if let Some(fragments) = &choice.delta.tool_calls {
                for fragment in fragments {
                    // A new index means every earlier call stopped receiving
                    // fragments and can be flushed
                    if !self.pending.contains_key(&fragment.index) {
                        events.extend(self.flush_before(fragment.index));
                    }
                    self.absorb_fragment(fragment);
                }
            }

            if let Some(reason) = &choice.finish_reason {
                events.extend(self.flush_all());
                self.finish = Some(parse_finish_reason(reason));
            }
        }

        if let Some(usage) = &chunk.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            });
        }

        events
    }

    /// Produce the terminal events once the upstream stream ends
    pub fn finish(mut self) -> Vec<StreamEvent> {
        let mut events = self.flush_all();

        let reason = self.finish.unwrap_or(if self.emitted_tool_call {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        });

        events.push(StreamEvent::Finish {
            reason,
            usage: self.usage.unwrap_or_default(),
        });
        events
    }

    fn absorb_fragment(&mut self, fragment: &ChatStreamToolCall) {
        let call = self.pending.entry(fragment.index).or_default();
        if let Some(id) = &fragment.id {
            call.id = Some(id.clone());
        }
        if let Some(function) = &fragment.function {
            if let Some(name) = &function.name {
                call.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                call.arguments.push_str(arguments);
            }
        }
    }

    fn flush_before(&mut self, index: u32) -> Vec<StreamEvent> {
        let earlier: Vec<u32> = self.pending.range(..index).map(|(k, _)| *k).collect();
        earlier.into_iter().filter_map(|k| self.emit_call(k)).collect()
    }

    fn flush_all(&mut self) -> Vec<StreamEvent> {
        let keys: Vec<u32> = self.pending.keys().copied().collect();
        keys.into_iter().filter_map(|k| self.emit_call(k)).collect()
    }

    fn emit_call(&mut self, index: u32) -> Option<StreamEvent> {
        let call = self.pending.remove(&index)?;
        if call.name.is_empty() && call.id.is_none() {
            return None;
        }
        self.emitted_tool_call = true;
        Some(StreamEvent::ToolCall {
            id: call.id.unwrap_or_else(|| format!("call_{index}")),
            name: call.name,
            arguments: if call.arguments.is_empty() {
                "{}".to_owned()
            } else {
                call.arguments
            },
        })
    }
}

// -- Streaming: canonical events -> chat wire chunks --

/// Frame one canonical event as a chat completion chunk
///
/// `Error` has no chunk form; the caller terminates the stream instead.
pub fn event_to_chunk(event: &StreamEvent, id: &str, model: &str, created: u64) -> Option<ChatStreamChunk> {
    let choice = match event {
        StreamEvent::TextDelta { delta } => ChatStreamChoice {
            index: 0,
            delta: ChatStreamDelta {
                role: None,
                content: Some(delta.clone()),
                tool_calls: None,
            },
            finish_reason: None,
        },
        StreamEvent::ToolCall { id, name, arguments } => ChatStreamChoice {
            index: 0,
            delta: ChatStreamDelta {
                role: None,
                content: None,
                tool_calls: Some(vec![ChatStreamToolCall {
                    index: 0,
                    id: Some(id.clone()),
                    tool_type: Some("function".to_owned()),
                    function: Some(crate::protocol::openai::ChatStreamFunction {
                        name: Some(name.clone()),
                        arguments: Some(arguments.clone()),
                    }),
                }]),
            },
            finish_reason: None,
        },
        StreamEvent::Finish { reason, .. } => ChatStreamChoice {
            index: 0,
            delta: ChatStreamDelta::default(),
            finish_reason: Some(finish_reason_to_wire(*reason).to_owned()),
        },
        StreamEvent::Error { .. } => return None,
    };

    Some(ChatStreamChunk {
        id: id.to_owned(),
        object: "chat.completion.chunk".to_owned(),
        created,
        model: model.to_owned(),
        choices: vec![choice],
        usage: None,
    })
}
