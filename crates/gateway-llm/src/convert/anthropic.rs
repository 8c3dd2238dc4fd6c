//! Conversion between canonical types and the Anthropic Messages wire format

use crate::protocol::anthropic::{
    ContentBlock, ImageSource, InboundMessage, MessageContent, MessagesRequest, MessagesResponse, MessagesStreamEvent,
    MessagesTool, MessagesToolChoice, MessagesUsage, ResponseBlock, StreamDelta, SystemPrompt,
};
use crate::types::{
    FinishReason, GenerationRequest, GenerationResult, Message, Part, Role, StreamEvent, ToolChoice, ToolInvocation,
    ToolSpec, Usage,
};

/// Anthropic requires `max_tokens`; used when the internal request has none
const DEFAULT_MAX_TOKENS: u32 = 4096;

// -- Inbound: messages wire -> canonical --

/// Decode an inbound Messages request into canonical form
///
/// A user message with array content is split: each `tool_result` block
/// becomes its own canonical tool message, emitted before a single user
/// message holding the remaining text and image blocks. This reconstruction
/// order is what upstream providers expect for tool-augmented turns, and it
/// keeps every `tool_result` id pointing at a prior assistant `tool_call`.
pub fn request_to_internal(req: MessagesRequest) -> GenerationRequest {
    let system = req.system.map(|s| match s {
        SystemPrompt::Text(text) => text,
        SystemPrompt::Blocks(blocks) => blocks
            .into_iter()
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n"),
    });

    let mut messages = Vec::new();
    for msg in req.messages {
        convert_inbound_message(msg, &mut messages);
    }

    GenerationRequest {
        model: req.model,
        messages,
        system,
        tools: req.tools.map(|tools| tools.into_iter().map(tool_to_internal).collect()),
        tool_choice: req.tool_choice.as_ref().map(tool_choice_to_internal),
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: Some(req.max_tokens),
        stream: req.stream.unwrap_or(false),
    }
}

fn convert_inbound_message(msg: InboundMessage, out: &mut Vec<Message>) {
    let role = if msg.role == "assistant" { Role::Assistant } else { Role::User };

    match msg.content {
        MessageContent::Text(text) => out.push(Message::text(role, text)),
        MessageContent::Blocks(blocks) => {
            let mut retained = Vec::new();

            for block in blocks {
                match block {
                    ContentBlock::Text { text } => retained.push(Part::Text { text }),
                    ContentBlock::Image { source } => retained.push(Part::Image {
                        data: source.data,
                        media_type: source.media_type.unwrap_or_else(|| "image/png".to_owned()),
                    }),
                    ContentBlock::ToolUse { id, name, input } => retained.push(Part::ToolCall {
                        id,
                        name,
                        arguments: input.to_string(),
                    }),
                    ContentBlock::ToolResult { tool_use_id, content } => {
                        // Standalone tool message, ahead of the remaining user content
                        out.push(Message {
                            role: Role::Tool,
                            parts: vec![Part::ToolResult {
                                id: tool_use_id,
                                content: content.map(|c| c.as_text()).unwrap_or_default(),
                            }],
                        });
                    }
                    ContentBlock::Thinking { .. } => {}
                }
            }

            if !retained.is_empty() {
                out.push(Message { role, parts: retained });
            }
        }
    }
}

fn tool_to_internal(tool: MessagesTool) -> ToolSpec {
    ToolSpec {
        name: tool.name,
        description: tool.description,
        parameters: tool.input_schema,
    }
}

fn tool_choice_to_internal(tc: &MessagesToolChoice) -> ToolChoice {
    match tc.choice_type.as_str() {
        "any" => ToolChoice::Required,
        "tool" => tc
            .name
            .as_ref()
            .map_or(ToolChoice::Auto, |name| ToolChoice::Tool { name: name.clone() }),
        _ => ToolChoice::Auto,
    }
}

// -- Outbound: canonical -> messages wire (for upstream calls) --

/// Build the native request sent to an Anthropic-style upstream
pub fn internal_to_request(req: &GenerationRequest) -> MessagesRequest {
    let mut messages = Vec::new();

    for msg in req.conversation() {
        match msg.role {
            Role::Tool => {
                for part in &msg.parts {
                    if let Part::ToolResult { id, content } = part {
                        messages.push(InboundMessage {
                            role: "user".to_owned(),
                            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                                tool_use_id: id.clone(),
                                content: Some(crate::protocol::anthropic::ToolResultContent::Text(content.clone())),
                            }]),
                        });
                    }
                }
            }
            _ => messages.push(internal_message_to_wire(msg)),
        }
    }

    MessagesRequest {
        model: req.model.clone(),
        max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: req.system_text().map(SystemPrompt::Text),
        messages,
        temperature: req.temperature,
        top_p: req.top_p,
        stream: if req.stream { Some(true) } else { None },
        tools: req.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| MessagesTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters.clone(),
                })
                .collect()
        }),
        tool_choice: req.tool_choice.as_ref().and_then(tool_choice_to_wire),
    }
}

fn internal_message_to_wire(msg: &Message) -> InboundMessage {
    let role = if msg.role == Role::Assistant { "assistant" } else { "user" };

    let mut blocks = Vec::new();
    for part in &msg.parts {
        match part {
            Part::Text { text } => blocks.push(ContentBlock::Text { text: text.clone() }),
            Part::Image { data, media_type } => blocks.push(ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64".to_owned(),
                    media_type: Some(media_type.clone()),
                    data: data.clone(),
                },
            }),
            Part::ToolCall { id, name, arguments } => blocks.push(ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: serde_json::from_str(arguments).unwrap_or_else(|_| serde_json::json!({})),
            }),
            Part::ToolResult { .. } => {}
        }
    }

    // Single text block collapses to the string shorthand
    let content = if blocks.len() == 1
        && let ContentBlock::Text { text } = &blocks[0]
    {
        MessageContent::Text(text.clone())
    } else {
        MessageContent::Blocks(blocks)
    };

    InboundMessage {
        role: role.to_owned(),
        content,
    }
}

fn tool_choice_to_wire(choice: &ToolChoice) -> Option<MessagesToolChoice> {
    match choice {
        // The Messages schema has no "none"; omit the field instead
        ToolChoice::None => None,
        ToolChoice::Auto => Some(MessagesToolChoice {
            choice_type: "auto".to_owned(),
            name: None,
        }),
        ToolChoice::Required => Some(MessagesToolChoice {
            choice_type: "any".to_owned(),
            name: None,
        }),
        ToolChoice::Tool { name } => Some(MessagesToolChoice {
            choice_type: "tool".to_owned(),
            name: Some(name.clone()),
        }),
    }
}

// -- Response projection --

/// Map a non-streaming Messages response to a canonical result
pub fn response_to_result(resp: MessagesResponse) -> GenerationResult {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in resp.content {
        match block {
            ResponseBlock::Text { text: t } => text.push_str(&t),
            ResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolInvocation {
                id,
                name,
                arguments: input.to_string(),
            }),
        }
    }

    GenerationResult {
        text,
        tool_calls,
        finish: resp
            .stop_reason
            .as_deref()
            .map_or(FinishReason::Stop, parse_stop_reason),
        usage: Usage {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
        },
    }
}

/// Build the non-streaming response the gateway returns on the messages surface
pub fn result_to_response(result: &GenerationResult, model: &str, id: &str) -> MessagesResponse {
    let mut content = Vec::new();
    if !result.text.is_empty() {
        content.push(ResponseBlock::Text {
            text: result.text.clone(),
        });
    }
    for tc in &result.tool_calls {
        content.push(ResponseBlock::ToolUse {
            id: tc.id.clone(),
            name: tc.name.clone(),
            input: serde_json::from_str(&tc.arguments).unwrap_or_else(|_| serde_json::json!({})),
        });
    }

    let stop_reason = if result.finish == FinishReason::ToolCalls {
        "tool_use"
    } else {
        "end_turn"
    };

    MessagesResponse {
        id: id.to_owned(),
        response_type: "message".to_owned(),
        role: "assistant".to_owned(),
        content,
        model: model.to_owned(),
        stop_reason: Some(stop_reason.to_owned()),
        stop_sequence: None,
        usage: MessagesUsage {
            input_tokens: result.usage.prompt_tokens,
            output_tokens: result.usage.completion_tokens,
        },
    }
}

fn parse_stop_reason(s: &str) -> FinishReason {
    match s {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        _ => FinishReason::Other,
    }
}

// -- Streaming: messages wire -> canonical events --

/// Assembles Anthropic stream events into the canonical alphabet
///
/// A `tool_use` block open, its `input_json_delta` fragments, and the block
/// close collapse into one complete `ToolCall` event.
#[derive(Debug, Default)]
pub struct MessagesStreamState {
    current_tool: Option<(String, String, String)>,
    finish: Option<FinishReason>,
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl MessagesStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one parsed upstream event into canonical events
    pub fn push_event(&mut self, event: MessagesStreamEvent) -> Vec<StreamEvent> {
        match event {
            MessagesStreamEvent::MessageStart { message } => {
                self.prompt_tokens = message.usage.input_tokens;
                Vec::new()
            }

            MessagesStreamEvent::ContentBlockStart { content_block, .. } => {
                if let crate::protocol::anthropic::StreamContentBlock::ToolUse { id, name, .. } = content_block {
                    self.current_tool = Some((id, name, String::new()));
                }
                Vec::new()
            }

            MessagesStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                StreamDelta::TextDelta { text } => vec![StreamEvent::TextDelta { delta: text }],
                StreamDelta::InputJsonDelta { partial_json } => {
                    if let Some((_, _, json)) = &mut self.current_tool {
                        json.push_str(&partial_json);
                    }
                    Vec::new()
                }
                StreamDelta::ThinkingDelta { .. } => Vec::new(),
            },

            MessagesStreamEvent::ContentBlockStop { .. } => {
                self.current_tool.take().map_or_else(Vec::new, |(id, name, json)| {
                    vec![StreamEvent::ToolCall {
                        id,
                        name,
                        arguments: if json.is_empty() { "{}".to_owned() } else { json },
                    }]
                })
            }

            MessagesStreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason.as_deref() {
                    self.finish = Some(parse_stop_reason(reason));
                }
                if let Some(usage) = usage {
                    self.completion_tokens = usage.output_tokens;
                    if usage.input_tokens > 0 {
                        self.prompt_tokens = usage.input_tokens;
                    }
                }
                Vec::new()
            }

            MessagesStreamEvent::MessageStop => vec![StreamEvent::Finish {
                reason: self.finish.take().unwrap_or(FinishReason::Stop),
                usage: Usage {
                    prompt_tokens: self.prompt_tokens,
                    completion_tokens: self.completion_tokens,
                },
            }],

            MessagesStreamEvent::Ping => Vec::new(),
        }
    }
}
