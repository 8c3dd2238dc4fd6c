//! Conversion between canonical types and the Google `contents`/`parts` format
//!
//! Shared by the public Generative Language adapter and the Code-Assist
//! adapter; the latter enables the thinking config and wraps the request in
//! its project envelope.

use std::collections::HashMap;

use crate::protocol::google::{
    Candidate, Content, FunctionCall, FunctionCallingConfig, FunctionDeclaration, FunctionResponse, GenerateRequest,
    GenerateResponse, GenerationConfig, InlineData, Part as GooglePart, ThinkingConfig, Tool, ToolConfig,
};
use crate::types::{
    FinishReason, GenerationRequest, Message, Part, Role, StreamEvent, ToolChoice, Usage,
};

/// Build the Google-native request body
pub fn internal_to_request(req: &GenerationRequest, include_thinking: bool) -> GenerateRequest {
    // functionResponse parts need the original function name; recover it from
    // the tool-call parts earlier in the conversation
    let call_names: HashMap<&str, &str> = req
        .messages
        .iter()
        .flat_map(Message::tool_calls)
        .map(|(id, name, _)| (id, name))
        .collect();

    let mut contents = Vec::new();
    for msg in req.conversation() {
        match msg.role {
            Role::Assistant => contents.push(message_to_content(msg, "model")),
            Role::User => contents.push(message_to_content(msg, "user")),
            Role::Tool => {
                for part in &msg.parts {
                    if let Part::ToolResult { id, content } = part {
                        contents.push(Content {
                            role: Some("user".to_owned()),
                            parts: vec![GooglePart::FunctionResponse(FunctionResponse {
                                name: call_names.get(id.as_str()).map_or_else(|| id.clone(), |n| (*n).to_owned()),
                                response: serde_json::json!({"output": content}),
                                id: Some(id.clone()),
                            })],
                        });
                    }
                }
            }
            Role::System => {}
        }
    }

    let thinking_config = include_thinking.then(|| ThinkingConfig {
        include_thoughts: true,
        thinking_level: "LOW".to_owned(),
    });

    GenerateRequest {
        contents,
        system_instruction: req.system_text().map(|text| Content {
            role: None,
            parts: vec![GooglePart::Text(text)],
        }),
        generation_config: Some(GenerationConfig {
            temperature: req.temperature,
            top_p: req.top_p,
            max_output_tokens: req.max_tokens,
            thinking_config,
        }),
        tools: req.tools.as_ref().map(|tools| {
            vec![Tool {
                function_declarations: tools
                    .iter()
                    .map(|t| FunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: Some(t.parameters.clone()),
                    })
                    .collect(),
            }]
        }),
        tool_config: req.tool_choice.as_ref().map(tool_choice_to_wire),
    }
}

fn message_to_content(msg: &Message, role: &str) -> Content {
    let mut parts = Vec::new();

    for part in &msg.parts {
        match part {
            Part::Text { text } => parts.push(GooglePart::Text(text.clone())),
            Part::Image { data, media_type } => parts.push(GooglePart::InlineData(InlineData {
                mime_type: media_type.clone(),
                data: data.clone(),
            })),
            Part::ToolCall { id, name, arguments } => parts.push(GooglePart::FunctionCall(FunctionCall {
                name: name.clone(),
                args: serde_json::from_str(arguments).unwrap_or_else(|_| serde_json::json!({})),
                id: Some(id.clone()),
            })),
            Part::ToolResult { .. } => {}
        }
    }

    if parts.is_empty() {
        parts.push(GooglePart::Text(String::new()));
    }

    Content {
        role: Some(role.to_owned()),
        parts,
    }
}

fn tool_choice_to_wire(choice: &ToolChoice) -> ToolConfig {
    let (mode, allowed) = match choice {
        ToolChoice::Auto => ("AUTO", None),
        ToolChoice::None => ("NONE", None),
        ToolChoice::Required => ("ANY", None),
        ToolChoice::Tool { name } => ("ANY", Some(vec![name.clone()])),
    };
    ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode: mode.to_owned(),
            allowed_function_names: allowed,
        },
    }
}

// -- Streaming: google chunks -> canonical events --

/// Accumulates Google stream chunks into canonical events
///
/// Finish and usage arrive piecemeal across chunks; the terminal `Finish`
/// event is emitted only when the SSE stream ends.
#[derive(Debug, Default)]
pub struct GoogleStreamState {
    finish: Option<FinishReason>,
    usage: Usage,
    emitted_tool_call: bool,
    synthetic_call_counter: u32,
}

impl GoogleStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one streamed `GenerateResponse` into canonical events
    pub fn push_response(&mut self, resp: &GenerateResponse) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        for candidate in &resp.candidates {
            events.extend(self.candidate_events(candidate));
        }

        if let Some(usage) = &resp.usage_metadata {
            self.usage = Usage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count + usage.thoughts_token_count,
            };
        }

        events
    }

    fn candidate_events(&mut self, candidate: &Candidate) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(content) = &candidate.content {
            for part in &content.parts {
                match part {
                    GooglePart::Text(text) => {
                        if !text.is_empty() {
                            events.push(StreamEvent::TextDelta { delta: text.clone() });
                        }
                    }
                    GooglePart::FunctionCall(fc) => {
                        self.emitted_tool_call = true;
                        self.synthetic_call_counter += 1;
                        events.push(StreamEvent::ToolCall {
                            id: fc
                                .id
                                .clone()
                                .unwrap_or_else(|| format!("call_{}_{}", fc.name, self.synthetic_call_counter)),
                            name: fc.name.clone(),
                            arguments: fc.args.to_string(),
                        });
                    }
                    _ => {}
                }
            }
        }

        if let Some(reason) = candidate.finish_reason.as_deref() {
            self.finish = Some(parse_finish_reason(reason));
        }

        events
    }

    /// Terminal event once the SSE stream ends
    pub fn finish(self) -> StreamEvent {
        let reason = self.finish.unwrap_or(FinishReason::Stop);
        let reason = if reason == FinishReason::Stop && self.emitted_tool_call {
            FinishReason::ToolCalls
        } else {
            reason
        };
        StreamEvent::Finish {
            reason,
            usage: self.usage,
        }
    }
}

fn parse_finish_reason(s: &str) -> FinishReason {
    match s {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        _ => FinishReason::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolSpec;

    fn request_with_tool_round_trip() -> GenerationRequest {
        GenerationRequest {
            model: "gemini-pro".to_owned(),
            messages: vec![
                Message::text(Role::User, "weather?"),
                Message {
                    role: Role::Assistant,
                    parts: vec![Part::ToolCall {
                        id: "call_1".to_owned(),
                        name: "get_weather".to_owned(),
                        arguments: r#"{"location":"Tokyo"}"#.to_owned(),
                    }],
                },
                Message {
                    role: Role::Tool,
                    parts: vec![Part::ToolResult {
                        id: "call_1".to_owned(),
                        content: "sunny".to_owned(),
                    }],
                },
            ],
            tools: Some(vec![ToolSpec {
                name: "get_weather".to_owned(),
                description: None,
                parameters: serde_json::json!({"type": "object"}),
            }]),
            ..GenerationRequest::default()
        }
    }

    #[test]
    fn roles_remap_and_tool_results_become_function_responses() {
        let wire = internal_to_request(&request_with_tool_round_trip(), false);

        assert_eq!(wire.contents[0].role.as_deref(), Some("user"));
        assert_eq!(wire.contents[1].role.as_deref(), Some("model"));

        let GooglePart::FunctionCall(fc) = &wire.contents[1].parts[0] else {
            panic!("expected functionCall part");
        };
        assert_eq!(fc.args["location"], "Tokyo");

        let GooglePart::FunctionResponse(fr) = &wire.contents[2].parts[0] else {
            panic!("expected functionResponse part");
        };
        assert_eq!(fr.name, "get_weather", "name recovered from the prior tool call");
        assert_eq!(fr.response["output"], "sunny");
        assert_eq!(fr.id.as_deref(), Some("call_1"));
    }

    #[test]
    fn thinking_config_only_for_code_assist() {
        let without = internal_to_request(&request_with_tool_round_trip(), false);
        assert!(without.generation_config.unwrap().thinking_config.is_none());

        let with = internal_to_request(&request_with_tool_round_trip(), true);
        let config = with.generation_config.unwrap().thinking_config.unwrap();
        assert!(config.include_thoughts);
        assert_eq!(config.thinking_level, "LOW");
    }

    #[test]
    fn stream_usage_sums_thought_tokens() {
        let mut state = GoogleStreamState::new();
        let resp: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "hi"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 10,
                "candidatesTokenCount": 4,
                "thoughtsTokenCount": 6
            }
        }))
        .unwrap();

        let events = state.push_response(&resp);
        assert!(matches!(&events[0], StreamEvent::TextDelta { delta } if delta == "hi"));

        let StreamEvent::Finish { reason, usage } = state.finish() else {
            panic!("expected finish");
        };
        assert_eq!(reason, FinishReason::Stop);
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 10, "candidates + thoughts");
    }

    #[test]
    fn function_call_in_stream_yields_tool_call_finish() {
        let mut state = GoogleStreamState::new();
        let resp: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": "get_weather", "args": {"location": "Tokyo"}}}
                ]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();

        let events = state.push_response(&resp);
        let StreamEvent::ToolCall { arguments, .. } = &events[0] else {
            panic!("expected tool call");
        };
        let parsed: serde_json::Value = serde_json::from_str(arguments).unwrap();
        assert_eq!(parsed["location"], "Tokyo");

        assert!(matches!(
            state.finish(),
            StreamEvent::Finish {
                reason: FinishReason::ToolCalls,
                ..
            }
        ));
    }
}
