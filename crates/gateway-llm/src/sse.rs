//! Stream multiplexer
//!
//! Consumes the canonical event stream and writes one of the two external
//! SSE framings: Chat Completions chunk frames terminated by `data: [DONE]`,
//! or the Anthropic Messages event protocol with its block-index state
//! machine.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};

use crate::convert::openai::event_to_chunk;
use crate::protocol::anthropic::{
    MessagesStreamEvent, MessagesUsage, ResponseBlock, StreamContentBlock, StreamDelta, StreamMessageDelta,
    StreamMessageStart, StreamUsage,
};
use crate::types::{EventStream, StreamEvent};

pub(crate) use crate::provider::simple_id;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// -- Chat Completions framing --

/// Frame a canonical stream as Chat Completions SSE
///
/// `Finish` produces the closing chunk followed by `data: [DONE]`; an
/// `Error` skips the chunk and goes straight to `[DONE]`.
pub fn chat_sse(events: EventStream, model: String) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let created = now_secs();
    let id = simple_id("chatcmpl-");

    let frames = events
        .map(move |event| {
            let mut out = Vec::new();
            match &event {
                StreamEvent::Error { message } => {
                    tracing::warn!(error = %message, "stream aborted");
                    out.push(Event::default().data("[DONE]"));
                }
                other => {
                    if let Some(chunk) = event_to_chunk(other, &id, &model, created) {
                        out.push(Event::default().data(serde_json::to_string(&chunk).unwrap_or_default()));
                    }
                    if matches!(other, StreamEvent::Finish { .. }) {
                        out.push(Event::default().data("[DONE]"));
                    }
                }
            }
            out
        })
        .flat_map(futures_util::stream::iter)
        .map(Ok::<Event, axum::Error>);

    Sse::new(frames).keep_alive(KeepAlive::default())
}

// -- Messages framing --

/// State machine producing the Messages event sequence
///
/// Block indices increase strictly; every `content_block_start` is closed by
/// exactly one `content_block_stop` before `message_delta`; tool-call
/// arguments travel as a single `input_json_delta` per block.
pub struct MessagesFramer {
    message_id: String,
    model: String,
    next_block: u32,
    open_text_block: Option<u32>,
    has_tool_calls: bool,
}

impl MessagesFramer {
    pub fn new(message_id: String, model: String) -> Self {
        Self {
            message_id,
            model,
            next_block: 0,
            open_text_block: None,
            has_tool_calls: false,
        }
    }

    /// The opening `message_start` frame
    pub fn start_frame(&self) -> MessagesStreamEvent {
        MessagesStreamEvent::MessageStart {
            message: StreamMessageStart {
                id: self.message_id.clone(),
                message_type: "message".to_owned(),
                role: "assistant".to_owned(),
                model: self.model.clone(),
                content: Vec::<ResponseBlock>::new(),
                usage: MessagesUsage::default(),
            },
        }
    }

    /// Frames for one canonical event
    ///
    /// `Error` produces nothing; the caller closes the connection.
    pub fn on_event(&mut self, event: &StreamEvent) -> Vec<MessagesStreamEvent> {
        match event {
            StreamEvent::TextDelta { delta } => {
                let mut frames = Vec::new();
                let index = match self.open_text_block {
                    Some(index) => index,
                    None => {
                        let index = self.claim_block();
                        self.open_text_block = Some(index);
                        frames.push(MessagesStreamEvent::ContentBlockStart {
                            index,
                            content_block: StreamContentBlock::Text { text: String::new() },
                        });
                        index
                    }
                };
                frames.push(MessagesStreamEvent::ContentBlockDelta {
                    index,
                    delta: StreamDelta::TextDelta { text: delta.clone() },
                });
                frames
            }

            StreamEvent::ToolCall { id, name, arguments } => {
                let mut frames = self.close_open_text_block();
                let index = self.claim_block();
                self.has_tool_calls = true;

                frames.push(MessagesStreamEvent::ContentBlockStart {
                    index,
                    content_block: StreamContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: serde_json::json!({}),
                    },
                });
                // Arguments are complete by the time the adapter emits the
                // event, so the whole object goes out as one delta
                frames.push(MessagesStreamEvent::ContentBlockDelta {
                    index,
                    delta: StreamDelta::InputJsonDelta {
                        partial_json: arguments.clone(),
                    },
                });
                frames.push(MessagesStreamEvent::ContentBlockStop { index });
                frames
            }

            StreamEvent::Finish { .. } => {
                let mut frames = self.close_open_text_block();
                frames.push(MessagesStreamEvent::MessageDelta {
                    delta: StreamMessageDelta {
                        stop_reason: Some(
                            if self.has_tool_calls { "tool_use" } else { "end_turn" }.to_owned(),
                        ),
                        stop_sequence: None,
                    },
                    // The zero output count is deliberate wire behavior
                    usage: Some(StreamUsage {
                        input_tokens: 0,
                        output_tokens: 0,
                    }),
                });
                frames.push(MessagesStreamEvent::MessageStop);
                frames
            }

            StreamEvent::Error { message } => {
                tracing::warn!(error = %message, "stream aborted");
                Vec::new()
            }
        }
    }

    fn claim_block(&mut self) -> u32 {
        let index = self.next_block;
        self.next_block += 1;
        index
    }

    fn close_open_text_block(&mut self) -> Vec<MessagesStreamEvent> {
        self.open_text_block
            .take()
            .map_or_else(Vec::new, |index| vec![MessagesStreamEvent::ContentBlockStop { index }])
    }
}

/// Frame a canonical stream as Messages SSE
pub fn messages_sse(events: EventStream, model: String) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let framer = MessagesFramer::new(simple_id("msg_"), model);
    let start = framer.start_frame();

    let body = events
        .scan(framer, |framer, event| futures_util::future::ready(Some(framer.on_event(&event))))
        .flat_map(futures_util::stream::iter);

    let frames = futures_util::stream::iter(vec![start])
        .chain(body)
        .map(|frame| {
            Ok::<Event, axum::Error>(
                Event::default()
                    .event(frame.event_name())
                    .data(serde_json::to_string(&frame).unwrap_or_default()),
            )
        });

    Sse::new(frames).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, Usage};

    fn run_framer(events: &[StreamEvent]) -> Vec<MessagesStreamEvent> {
        let mut framer = MessagesFramer::new("msg_1".to_owned(), "m".to_owned());
        let mut frames = vec![framer.start_frame()];
        for event in events {
            frames.extend(framer.on_event(event));
        }
        frames
    }

    fn finish() -> StreamEvent {
        StreamEvent::Finish {
            reason: FinishReason::Stop,
            usage: Usage::default(),
        }
    }

    #[test]
    fn text_then_tool_call_sequence() {
        let frames = run_framer(&[
            StreamEvent::TextDelta { delta: "a".to_owned() },
            StreamEvent::TextDelta { delta: "b".to_owned() },
            StreamEvent::ToolCall {
                id: "call_1".to_owned(),
                name: "get_weather".to_owned(),
                arguments: r#"{"location":"Tokyo"}"#.to_owned(),
            },
            finish(),
        ]);

        let names: Vec<&str> = frames.iter().map(MessagesStreamEvent::event_name).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",  // text block 0
                "content_block_delta",  // "a"
                "content_block_delta",  // "b"
                "content_block_stop",   // text closes before the tool block
                "content_block_start",  // tool_use block 1
                "content_block_delta",  // whole args as one input_json_delta
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn block_starts_and_stops_balance_with_increasing_indices() {
        let frames = run_framer(&[
            StreamEvent::TextDelta { delta: "x".to_owned() },
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
            finish(),
        ]);

        let mut open: Vec<u32> = Vec::new();
        let mut started: Vec<u32> = Vec::new();
        for frame in &frames {
            match frame {
                MessagesStreamEvent::ContentBlockStart { index, .. } => {
                    started.push(*index);
                    open.push(*index);
                }
                MessagesStreamEvent::ContentBlockStop { index } => {
                    assert_eq!(open.pop(), Some(*index), "stop must match the open block");
                }
                MessagesStreamEvent::MessageDelta { .. } => {
                    assert!(open.is_empty(), "all blocks closed before message_delta");
                }
                _ => {}
            }
        }
        assert!(open.is_empty());
        assert!(started.windows(2).all(|w| w[0] < w[1]), "indices strictly increase");
    }

    #[test]
    fn tool_use_stop_reason_when_tools_called() {
        let frames = run_framer(&[
            StreamEvent::ToolCall {
                id: "c1".to_owned(),
                name: "f".to_owned(),
                arguments: r#"{"x":1}"#.to_owned(),
            },
            finish(),
        ]);

        let delta = frames
            .iter()
            .find_map(|f| match f {
                MessagesStreamEvent::MessageDelta { delta, usage } => Some((delta, usage)),
                _ => None,
            })
            .expect("message_delta frame");
        assert_eq!(delta.0.stop_reason.as_deref(), Some("tool_use"));

        let usage = delta.1.as_ref().expect("usage attached");
        assert_eq!(usage.output_tokens, 0, "zero output count preserved on the wire");
    }

    #[test]
    fn input_json_delta_concatenation_is_valid_json() {
        let frames = run_framer(&[
            StreamEvent::ToolCall {
                id: "c1".to_owned(),
                name: "f".to_owned(),
                arguments: r#"{"location":"Tokyo"}"#.to_owned(),
            },
            finish(),
        ]);

        let mut json = String::new();
        for frame in &frames {
            if let MessagesStreamEvent::ContentBlockDelta {
                delta: StreamDelta::InputJsonDelta { partial_json },
                ..
            } = frame
            {
                json.push_str(partial_json);
            }
        }
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["location"], "Tokyo");
    }

    #[test]
    fn message_delta_usage_omits_zero_input_tokens() {
        let usage = StreamUsage {
            input_tokens: 0,
            output_tokens: 0,
        };
        let json = serde_json::to_value(usage).unwrap();
        assert!(json.get("input_tokens").is_none());
        assert_eq!(json["output_tokens"], 0);
    }

    #[test]
    fn error_event_produces_no_frames() {
        let mut framer = MessagesFramer::new("msg_1".to_owned(), "m".to_owned());
        let frames = framer.on_event(&StreamEvent::Error {
            message: "boom".to_owned(),
        });
        assert!(frames.is_empty());
    }
}
