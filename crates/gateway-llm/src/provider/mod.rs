//! Provider adapters
//!
//! Every adapter implements [`LanguageModel`] and emits the canonical
//! stream-event alphabet. Transport differences (bearer SSE, Anthropic
//! events, Code-Assist RPC, AWS Converse, the cursor subprocess) stay inside
//! the adapter.

pub mod anthropic;
pub mod bedrock;
pub mod code_assist;
pub mod cursor;
pub mod google;
pub mod openai;
pub mod vertex;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};

use crate::error::GatewayError;
use crate::types::{EventStream, FinishReason, GenerationRequest, GenerationResult, StreamEvent, Usage};

/// Wall timeout for upstream streams and child-process lifetime
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Uniform handle over one provider-bound model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Non-streaming generation
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, GatewayError>;

    /// Streaming generation producing canonical events
    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, GatewayError>;
}

/// Enforce the terminal-event contract and the wall timeout on a raw
/// adapter stream
///
/// Exactly one terminal event comes out: the inner stream's own `Finish` or
/// `Error`, a synthesized `Finish` if the upstream closed without one, or an
/// `Error` when the deadline passes. Nothing is emitted after it.
pub(crate) fn finalize_stream(inner: impl Stream<Item = StreamEvent> + Send + 'static) -> EventStream {
    let deadline = tokio::time::Instant::now() + STREAM_TIMEOUT;

    Box::pin(futures_util::stream::unfold(
        Some(Box::pin(inner)),
        move |state| async move {
            let mut stream = state?;
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(Some(event)) => {
                    let terminal = matches!(event, StreamEvent::Finish { .. } | StreamEvent::Error { .. });
                    Some((event, if terminal { None } else { Some(stream) }))
                }
                Ok(None) => Some((
                    StreamEvent::Finish {
                        reason: FinishReason::Other,
                        usage: Usage::default(),
                    },
                    None,
                )),
                Err(_) => Some((
                    StreamEvent::Error {
                        message: "upstream stream timed out".to_owned(),
                    },
                    None,
                )),
            }
        },
    ))
}

/// Drain a canonical stream into a non-streaming result
///
/// Used by adapters whose only transport is a stream. An `Error` event
/// surfaces as a gateway error.
pub(crate) async fn collect_stream(mut stream: EventStream) -> Result<GenerationResult, GatewayError> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        if let StreamEvent::Error { message } = event {
            return Err(GatewayError::UpstreamUnreachable(message));
        }
        events.push(event);
    }
    Ok(crate::types::stream::collect_events(events))
}

/// Map a non-2xx upstream response to `UpstreamRejected`
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::rejected(status.as_u16(), &body))
}

/// Process-unique id with a time component, e.g. `chatcmpl-18c2f4a30001`
pub(crate) fn simple_id(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    format!("{prefix}{now:x}{count:04x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finalize_appends_finish_when_upstream_ends_silently() {
        let inner = futures_util::stream::iter(vec![StreamEvent::TextDelta {
            delta: "hi".to_owned(),
        }]);
        let events: Vec<_> = finalize_stream(inner).collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], StreamEvent::Finish { .. }));
    }

    #[tokio::test]
    async fn finalize_stops_after_terminal_event() {
        let inner = futures_util::stream::iter(vec![
            StreamEvent::Finish {
                reason: FinishReason::Stop,
                usage: Usage::default(),
            },
            StreamEvent::TextDelta {
                delta: "late".to_owned(),
            },
        ]);
        let events: Vec<_> = finalize_stream(inner).collect().await;

        assert_eq!(events.len(), 1, "nothing may follow the terminal event");
    }

    #[test]
    fn simple_ids_are_unique() {
        assert_ne!(simple_id("x-"), simple_id("x-"));
    }
}
