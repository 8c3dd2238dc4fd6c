//! `cursor-agent` subprocess adapter
//!
//! Uses the cursor CLI as a black-box model: the conversation is serialized
//! onto stdin as labeled sections, stdout is NDJSON. Assistant events carry
//! cumulative text, so deltas are computed against the last seen value.
//! Tool-call events whose de-camelCased name matches a caller-declared tool
//! are intercepted and forwarded; cursor's internal tools run in-process and
//! are ignored.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::wrappers::ReceiverStream;

use super::{LanguageModel, STREAM_TIMEOUT, collect_stream, finalize_stream, simple_id};
use crate::error::GatewayError;
use crate::types::{
    EventStream, FinishReason, GenerationRequest, GenerationResult, Part, Role, StreamEvent, ToolSpec, Usage,
};

/// Environment variable overriding the binary location
const EXECUTABLE_ENV: &str = "CURSOR_AGENT_EXECUTABLE";

/// Cursor subprocess adapter; needs no credentials
pub struct CursorAgent {
    executable: PathBuf,
}

impl CursorAgent {
    pub fn new() -> Self {
        let executable = std::env::var_os(EXECUTABLE_ENV)
            .map_or_else(|| PathBuf::from("cursor-agent"), PathBuf::from);
        Self { executable }
    }
}

impl Default for CursorAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for CursorAgent {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, GatewayError> {
        collect_stream(self.stream(request).await?).await
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, GatewayError> {
        let prompt = compose_prompt(request);
        let caller_tools = request.tools.clone().unwrap_or_default();

        let mut command = Command::new(&self.executable);
        command
            .arg("--print")
            .args(["--output-format", "stream-json"])
            .arg("--stream-partial-output")
            .arg("--force")
            .args(["--model", &request.model]);

        // Without caller tools cursor answers directly; with tools it stays
        // in default mode so intercepted calls can surface
        if !request.has_tools() {
            command.args(["--mode", "ask"]);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GatewayError::SubprocessFailed {
                code: -1,
                stderr: format!("failed to spawn {}: {e}", self.executable.display()),
            })?;

        let (tx, rx) = tokio::sync::mpsc::channel::<StreamEvent>(32);

        tokio::spawn(async move {
            run_child(&mut child, prompt, &caller_tools, &tx).await;
        });

        Ok(finalize_stream(ReceiverStream::new(rx)))
    }
}

async fn run_child(
    child: &mut Child,
    prompt: String,
    caller_tools: &[ToolSpec],
    tx: &tokio::sync::mpsc::Sender<StreamEvent>,
) {
    if let Some(mut stdin) = child.stdin.take() {
        if stdin.write_all(prompt.as_bytes()).await.is_err() {
            let _ = tx
                .send(StreamEvent::Error {
                    message: "failed to write prompt to cursor-agent".to_owned(),
                })
                .await;
            return;
        }
        drop(stdin);
    }

    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        })
    });

    let Some(stdout) = child.stdout.take() else {
        let _ = tx
            .send(StreamEvent::Error {
                message: "cursor-agent produced no stdout".to_owned(),
            })
            .await;
        return;
    };
    let mut lines = BufReader::new(stdout).lines();

    let mut last_text = String::new();
    let mut seen_calls: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut intercepted = false;

    let deadline = tokio::time::sleep(STREAM_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => {
                terminate(child).await;
                let _ = tx
                    .send(StreamEvent::Error {
                        message: "cursor-agent timed out".to_owned(),
                    })
                    .await;
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    for event in parse_line(&line, caller_tools, &mut last_text, &mut seen_calls) {
                        if matches!(event, StreamEvent::ToolCall { .. }) {
                            intercepted = true;
                        }
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: format!("cursor-agent read failed: {e}"),
                        })
                        .await;
                    return;
                }
            }
        }
    }

    let status = child.wait().await;
    let exited_cleanly = status.as_ref().is_ok_and(std::process::ExitStatus::success);

    if exited_cleanly {
        let _ = tx
            .send(StreamEvent::Finish {
                reason: if intercepted { FinishReason::ToolCalls } else { FinishReason::Stop },
                usage: Usage::default(),
            })
            .await;
    } else {
        let code = status.ok().and_then(|s| s.code()).unwrap_or(-1);
        let stderr = match stderr_task {
            Some(task) => tokio::time::timeout(Duration::from_secs(2), task)
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default(),
            None => String::new(),
        };
        let excerpt: String = stderr.chars().take(400).collect();
        let _ = tx
            .send(StreamEvent::Error {
                message: GatewayError::SubprocessFailed { code, stderr: excerpt }.to_string(),
            })
            .await;
    }
}

/// SIGTERM first, escalate only if the child lingers
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let _ = Command::new("kill").args(["-TERM", &pid.to_string()]).status().await;
        if tokio::time::timeout(Duration::from_secs(2), child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}

/// Translate one NDJSON line into canonical events
fn parse_line(
    line: &str,
    caller_tools: &[ToolSpec],
    last_text: &mut String,
    seen_calls: &mut std::collections::HashSet<String>,
) -> Vec<StreamEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
        tracing::debug!(line, "skipping unparseable cursor-agent line");
        return Vec::new();
    };

    match value.get("type").and_then(|t| t.as_str()) {
        Some("assistant") => {
            let cumulative = assistant_text(&value);
            let delta = if let Some(suffix) = cumulative.strip_prefix(last_text.as_str()) {
                suffix.to_owned()
            } else {
                // Cursor restarted the message; treat the new value as a whole
                cumulative.clone()
            };
            *last_text = cumulative;
            if delta.is_empty() {
                Vec::new()
            } else {
                vec![StreamEvent::TextDelta { delta }]
            }
        }
        Some("tool_call") => intercept_tool_call(&value, caller_tools, seen_calls)
            .map_or_else(Vec::new, |event| vec![event]),
        _ => Vec::new(),
    }
}

/// Cumulative assistant text across the message content blocks
fn assistant_text(value: &serde_json::Value) -> String {
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default()
}

/// Forward a cursor tool call iff it names a caller-declared tool
fn intercept_tool_call(
    value: &serde_json::Value,
    caller_tools: &[ToolSpec],
    seen_calls: &mut std::collections::HashSet<String>,
) -> Option<StreamEvent> {
    let inner = value.get("tool_call")?.as_object()?;
    let (raw_key, payload) = inner.iter().next()?;

    let resolved = decamel_tool_key(raw_key);
    let spec = caller_tools.iter().find(|t| names_match(&t.name, &resolved))?;

    let call_id = value
        .get("call_id")
        .and_then(|v| v.as_str())
        .map_or_else(|| simple_id("call-"), str::to_owned);

    if !seen_calls.insert(call_id.clone()) {
        return None;
    }

    let arguments = payload
        .get("args")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    Some(StreamEvent::ToolCall {
        id: call_id,
        name: spec.name.clone(),
        arguments: arguments.to_string(),
    })
}

/// `readToolCall` -> `read`, `writeFileToolCall` -> `write_file`
fn decamel_tool_key(key: &str) -> String {
    let stem = key.strip_suffix("ToolCall").unwrap_or(key);
    let mut out = String::with_capacity(stem.len() + 4);
    for (i, ch) in stem.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Case-insensitive comparison over alphanumerics only
fn names_match(a: &str, b: &str) -> bool {
    let normalize = |s: &str| {
        s.chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect::<String>()
    };
    normalize(a) == normalize(b)
}

/// Serialize the conversation into the labeled-section stdin prompt
fn compose_prompt(request: &GenerationRequest) -> String {
    let mut sections: Vec<String> = Vec::new();
    let mut has_tool_results = false;

    if let Some(system) = request.system_text() {
        sections.push(format!("SYSTEM:\n{system}"));
    }

    if request.has_tools()
        && let Some(tools) = &request.tools
    {
        let mut block = String::from("SYSTEM:\nYou can call the following tools. To call one, use it by name.\n");
        for tool in tools {
            let description = tool.description.as_deref().unwrap_or("");
            block.push_str(&format!(
                "- {}: {description}\n  schema: {}\n",
                tool.name, tool.parameters
            ));
        }
        sections.push(block);
    }

    for msg in request.conversation() {
        match msg.role {
            Role::User => sections.push(format!("USER:\n{}", msg.text_content())),
            Role::Assistant => {
                let mut body = msg.text_content();
                for (_, name, args) in msg.tool_calls() {
                    if !body.is_empty() {
                        body.push('\n');
                    }
                    body.push_str(&format!("[called tool {name} with {args}]"));
                }
                sections.push(format!("ASSISTANT:\n{body}"));
            }
            Role::Tool => {
                for part in &msg.parts {
                    if let Part::ToolResult { id, content } = part {
                        has_tool_results = true;
                        sections.push(format!("TOOL_RESULT ({id}):\n{content}"));
                    }
                }
            }
            Role::System => {}
        }
    }

    if has_tool_results {
        sections.push("Continue the conversation using the tool results above.".to_owned());
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather_tool() -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "get_weather".to_owned(),
            description: Some("look up weather".to_owned()),
            parameters: serde_json::json!({"type": "object"}),
        }]
    }

    #[test]
    fn decamel_strips_suffix_and_snakes() {
        assert_eq!(decamel_tool_key("readToolCall"), "read");
        assert_eq!(decamel_tool_key("writeFileToolCall"), "write_file");
        assert_eq!(decamel_tool_key("getWeatherToolCall"), "get_weather");
        assert_eq!(decamel_tool_key("shell"), "shell");
    }

    #[test]
    fn name_matching_ignores_case_and_punctuation() {
        assert!(names_match("get_weather", "GetWeather"));
        assert!(names_match("get-weather", "get_weather"));
        assert!(!names_match("get_weather", "set_weather"));
    }

    #[test]
    fn cumulative_assistant_text_yields_deltas() {
        let mut last = String::new();
        let mut seen = std::collections::HashSet::new();

        let first = parse_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hel"}]}}"#,
            &[],
            &mut last,
            &mut seen,
        );
        assert_eq!(first, vec![StreamEvent::TextDelta { delta: "Hel".to_owned() }]);

        let second = parse_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello"}]}}"#,
            &[],
            &mut last,
            &mut seen,
        );
        assert_eq!(second, vec![StreamEvent::TextDelta { delta: "lo".to_owned() }]);

        // Same cumulative value again produces nothing
        let third = parse_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello"}]}}"#,
            &[],
            &mut last,
            &mut seen,
        );
        assert!(third.is_empty());
    }

    #[test]
    fn matching_tool_call_is_intercepted_once() {
        let mut last = String::new();
        let mut seen = std::collections::HashSet::new();
        let line = r#"{"type":"tool_call","call_id":"c1","tool_call":{"getWeatherToolCall":{"args":{"location":"Tokyo"}}}}"#;

        let events = parse_line(line, &weather_tool(), &mut last, &mut seen);
        assert_eq!(events.len(), 1);
        let StreamEvent::ToolCall { id, name, arguments } = &events[0] else {
            panic!("expected tool call");
        };
        assert_eq!(id, "c1");
        assert_eq!(name, "get_weather");
        let parsed: serde_json::Value = serde_json::from_str(arguments).unwrap();
        assert_eq!(parsed["location"], "Tokyo");

        // Repeated call_id is dropped
        assert!(parse_line(line, &weather_tool(), &mut last, &mut seen).is_empty());
    }

    #[test]
    fn internal_cursor_tools_are_ignored() {
        let mut last = String::new();
        let mut seen = std::collections::HashSet::new();
        let line = r#"{"type":"tool_call","call_id":"c2","tool_call":{"shellToolCall":{"args":{"command":"ls"}}}}"#;

        assert!(parse_line(line, &weather_tool(), &mut last, &mut seen).is_empty());
    }

    #[test]
    fn prompt_sections_and_continuation_marker() {
        let request = GenerationRequest {
            model: "auto".to_owned(),
            system: Some("be brief".to_owned()),
            messages: vec![
                crate::types::Message::text(Role::User, "weather in Tokyo?"),
                crate::types::Message {
                    role: Role::Assistant,
                    parts: vec![Part::ToolCall {
                        id: "c1".to_owned(),
                        name: "get_weather".to_owned(),
                        arguments: r#"{"location":"Tokyo"}"#.to_owned(),
                    }],
                },
                crate::types::Message {
                    role: Role::Tool,
                    parts: vec![Part::ToolResult {
                        id: "c1".to_owned(),
                        content: "sunny".to_owned(),
                    }],
                },
            ],
            tools: Some(weather_tool()),
            ..GenerationRequest::default()
        };

        let prompt = compose_prompt(&request);
        assert!(prompt.starts_with("SYSTEM:\nbe brief"));
        assert!(prompt.contains("get_weather"));
        assert!(prompt.contains("USER:\nweather in Tokyo?"));
        assert!(prompt.contains("TOOL_RESULT (c1):\nsunny"));
        assert!(prompt.ends_with("Continue the conversation using the tool results above."));
    }
}
