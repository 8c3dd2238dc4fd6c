mod harness;

use gateway_auth::Credential;
use harness::mock_llm::MockUpstream;
use harness::server::TestServer;

async fn gateway_with_mock(mock: &MockUpstream) -> TestServer {
    let mut credential = Credential::from_api_key("sk-test");
    credential.enabled_models = vec!["gpt-4o-mini".to_owned()];

    TestServer::start(
        vec![("openai", credential)],
        vec![("openai", mock.base_url())],
    )
    .await
    .unwrap()
}

/// `(event_name, payload)` pairs from a Messages SSE body
fn sse_events(text: &str) -> Vec<(String, serde_json::Value)> {
    let mut events = Vec::new();
    let mut current_event = None;

    for line in text.lines() {
        if let Some(name) = line.strip_prefix("event: ") {
            current_event = Some(name.to_owned());
        } else if let Some(data) = line.strip_prefix("data: ")
            && let Some(name) = current_event.take()
            && let Ok(payload) = serde_json::from_str(data)
        {
            events.push((name, payload));
        }
    }
    events
}

#[tokio::test]
async fn streaming_tool_call_event_sequence() {
    let mock = MockUpstream::start().await.unwrap();
    let server = gateway_with_mock(&mock).await;

    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .json(&serde_json::json!({
            "model": "openai/gpt-4o-mini",
            "stream": true,
            "max_tokens": 200,
            "messages": [{"role": "user", "content": "weather in Tokyo"}],
            "tools": [{
                "name": "get_weather",
                "description": "Get current weather",
                "input_schema": {"type": "object", "properties": {"location": {"type": "string"}}}
            }]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    let events = sse_events(&text);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();

    assert_eq!(names.first().copied(), Some("message_start"));
    assert_eq!(names.last().copied(), Some("message_stop"));

    let tool_start = events
        .iter()
        .find(|(name, payload)| name == "content_block_start" && payload["content_block"]["type"] == "tool_use")
        .expect("tool_use content_block_start");
    assert_eq!(tool_start.1["content_block"]["name"], "get_weather");

    let mut partial_json = String::new();
    for (name, payload) in &events {
        if name == "content_block_delta" && payload["delta"]["type"] == "input_json_delta" {
            partial_json.push_str(payload["delta"]["partial_json"].as_str().unwrap_or_default());
        }
    }
    let parsed: serde_json::Value = serde_json::from_str(&partial_json).unwrap();
    assert_eq!(parsed["location"], "Tokyo");

    let message_delta = events
        .iter()
        .find(|(name, _)| name == "message_delta")
        .expect("message_delta frame");
    assert_eq!(message_delta.1["delta"]["stop_reason"], "tool_use");
    assert_eq!(message_delta.1["usage"]["output_tokens"], 0);

    // Stops balance starts and arrive before message_delta
    let delta_position = names.iter().position(|n| *n == "message_delta").unwrap();
    let starts = names[..delta_position]
        .iter()
        .filter(|n| **n == "content_block_start")
        .count();
    let stops = names[..delta_position]
        .iter()
        .filter(|n| **n == "content_block_stop")
        .count();
    assert_eq!(starts, stops);
}

#[tokio::test]
async fn streaming_text_opens_and_closes_one_block() {
    let mock = MockUpstream::start().await.unwrap();
    let server = gateway_with_mock(&mock).await;

    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .json(&serde_json::json!({
            "model": "openai/gpt-4o-mini",
            "stream": true,
            "max_tokens": 20,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    let text = resp.text().await.unwrap();
    let events = sse_events(&text);

    let mut content = String::new();
    let mut indices = Vec::new();
    for (name, payload) in &events {
        match name.as_str() {
            "content_block_start" => {
                indices.push(payload["index"].as_u64().unwrap());
                assert_eq!(payload["content_block"]["type"], "text");
            }
            "content_block_delta" => {
                if payload["delta"]["type"] == "text_delta" {
                    content.push_str(payload["delta"]["text"].as_str().unwrap_or_default());
                }
            }
            _ => {}
        }
    }

    assert_eq!(content, "ok");
    assert_eq!(indices, vec![0], "single text block at index 0");

    let message_delta = events.iter().find(|(name, _)| name == "message_delta").unwrap();
    assert_eq!(message_delta.1["delta"]["stop_reason"], "end_turn");
}

#[tokio::test]
async fn non_streaming_tool_call_builds_tool_use_block() {
    let mock = MockUpstream::start().await.unwrap();
    let server = gateway_with_mock(&mock).await;

    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .json(&serde_json::json!({
            "model": "openai/gpt-4o-mini",
            "max_tokens": 200,
            "messages": [{"role": "user", "content": "weather in Tokyo"}],
            "tools": [{
                "name": "get_weather",
                "description": "Get current weather",
                "input_schema": {"type": "object"}
            }]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();

    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["stop_reason"], "tool_use");

    let blocks = body["content"].as_array().unwrap();
    let tool_use = blocks
        .iter()
        .find(|b| b["type"] == "tool_use")
        .expect("tool_use block");
    assert_eq!(tool_use["name"], "get_weather");
    assert_eq!(tool_use["input"]["location"], "Tokyo");
}

#[tokio::test]
async fn non_streaming_text_ends_turn() {
    let mock = MockUpstream::start().await.unwrap();
    let server = gateway_with_mock(&mock).await;

    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .json(&serde_json::json!({
            "model": "openai/gpt-4o-mini",
            "max_tokens": 20,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "ok");
}

#[tokio::test]
async fn tool_results_forwarded_through_tool_augmented_turn() {
    let mock = MockUpstream::start().await.unwrap();
    let server = gateway_with_mock(&mock).await;

    // A full tool turn: assistant tool_use followed by the user's tool_result
    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .json(&serde_json::json!({
            "model": "openai/gpt-4o-mini",
            "max_tokens": 100,
            "messages": [
                {"role": "user", "content": "weather in Tokyo"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "call_1", "name": "get_weather", "input": {"location": "Tokyo"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "call_1", "content": "sunny, 25C"}
                ]}
            ]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200, "tool-result turns must convert cleanly");
    assert_eq!(mock.completion_count(), 1);
}
