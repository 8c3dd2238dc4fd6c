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

fn sse_data_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(str::to_owned)
        .collect()
}

#[tokio::test]
async fn non_streaming_text_round_trip() {
    let mock = MockUpstream::start().await.unwrap();
    let server = gateway_with_mock(&mock).await;

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&serde_json::json!({
            "model": "openai/gpt-4o-mini",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false,
            "max_tokens": 5
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();

    assert_eq!(body["choices"][0]["message"]["content"], "ok");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert!(body["usage"]["prompt_tokens"].is_u64());
    assert!(body["usage"]["completion_tokens"].is_u64());
    assert_eq!(mock.completion_count(), 1);
}

#[tokio::test]
async fn streaming_tool_call_accumulates_arguments() {
    let mock = MockUpstream::start().await.unwrap();
    let server = gateway_with_mock(&mock).await;

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&serde_json::json!({
            "model": "openai/gpt-4o-mini",
            "messages": [{"role": "user", "content": "weather in Tokyo"}],
            "stream": true,
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_weather",
                    "description": "Get current weather",
                    "parameters": {"type": "object", "properties": {"location": {"type": "string"}}}
                }
            }]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    let events = sse_data_lines(&text);

    let mut tool_name = None;
    let mut arguments = String::new();
    let mut finish_reason = None;

    for data in &events {
        if data == "[DONE]" {
            continue;
        }
        let chunk: serde_json::Value = serde_json::from_str(data).unwrap();
        assert_eq!(chunk["object"], "chat.completion.chunk");

        if let Some(calls) = chunk["choices"][0]["delta"]["tool_calls"].as_array() {
            for call in calls {
                if let Some(name) = call["function"]["name"].as_str() {
                    tool_name = Some(name.to_owned());
                }
                if let Some(args) = call["function"]["arguments"].as_str() {
                    arguments.push_str(args);
                }
            }
        }
        if let Some(reason) = chunk["choices"][0]["finish_reason"].as_str() {
            finish_reason = Some(reason.to_owned());
        }
    }

    assert_eq!(tool_name.as_deref(), Some("get_weather"));
    let parsed: serde_json::Value = serde_json::from_str(&arguments).unwrap();
    assert_eq!(parsed["location"], "Tokyo");
    assert_eq!(finish_reason.as_deref(), Some("tool_calls"));
    assert_eq!(events.last().map(String::as_str), Some("[DONE]"));
}

#[tokio::test]
async fn streaming_text_reconstructs_and_terminates() {
    let mock = MockUpstream::start().await.unwrap();
    let server = gateway_with_mock(&mock).await;

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&serde_json::json!({
            "model": "openai/gpt-4o-mini",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }))
        .send()
        .await
        .unwrap();

    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    assert!(content_type.contains("text/event-stream"), "got {content_type}");

    let text = resp.text().await.unwrap();
    let events = sse_data_lines(&text);

    let mut content = String::new();
    for data in &events {
        if data == "[DONE]" {
            continue;
        }
        let chunk: serde_json::Value = serde_json::from_str(data).unwrap();
        if let Some(delta) = chunk["choices"][0]["delta"]["content"].as_str() {
            content.push_str(delta);
        }
    }

    assert_eq!(content, "ok");
    assert_eq!(
        events.iter().filter(|d| *d == "[DONE]").count(),
        1,
        "exactly one terminator"
    );
}

#[tokio::test]
async fn unknown_provider_returns_error_body() {
    let server = TestServer::start(vec![], vec![]).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&serde_json::json!({
            "model": "nope/x",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Unsupported provider: nope");
}

#[tokio::test]
async fn missing_credentials_mention_the_provider() {
    let server = TestServer::start(vec![], vec![]).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&serde_json::json!({
            "model": "openai/gpt-4o-mini",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("openai"), "message should name the provider: {message}");
}

#[tokio::test]
async fn upstream_rejection_surfaces_as_error() {
    let mock = MockUpstream::start_failing(1).await.unwrap();
    let server = gateway_with_mock(&mock).await;

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&serde_json::json!({
            "model": "openai/gpt-4o-mini",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    // No retries: the single upstream failure maps straight to 500
    assert_eq!(resp.status(), 500);
    assert_eq!(mock.completion_count(), 1);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"]["message"].as_str().unwrap().contains("500"));
}

#[tokio::test]
async fn malformed_body_is_a_gateway_error() {
    let server = TestServer::start(vec![], vec![]).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"]["message"].as_str().unwrap().contains("malformed"));
}
