//! Doctor: probe a running gateway through its public HTTP surface
//!
//! For every enabled model, issues text and tool probes in both streaming
//! and non-streaming modes against the selected endpoints. Exit code 0 only
//! when every probe passes.

use crate::args::Endpoint;

struct Probe {
    label: &'static str,
    endpoint: &'static str,
    body: serde_json::Value,
    stream: bool,
    expect_tool: bool,
}

pub async fn run(port: u16, provider_filter: Option<&str>, endpoint: Endpoint, verbose: bool) -> i32 {
    let base = format!("http://127.0.0.1:{port}");
    let client = reqwest::Client::new();

    let models = match list_models(&client, &base).await {
        Ok(models) => models,
        Err(e) => {
            eprintln!("gateway unreachable at {base}: {e}");
            return 1;
        }
    };

    let models: Vec<String> = models
        .into_iter()
        .filter(|id| provider_filter.is_none_or(|p| id.starts_with(&format!("{p}/"))))
        .collect();

    if models.is_empty() {
        eprintln!("no enabled models to probe");
        return 1;
    }

    let mut failures = 0u32;
    for model in &models {
        for probe in probes_for(model, endpoint) {
            let result = run_probe(&client, &base, &probe).await;
            match result {
                Ok(()) => println!("PASS {model} {} {}", probe.endpoint, probe.label),
                Err(e) => {
                    failures += 1;
                    println!("FAIL {model} {} {}", probe.endpoint, probe.label);
                    if verbose {
                        println!("     {e}");
                    }
                }
            }
        }
    }

    println!(
        "{} model(s) probed, {failures} failure(s)",
        models.len()
    );
    i32::from(failures > 0)
}

async fn list_models(client: &reqwest::Client, base: &str) -> Result<Vec<String>, String> {
    let response = client
        .get(format!("{base}/v1/models"))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let body: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
    Ok(body["data"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m["id"].as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default())
}

fn probes_for(model: &str, endpoint: Endpoint) -> Vec<Probe> {
    let tool = serde_json::json!({
        "name": "get_weather",
        "description": "Get the current weather for a location",
        "parameters": {
            "type": "object",
            "properties": {"location": {"type": "string"}},
            "required": ["location"]
        }
    });

    let mut probes = Vec::new();

    if endpoint.includes_chat() {
        for stream in [false, true] {
            probes.push(Probe {
                label: if stream { "text/stream" } else { "text" },
                endpoint: "chat",
                body: serde_json::json!({
                    "model": model,
                    "messages": [{"role": "user", "content": "Reply with the single word: ok"}],
                    "max_tokens": 20,
                    "stream": stream,
                }),
                stream,
                expect_tool: false,
            });
            probes.push(Probe {
                label: if stream { "tool/stream" } else { "tool" },
                endpoint: "chat",
                body: serde_json::json!({
                    "model": model,
                    "messages": [{"role": "user", "content": "What is the weather in Tokyo?"}],
                    "max_tokens": 200,
                    "stream": stream,
                    "tools": [{"type": "function", "function": tool}],
                }),
                stream,
                expect_tool: true,
            });
        }
    }

    if endpoint.includes_messages() {
        let anthropic_tool = serde_json::json!({
            "name": "get_weather",
            "description": "Get the current weather for a location",
            "input_schema": {
                "type": "object",
                "properties": {"location": {"type": "string"}},
                "required": ["location"]
            }
        });

        for stream in [false, true] {
            probes.push(Probe {
                label: if stream { "text/stream" } else { "text" },
                endpoint: "messages",
                body: serde_json::json!({
                    "model": model,
                    "max_tokens": 20,
                    "messages": [{"role": "user", "content": "Reply with the single word: ok"}],
                    "stream": stream,
                }),
                stream,
                expect_tool: false,
            });
            probes.push(Probe {
                label: if stream { "tool/stream" } else { "tool" },
                endpoint: "messages",
                body: serde_json::json!({
                    "model": model,
                    "max_tokens": 200,
                    "messages": [{"role": "user", "content": "What is the weather in Tokyo?"}],
                    "stream": stream,
                    "tools": [anthropic_tool],
                }),
                stream,
                expect_tool: true,
            });
        }
    }

    probes
}

async fn run_probe(client: &reqwest::Client, base: &str, probe: &Probe) -> Result<(), String> {
    let path = if probe.endpoint == "chat" {
        "/v1/chat/completions"
    } else {
        "/v1/messages"
    };

    let response = client
        .post(format!("{base}{path}"))
        .json(&probe.body)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status();
    let text = response.text().await.map_err(|e| e.to_string())?;

    if !status.is_success() {
        return Err(format!("status {status}: {text}"));
    }

    if probe.stream {
        check_stream(probe, &text)
    } else {
        check_response(probe, &text)
    }
}

fn check_response(probe: &Probe, text: &str) -> Result<(), String> {
    let body: serde_json::Value = serde_json::from_str(text).map_err(|e| format!("bad JSON: {e}"))?;

    if probe.endpoint == "chat" {
        let message = &body["choices"][0]["message"];
        if probe.expect_tool {
            let has_tool = message["tool_calls"].as_array().is_some_and(|t| !t.is_empty());
            let has_text = message["content"].as_str().is_some_and(|c| !c.is_empty());
            if !has_tool && !has_text {
                return Err(format!("no tool call or text in response: {text}"));
            }
        } else if message["content"].as_str().unwrap_or_default().is_empty() {
            return Err(format!("empty content: {text}"));
        }
    } else {
        let content = body["content"].as_array().cloned().unwrap_or_default();
        if content.is_empty() {
            return Err(format!("empty content array: {text}"));
        }
    }
    Ok(())
}

fn check_stream(probe: &Probe, text: &str) -> Result<(), String> {
    if probe.endpoint == "chat" {
        if !text.contains("data: [DONE]") {
            return Err("stream missing [DONE] terminator".to_owned());
        }
    } else if !text.contains("message_stop") {
        return Err("stream missing message_stop".to_owned());
    }
    Ok(())
}
