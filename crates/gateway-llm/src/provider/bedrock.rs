//! AWS Bedrock adapter using the Converse API
//!
//! Credentials come from the credential record (`apiKey` = access key id,
//! `projectId` = secret access key, `refresh` = region) with `AWS_REGION` as
//! the region fallback; absent explicit keys, the default AWS chain applies.

use async_trait::async_trait;
use aws_sdk_bedrockruntime::Client as BedrockClient;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ContentBlockDelta, ContentBlockStart, ConversationRole, ConverseOutput, ConverseStreamOutput,
    InferenceConfiguration, Message as BedrockMessage, StopReason, SystemContentBlock, Tool, ToolConfiguration,
    ToolInputSchema, ToolResultBlock, ToolResultContentBlock, ToolSpecification, ToolUseBlock,
};
use tokio_stream::wrappers::ReceiverStream;

use super::{LanguageModel, finalize_stream};
use crate::error::GatewayError;
use crate::types::{
    EventStream, FinishReason, GenerationRequest, GenerationResult, Message, Part, Role, StreamEvent, ToolInvocation,
    Usage,
};

/// Region used when neither the record nor `AWS_REGION` names one
const DEFAULT_REGION: &str = "us-east-1";

/// Bedrock adapter
pub struct BedrockModel {
    provider_id: String,
    client: BedrockClient,
}

/// Explicit credentials pulled from the credential record
pub struct BedrockCredentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: Option<String>,
}

impl BedrockModel {
    pub async fn new(provider_id: impl Into<String>, credentials: BedrockCredentials) -> Self {
        let region = credentials
            .region
            .or_else(|| std::env::var("AWS_REGION").ok())
            .unwrap_or_else(|| DEFAULT_REGION.to_owned());

        let mut config_builder =
            aws_config::defaults(aws_config::BehaviorVersion::latest()).region(aws_config::Region::new(region));

        if let (Some(access_key), Some(secret_key)) = (credentials.access_key_id, credentials.secret_access_key) {
            let creds = aws_credential_types::Credentials::new(access_key, secret_key, None, None, "ai-gateway");
            config_builder = config_builder.credentials_provider(creds);
        }

        let config = config_builder.load().await;

        Self {
            provider_id: provider_id.into(),
            client: BedrockClient::new(&config),
        }
    }

    fn build_converse_input(
        request: &GenerationRequest,
    ) -> Result<(Vec<SystemContentBlock>, Vec<BedrockMessage>), GatewayError> {
        let mut system_blocks = Vec::new();
        if let Some(system) = request.system_text() {
            system_blocks.push(SystemContentBlock::Text(system));
        }

        let mut messages = Vec::new();
        for msg in request.conversation() {
            match msg.role {
                Role::Tool => {
                    for part in &msg.parts {
                        if let Part::ToolResult { id, content } = part {
                            let result = ToolResultBlock::builder()
                                .tool_use_id(id)
                                .content(ToolResultContentBlock::Text(content.clone()))
                                .build()
                                .map_err(|e| GatewayError::BadRequest(format!("invalid tool result: {e}")))?;

                            if let Ok(bedrock_msg) = BedrockMessage::builder()
                                .role(ConversationRole::User)
                                .content(ContentBlock::ToolResult(result))
                                .build()
                            {
                                messages.push(bedrock_msg);
                            }
                        }
                    }
                }
                role => {
                    let conversation_role = if role == Role::Assistant {
                        ConversationRole::Assistant
                    } else {
                        ConversationRole::User
                    };
                    if let Ok(bedrock_msg) = BedrockMessage::builder()
                        .role(conversation_role)
                        .set_content(Some(content_blocks(msg)))
                        .build()
                    {
                        messages.push(bedrock_msg);
                    }
                }
            }
        }

        Ok((system_blocks, messages))
    }

    fn tool_config(request: &GenerationRequest) -> Option<ToolConfiguration> {
        let tools = request.tools.as_ref()?;

        let specs: Vec<Tool> = tools
            .iter()
            .filter_map(|t| {
                let schema = ToolInputSchema::Json(value_to_document(&t.parameters));
                let mut builder = ToolSpecification::builder().name(&t.name).input_schema(schema);
                if let Some(description) = &t.description {
                    builder = builder.description(description);
                }
                Some(Tool::ToolSpec(builder.build().ok()?))
            })
            .collect();

        if specs.is_empty() {
            return None;
        }

        let mut config = ToolConfiguration::builder();
        for tool in specs {
            config = config.tools(tool);
        }
        config.build().ok()
    }

    fn inference_config(request: &GenerationRequest) -> InferenceConfiguration {
        let mut config = InferenceConfiguration::builder();
        if let Some(temperature) = request.temperature {
            #[allow(clippy::cast_possible_truncation)]
            {
                config = config.temperature(temperature as f32);
            }
        }
        if let Some(top_p) = request.top_p {
            #[allow(clippy::cast_possible_truncation)]
            {
                config = config.top_p(top_p as f32);
            }
        }
        if let Some(max_tokens) = request.max_tokens {
            #[allow(clippy::cast_possible_wrap)]
            {
                config = config.max_tokens(max_tokens as i32);
            }
        }
        config.build()
    }
}

#[async_trait]
impl LanguageModel for BedrockModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, GatewayError> {
        let (system_blocks, messages) = Self::build_converse_input(request)?;

        let mut converse = self.client.converse().model_id(&request.model);
        for block in system_blocks {
            converse = converse.system(block);
        }
        for msg in messages {
            converse = converse.messages(msg);
        }
        converse = converse.inference_config(Self::inference_config(request));
        if let Some(tool_config) = Self::tool_config(request) {
            converse = converse.tool_config(tool_config);
        }

        let output = converse.send().await.map_err(|e| {
            tracing::warn!(provider = %self.provider_id, error = %e, "bedrock converse failed");
            GatewayError::UpstreamUnreachable(e.to_string())
        })?;

        let finish = match output.stop_reason() {
            StopReason::MaxTokens => FinishReason::Length,
            StopReason::ToolUse => FinishReason::ToolCalls,
            StopReason::EndTurn | StopReason::StopSequence => FinishReason::Stop,
            _ => FinishReason::Other,
        };

        let (text, tool_calls) = match output.output() {
            Some(ConverseOutput::Message(msg)) => extract_response(msg),
            _ => (String::new(), Vec::new()),
        };

        #[allow(clippy::cast_sign_loss)]
        let usage = output.usage().map_or_else(Usage::default, |u| Usage {
            prompt_tokens: u.input_tokens() as u32,
            completion_tokens: u.output_tokens() as u32,
        });

        Ok(GenerationResult {
            text,
            tool_calls,
            finish,
            usage,
        })
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, GatewayError> {
        let (system_blocks, messages) = Self::build_converse_input(request)?;

        let mut converse = self.client.converse_stream().model_id(&request.model);
        for block in system_blocks {
            converse = converse.system(block);
        }
        for msg in messages {
            converse = converse.messages(msg);
        }
        converse = converse.inference_config(Self::inference_config(request));
        if let Some(tool_config) = Self::tool_config(request) {
            converse = converse.tool_config(tool_config);
        }

        let output = converse.send().await.map_err(|e| {
            tracing::warn!(provider = %self.provider_id, error = %e, "bedrock converse_stream failed");
            GatewayError::UpstreamUnreachable(e.to_string())
        })?;

        let (tx, rx) = tokio::sync::mpsc::channel::<StreamEvent>(32);

        tokio::spawn(async move {
            let mut receiver = output.stream;
            let mut pending_tool: Option<(String, String, String)> = None;
            let mut finish: Option<FinishReason> = None;
            let mut usage = Usage::default();

            loop {
                match receiver.recv().await {
                    Ok(Some(event)) => match event {
                        ConverseStreamOutput::ContentBlockStart(start) => {
                            if let Some(ContentBlockStart::ToolUse(tool)) = start.start() {
                                pending_tool =
                                    Some((tool.tool_use_id().to_owned(), tool.name().to_owned(), String::new()));
                            }
                        }
                        ConverseStreamOutput::ContentBlockDelta(delta) => match delta.delta() {
                            Some(ContentBlockDelta::Text(text)) => {
                                let event = StreamEvent::TextDelta { delta: text.clone() };
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                            Some(ContentBlockDelta::ToolUse(tool)) => {
                                if let Some((_, _, args)) = &mut pending_tool {
                                    args.push_str(tool.input());
                                }
                            }
                            _ => {}
                        },
                        ConverseStreamOutput::ContentBlockStop(_) => {
                            if let Some((id, name, args)) = pending_tool.take() {
                                let event = StreamEvent::ToolCall {
                                    id,
                                    name,
                                    arguments: if args.is_empty() { "{}".to_owned() } else { args },
                                };
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                        ConverseStreamOutput::MessageStop(stop) => {
                            finish = Some(match stop.stop_reason() {
                                StopReason::MaxTokens => FinishReason::Length,
                                StopReason::ToolUse => FinishReason::ToolCalls,
                                StopReason::EndTurn | StopReason::StopSequence => FinishReason::Stop,
                                _ => FinishReason::Other,
                            });
                        }
                        ConverseStreamOutput::Metadata(meta) => {
                            #[allow(clippy::cast_sign_loss)]
                            if let Some(u) = meta.usage() {
                                usage = Usage {
                                    prompt_tokens: u.input_tokens() as u32,
                                    completion_tokens: u.output_tokens() as u32,
                                };
                            }
                        }
                        _ => {}
                    },
                    Ok(None) => {
                        let _ = tx
                            .send(StreamEvent::Finish {
                                reason: finish.unwrap_or(FinishReason::Stop),
                                usage,
                            })
                            .await;
                        return;
                    }
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                        return;
                    }
                }
            }
        });

        Ok(finalize_stream(ReceiverStream::new(rx)))
    }
}

fn content_blocks(msg: &Message) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    for part in &msg.parts {
        match part {
            Part::Text { text } => {
                if !text.is_empty() {
                    blocks.push(ContentBlock::Text(text.clone()));
                }
            }
            Part::ToolCall { id, name, arguments } => {
                let input = serde_json::from_str::<serde_json::Value>(arguments)
                    .unwrap_or_else(|_| serde_json::json!({}));
                if let Ok(tool_use) = ToolUseBlock::builder()
                    .tool_use_id(id)
                    .name(name)
                    .input(value_to_document(&input))
                    .build()
                {
                    blocks.push(ContentBlock::ToolUse(tool_use));
                }
            }
            // Image parts are dropped; text-first providers only on Bedrock
            Part::Image { .. } | Part::ToolResult { .. } => {}
        }
    }

    if blocks.is_empty() {
        blocks.push(ContentBlock::Text(String::new()));
    }

    blocks
}

fn extract_response(msg: &BedrockMessage) -> (String, Vec<ToolInvocation>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in msg.content() {
        match block {
            ContentBlock::Text(t) => text.push_str(t),
            ContentBlock::ToolUse(tool) => {
                let arguments =
                    serde_json::to_string(&document_to_value(tool.input())).unwrap_or_else(|_| "{}".to_owned());
                tool_calls.push(ToolInvocation {
                    id: tool.tool_use_id().to_owned(),
                    name: tool.name().to_owned(),
                    arguments,
                });
            }
            _ => {}
        }
    }

    (text, tool_calls)
}

/// Convert a `serde_json::Value` to an AWS `Document`
fn value_to_document(value: &serde_json::Value) -> aws_smithy_types::Document {
    match value {
        serde_json::Value::Null => aws_smithy_types::Document::Null,
        serde_json::Value::Bool(b) => aws_smithy_types::Document::Bool(*b),
        serde_json::Value::Number(n) => {
            #[allow(clippy::cast_precision_loss)]
            n.as_i64().map_or_else(
                || {
                    n.as_f64().map_or(aws_smithy_types::Document::Null, |f| {
                        aws_smithy_types::Document::Number(aws_smithy_types::Number::Float(f))
                    })
                },
                |i| aws_smithy_types::Document::Number(aws_smithy_types::Number::Float(i as f64)),
            )
        }
        serde_json::Value::String(s) => aws_smithy_types::Document::String(s.clone()),
        serde_json::Value::Array(items) => {
            aws_smithy_types::Document::Array(items.iter().map(value_to_document).collect())
        }
        serde_json::Value::Object(map) => aws_smithy_types::Document::Object(
            map.iter().map(|(k, v)| (k.clone(), value_to_document(v))).collect(),
        ),
    }
}

/// Convert an AWS `Document` back to a `serde_json::Value`
fn document_to_value(doc: &aws_smithy_types::Document) -> serde_json::Value {
    match doc {
        aws_smithy_types::Document::Null => serde_json::Value::Null,
        aws_smithy_types::Document::Bool(b) => serde_json::Value::Bool(*b),
        aws_smithy_types::Document::Number(n) => serde_json::Number::from_f64(n.to_f64_lossy())
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        aws_smithy_types::Document::String(s) => serde_json::Value::String(s.clone()),
        aws_smithy_types::Document::Array(items) => {
            serde_json::Value::Array(items.iter().map(document_to_value).collect())
        }
        aws_smithy_types::Document::Object(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), document_to_value(v))).collect(),
        ),
    }
}
