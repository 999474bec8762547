//! Anthropic Messages API client.
//!
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE with `content_block_delta` events
//! - Cache-read token counts surfaced in usage metadata

use async_trait::async_trait;
use futures::StreamExt;
use quill_core::error::ProviderError;
use quill_core::message::{Message, Role};
use quill_core::provider::{ChatProvider, ChatRequest, StreamEvent, ToolDefinition, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Streaming Messages API client.
pub struct AnthropicClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    /// Create a new client.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Extract system messages from the message list.
    /// Anthropic puts the system prompt as a top-level field, not in messages.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to API format with content blocks.
    fn to_api_messages(messages: &[&Message]) -> Vec<ApiMessage> {
        let mut result = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => {
                    result.push(ApiMessage {
                        role: "user".into(),
                        content: ApiContent::Text(msg.content.clone()),
                    });
                }
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        result.push(ApiMessage {
                            role: "assistant".into(),
                            content: ApiContent::Text(msg.content.clone()),
                        });
                    } else {
                        let mut blocks: Vec<ContentBlock> = Vec::new();
                        if !msg.content.is_empty() {
                            blocks.push(ContentBlock::Text {
                                text: msg.content.clone(),
                            });
                        }
                        for tc in &msg.tool_calls {
                            let input: Value =
                                serde_json::from_str(&tc.arguments).unwrap_or_default();
                            blocks.push(ContentBlock::ToolUse {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                input,
                            });
                        }
                        result.push(ApiMessage {
                            role: "assistant".into(),
                            content: ApiContent::Blocks(blocks),
                        });
                    }
                }
                Role::Tool => {
                    let tool_call_id = msg.tool_call_id.clone().unwrap_or_default();
                    result.push(ApiMessage {
                        role: "user".into(),
                        content: ApiContent::Blocks(vec![ContentBlock::ToolResult {
                            tool_use_id: tool_call_id,
                            content: msg.content.clone(),
                        }]),
                    });
                }
                Role::System => {} // handled separately
            }
        }

        result
    }

    /// Convert tool definitions to API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiTool> {
        tools
            .iter()
            .map(|t| ApiTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn build_body(request: &ChatRequest) -> Value {
        let (system, messages) = Self::extract_system(&request.messages);
        let api_messages = Self::to_api_messages(&messages);
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": api_messages,
            "max_tokens": max_tokens,
            "temperature": request.temperature,
            "stream": true,
        });

        if let Some(ref sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }
}

/// Map a non-200 HTTP response to a provider error.
///
/// Quota exhaustion is checked before rate limiting: a 429 whose body names
/// an exhausted quota is a permanent condition, not a transient limit.
fn classify_status(status: u16, body: String) -> ProviderError {
    let lower = body.to_lowercase();
    let quota = status == 402
        || lower.contains("quota")
        || lower.contains("credit balance")
        || lower.contains("insufficient_quota");

    if quota {
        ProviderError::QuotaExhausted { message: body }
    } else if status == 429 {
        ProviderError::RateLimited { message: body }
    } else if status == 401 || status == 403 {
        ProviderError::Auth("Invalid API key".into())
    } else {
        ProviderError::Api {
            status,
            message: body,
        }
    }
}

/// Incremental SSE state for one streamed response.
///
/// Fed one `data:` payload at a time; yields the stream events each payload
/// produces. Kept free of I/O so the event mapping is testable from string
/// fixtures.
struct SseAccumulator {
    model: String,
    usage: Usage,
    current_tool: Option<ToolInProgress>,
    finished: bool,
}

struct ToolInProgress {
    id: String,
    name: String,
    args_json: String,
}

impl SseAccumulator {
    fn new(request_model: &str) -> Self {
        Self {
            model: request_model.to_string(),
            usage: Usage::default(),
            current_tool: None,
            finished: false,
        }
    }

    /// Process one SSE `data:` payload.
    fn push_data(&mut self, data: &str) -> Result<Vec<StreamEvent>, ProviderError> {
        let event: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data, "Ignoring unparseable SSE payload");
                return Ok(Vec::new());
            }
        };

        let mut out = Vec::new();

        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                let message = &event["message"];
                if let Some(model) = message["model"].as_str() {
                    self.model = model.to_string();
                }
                let usage = &message["usage"];
                self.usage.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
                self.usage.cached_tokens =
                    usage["cache_read_input_tokens"].as_u64().unwrap_or(0) as u32;
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    // Finalize a previous tool block if the stop event was lost
                    if let Some(tool) = self.current_tool.take() {
                        out.push(tool.into_event());
                    }
                    self.current_tool = Some(ToolInProgress {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        args_json: String::new(),
                    });
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta["text"].as_str() {
                            out.push(StreamEvent::Text {
                                delta: text.to_string(),
                            });
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta["partial_json"].as_str() {
                            if let Some(tool) = self.current_tool.as_mut() {
                                tool.args_json.push_str(partial);
                            }
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                if let Some(tool) = self.current_tool.take() {
                    out.push(tool.into_event());
                }
            }
            "message_delta" => {
                if let Some(output) = event["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = output as u32;
                }
            }
            "message_stop" => {
                out.extend(self.finish());
            }
            "error" => {
                let error = &event["error"];
                let kind = error["type"].as_str().unwrap_or("");
                let message = error["message"].as_str().unwrap_or("stream error").to_string();
                return Err(if kind.contains("overloaded") || kind.contains("rate_limit") {
                    ProviderError::RateLimited { message }
                } else if message.to_lowercase().contains("quota")
                    || message.to_lowercase().contains("credit balance")
                {
                    ProviderError::QuotaExhausted { message }
                } else {
                    ProviderError::StreamInterrupted(message)
                });
            }
            _ => {}
        }

        Ok(out)
    }

    /// Emit the trailing usage/done events exactly once.
    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut out = Vec::new();
        if let Some(tool) = self.current_tool.take() {
            out.push(tool.into_event());
        }
        out.push(StreamEvent::UsageMetadata {
            usage: self.usage,
            model: self.model.clone(),
        });
        out.push(StreamEvent::Done);
        out
    }
}

impl ToolInProgress {
    fn into_event(self) -> StreamEvent {
        let arguments: Value = if self.args_json.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&self.args_json).unwrap_or_else(|e| {
                warn!(tool = %self.name, error = %e, "Tool arguments were not valid JSON");
                serde_json::json!({})
            })
        };
        StreamEvent::ToolCallRequest {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamEvent, ProviderError>>, ProviderError>
    {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_body(&request);

        debug!(model = %request.model, messages = request.messages.len(), "Streaming request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "API error");
            return Err(classify_status(status, error_body));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let model = request.model.clone();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut acc = SseAccumulator::new(&model);

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }

                    match acc.push_data(data) {
                        Ok(events) => {
                            let was_finished = acc.finished;
                            for event in events {
                                if tx.send(Ok(event)).await.is_err() {
                                    return;
                                }
                            }
                            if was_finished {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            // Stream ended without message_stop — flush what we have.
            for event in acc.finish() {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

// --- API wire types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: ApiContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: Value,
}
