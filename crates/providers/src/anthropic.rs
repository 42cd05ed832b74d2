//! Anthropic native provider implementation.
//!
//! Uses the Messages API directly:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE, decoded into `StreamEvent` values
//! - Extended thinking pass-through (content and signature stay opaque)

use async_trait::async_trait;
use fermata_config::AppConfig;
use fermata_core::error::ProviderError;
use fermata_core::message::Block;
use fermata_core::provider::{
    BlockDelta, BlockStart, CompletedTurn, Provider, ProviderRequest, StopReason, StreamEvent,
    TokenUsage,
};
use serde::Deserialize;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    /// Extended-thinking budget in tokens; None = thinking disabled.
    thinking_budget: Option<u32>,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300)) // thinking turns can be slow
            .build()
            .unwrap_or_default();

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
            thinking_budget: None,
        }
    }

    /// Build a provider from the application config.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ProviderError::NotConfigured("No API key; set ANTHROPIC_API_KEY".into())
        })?;

        let mut provider = Self::new(api_key);
        if let Some(base_url) = &config.base_url {
            provider = provider.with_base_url(base_url);
        }
        if let Some(budget) = config.thinking_budget {
            provider = provider.with_extended_thinking(budget);
        }
        Ok(provider)
    }

    /// Use a custom base URL (testing, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Enable extended thinking with the given token budget.
    pub fn with_extended_thinking(mut self, budget_tokens: u32) -> Self {
        self.thinking_budget = Some(budget_tokens);
        self
    }

    /// Build the request body. The domain `Message`/`Block` types serialize
    /// to the wire shape directly, so no conversion layer is needed.
    fn build_body(&self, request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }
        if let Some(system) = &request.system {
            body["system"] = serde_json::json!(system);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(request.tools);
        }
        if let Some(budget) = self.thinking_budget {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": budget,
            });
        }

        body
    }

    async fn post(
        &self,
        body: &serde_json::Value,
        sse: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if sse {
            req = req.header("Accept", "text/event-stream");
        }

        let response = req
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<
        tokio::sync::mpsc::Receiver<Result<StreamEvent, ProviderError>>,
        ProviderError,
    > {
        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");

        let body = self.build_body(&request, true);
        let response = self.post(&body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            use futures::StreamExt;

            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

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

                    if line.is_empty() || line.starts_with(':') || line.starts_with("event: ") {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }

                    let sse: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    for event in decode_sse_event(&sse) {
                        if tx.send(Ok(event)).await.is_err() {
                            return; // consumer dropped the stream
                        }
                    }

                    if sse["type"].as_str() == Some("message_stop") {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn complete(&self, request: ProviderRequest) -> Result<CompletedTurn, ProviderError> {
        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let body = self.build_body(&request, false);
        let response = self.post(&body, false).await?;

        let api_resp: AnthropicResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Anthropic response: {e}"),
            })?;

        Ok(response_to_turn(api_resp))
    }
}

/// Translate one parsed SSE payload into zero or more stream events.
fn decode_sse_event(sse: &serde_json::Value) -> Vec<StreamEvent> {
    match sse["type"].as_str().unwrap_or("") {
        "message_start" => {
            let input_tokens =
                sse["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
            vec![StreamEvent::TurnStart { input_tokens }]
        }
        "content_block_start" => {
            let index = sse["index"].as_u64().unwrap_or(0) as usize;
            let block = &sse["content_block"];
            let start = match block["type"].as_str().unwrap_or("") {
                "text" => BlockStart::Text,
                "thinking" => BlockStart::Thinking,
                "tool_use" => BlockStart::ToolUse {
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                },
                other => {
                    trace!(kind = other, "Ignoring unknown content block kind");
                    return Vec::new();
                }
            };
            vec![StreamEvent::BlockStart { index, start }]
        }
        "content_block_delta" => {
            let index = sse["index"].as_u64().unwrap_or(0) as usize;
            let delta = &sse["delta"];
            let decoded = match delta["type"].as_str().unwrap_or("") {
                "text_delta" => delta["text"].as_str().map(|s| BlockDelta::Text {
                    value: s.to_string(),
                }),
                "thinking_delta" => delta["thinking"].as_str().map(|s| BlockDelta::Thinking {
                    value: s.to_string(),
                }),
                "input_json_delta" => {
                    delta["partial_json"].as_str().map(|s| BlockDelta::ToolInput {
                        value: s.to_string(),
                    })
                }
                "signature_delta" => delta["signature"].as_str().map(|s| BlockDelta::Signature {
                    value: s.to_string(),
                }),
                _ => None,
            };
            decoded
                .map(|delta| vec![StreamEvent::BlockDelta { index, delta }])
                .unwrap_or_default()
        }
        "content_block_stop" => {
            let index = sse["index"].as_u64().unwrap_or(0) as usize;
            vec![StreamEvent::BlockStop { index }]
        }
        "message_delta" => {
            let output = sse["usage"]["output_tokens"].as_u64();
            output
                .map(|o| {
                    vec![StreamEvent::TurnDelta {
                        output_tokens: o as u32,
                    }]
                })
                .unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

/// Map a complete API response onto the domain turn type.
fn response_to_turn(resp: AnthropicResponse) -> CompletedTurn {
    let blocks = resp
        .content
        .into_iter()
        .map(|block| match block {
            ResponseContentBlock::Text { text } => Block::Text { text },
            ResponseContentBlock::Thinking {
                thinking,
                signature,
            } => Block::Thinking {
                thinking,
                signature,
            },
            ResponseContentBlock::ToolUse { id, name, input } => {
                Block::ToolUse { id, name, input }
            }
        })
        .collect();

    let stop_reason = match resp.stop_reason.as_deref() {
        Some("tool_use") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };

    CompletedTurn {
        blocks,
        stop_reason,
        usage: Some(TokenUsage::new(
            resp.usage.input_tokens,
            resp.usage.output_tokens,
        )),
    }
}

// --- Anthropic API response types ---

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fermata_core::message::Message;
    use fermata_core::tool::ToolDefinition;

    #[test]
    fn constructor() {
        let provider = AnthropicProvider::new("sk-ant-test");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
        assert!(provider.thinking_budget.is_none());
    }

    #[test]
    fn constructor_with_base_url() {
        let provider =
            AnthropicProvider::new("sk-ant-test").with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn from_config_requires_api_key() {
        let config = AppConfig::default();
        assert!(AnthropicProvider::from_config(&config).is_err());

        let config = AppConfig {
            api_key: Some("sk-ant-test".into()),
            ..AppConfig::default()
        };
        assert!(AnthropicProvider::from_config(&config).is_ok());
    }

    #[test]
    fn body_carries_system_and_tools() {
        let provider = AnthropicProvider::new("sk-ant-test");
        let request = ProviderRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![Message::user("hi")],
            system: Some("Be terse.".into()),
            max_tokens: 2048,
            tools: vec![ToolDefinition {
                name: "read_file".into(),
                description: "Read a file".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"]
                }),
            }],
        };

        let body = provider.build_body(&request, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["system"], "Be terse.");
        assert_eq!(body["tools"][0]["name"], "read_file");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn body_enables_thinking_when_budgeted() {
        let provider = AnthropicProvider::new("sk-ant-test").with_extended_thinking(8000);
        let request = ProviderRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![Message::user("hi")],
            system: None,
            max_tokens: 2048,
            tools: vec![],
        };

        let body = provider.build_body(&request, false);
        assert_eq!(body["thinking"]["budget_tokens"], 8000);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn decode_message_start() {
        let sse = serde_json::json!({
            "type": "message_start",
            "message": { "usage": { "input_tokens": 42 } }
        });
        let events = decode_sse_event(&sse);
        assert!(matches!(
            events[..],
            [StreamEvent::TurnStart { input_tokens: 42 }]
        ));
    }

    #[test]
    fn decode_tool_use_block_start() {
        let sse = serde_json::json!({
            "type": "content_block_start",
            "index": 1,
            "content_block": { "type": "tool_use", "id": "toolu_1", "name": "read_file" }
        });
        let events = decode_sse_event(&sse);
        match &events[..] {
            [StreamEvent::BlockStart {
                index: 1,
                start: BlockStart::ToolUse { id, name },
            }] => {
                assert_eq!(id, "toolu_1");
                assert_eq!(name, "read_file");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn decode_deltas() {
        let text = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": "Hello" }
        });
        assert!(matches!(
            decode_sse_event(&text)[..],
            [StreamEvent::BlockDelta {
                delta: BlockDelta::Text { .. },
                ..
            }]
        ));

        let input = serde_json::json!({
            "type": "content_block_delta",
            "index": 2,
            "delta": { "type": "input_json_delta", "partial_json": "{\"pa" }
        });
        assert!(matches!(
            decode_sse_event(&input)[..],
            [StreamEvent::BlockDelta {
                index: 2,
                delta: BlockDelta::ToolInput { .. },
            }]
        ));

        let signature = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "signature_delta", "signature": "sig" }
        });
        assert!(matches!(
            decode_sse_event(&signature)[..],
            [StreamEvent::BlockDelta {
                delta: BlockDelta::Signature { .. },
                ..
            }]
        ));
    }

    #[test]
    fn decode_message_delta_usage() {
        let sse = serde_json::json!({
            "type": "message_delta",
            "usage": { "output_tokens": 17 }
        });
        assert!(matches!(
            decode_sse_event(&sse)[..],
            [StreamEvent::TurnDelta { output_tokens: 17 }]
        ));
    }

    #[test]
    fn unknown_sse_types_are_skipped() {
        let sse = serde_json::json!({ "type": "ping" });
        assert!(decode_sse_event(&sse).is_empty());
    }

    #[test]
    fn parse_text_response() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "content": [{"type": "text", "text": "Hello!"}],
                "usage": {"input_tokens": 10, "output_tokens": 5},
                "stop_reason": "end_turn"
            }"#,
        )
        .unwrap();

        let turn = response_to_turn(resp);
        assert_eq!(turn.stop_reason, StopReason::EndTurn);
        assert_eq!(turn.blocks, vec![Block::Text { text: "Hello!".into() }]);
        assert_eq!(turn.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn parse_tool_use_response() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "content": [
                    {"type": "thinking", "thinking": "I should look", "signature": "sig_1"},
                    {"type": "tool_use", "id": "toolu_abc", "name": "list_files", "input": {"path": "."}}
                ],
                "usage": {"input_tokens": 20, "output_tokens": 10},
                "stop_reason": "tool_use"
            }"#,
        )
        .unwrap();

        let turn = response_to_turn(resp);
        assert_eq!(turn.stop_reason, StopReason::ToolUse);
        assert_eq!(turn.blocks.len(), 2);
        match &turn.blocks[0] {
            Block::Thinking {
                thinking,
                signature,
            } => {
                assert_eq!(thinking, "I should look");
                assert_eq!(signature.as_deref(), Some("sig_1"));
            }
            other => panic!("expected thinking block, got {other:?}"),
        }
    }
}
