//! Provider trait — the abstraction over the remote language model.
//!
//! A provider knows how to submit a conversation and hand back a turn,
//! either as an incremental event stream (used for the first turn of a
//! query) or as one complete response (used for the follow-up calls inside
//! a tool-use cycle). The engine never sees HTTP or SSE; it consumes the
//! event vocabulary defined here, and signature/thinking payloads pass
//! through as opaque blobs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Block, Message};
use crate::tool::ToolDefinition;

/// One request to the provider: full message history, tool schemas, and
/// system instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use
    pub model: String,

    /// The conversation messages, oldest first
    pub messages: Vec<Message>,

    /// System instructions (top-level field, not a message)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// Token usage for one query, updated as the stream progresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// The kind of content block a stream announces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockStart {
    Text,
    Thinking,
    ToolUse { id: String, name: String },
}

/// An incremental payload for an open content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockDelta {
    /// A fragment of plain text
    Text { value: String },
    /// A fragment of thinking content
    Thinking { value: String },
    /// A fragment of the raw JSON arguments for a tool_use block
    ToolInput { value: String },
    /// A fragment of the opaque thinking signature
    Signature { value: String },
}

/// One event in a provider's incremental response stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The turn has started; input token count is known up front.
    TurnStart { input_tokens: u32 },

    /// A content block opened at the given index.
    BlockStart { index: usize, start: BlockStart },

    /// Incremental content for the block at the given index.
    BlockDelta { index: usize, delta: BlockDelta },

    /// The block at the given index is complete.
    BlockStop { index: usize },

    /// Running output-token count.
    TurnDelta { output_tokens: u32 },
}

/// Why a completed turn stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model is done; the turn's text is the answer.
    EndTurn,
    /// The model requests tool execution before continuing.
    ToolUse,
}

/// One complete (non-streamed) turn from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTurn {
    /// The turn's content blocks in provider emission order
    pub blocks: Vec<Block>,

    /// Whether more tool use is requested
    pub stop_reason: StopReason,

    /// Token usage for this round trip
    pub usage: Option<TokenUsage>,
}

/// The narrow streaming-RPC interface any compliant backend implements.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Submit a request and receive the turn as an ordered event stream.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamEvent, ProviderError>>,
        ProviderError,
    >;

    /// Submit a request and receive one complete turn plus its stop reason.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<CompletedTurn, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_event_serialization() {
        let event = StreamEvent::BlockDelta {
            index: 1,
            delta: BlockDelta::ToolInput {
                value: r#"{"path":"#.into(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"block_delta""#));
        assert!(json.contains(r#""kind":"tool_input""#));
    }

    #[test]
    fn token_usage_totals() {
        let usage = TokenUsage::new(120, 45);
        assert_eq!(usage.total_tokens, 165);
    }

    #[test]
    fn stop_reason_serialization() {
        assert_eq!(
            serde_json::to_string(&StopReason::ToolUse).unwrap(),
            r#""tool_use""#
        );
        assert_eq!(
            serde_json::to_string(&StopReason::EndTurn).unwrap(),
            r#""end_turn""#
        );
    }

    #[test]
    fn request_omits_empty_optionals() {
        let request = ProviderRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![Message::user("hi")],
            system: None,
            max_tokens: 2048,
            tools: vec![],
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("system"));
        assert!(!json.contains("tools"));
    }
}
