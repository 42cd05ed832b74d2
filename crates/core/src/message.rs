//! Message and content-block domain types.
//!
//! These are the value objects the whole engine is built on: the user sends
//! a message, the provider answers with a turn of content blocks, tool
//! results go back as blocks inside a user message. The serde shapes mirror
//! the provider wire format directly so the same types travel from the
//! history to the HTTP body without a conversion layer.

use serde::{Deserialize, Serialize};

/// The role of a message in a conversation.
///
/// The provider protocol only knows `user` and `assistant`; system
/// instructions travel as a top-level request field, not as a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (also carries tool results back to the provider)
    User,
    /// The model
    Assistant,
}

/// One content block inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// Plain text.
    Text { text: String },

    /// Provider-emitted chain-of-thought. Opaque to the engine except that
    /// it must be echoed back verbatim, signature included, ahead of any
    /// tool_use blocks from the same turn.
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// A tool invocation requested by the model.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// The result of a tool invocation, sent back in a user-role message.
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// Message content: either a bare string or a sequence of blocks.
///
/// The untagged representation matches the wire protocol, which accepts
/// both `"content": "hi"` and `"content": [{"type": "text", ...}]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<Block>),
}

impl MessageContent {
    /// The concatenated plain text of this content.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    Block::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Whether this content holds no text and no blocks.
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(s) => s.is_empty(),
            MessageContent::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    /// A plain-text user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// A plain-text assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
        }
    }

    /// An assistant message carrying content blocks (thinking, tool_use).
    pub fn assistant_blocks(blocks: Vec<Block>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// A user message carrying tool_result blocks.
    pub fn tool_results(blocks: Vec<Block>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// The tool_use ids this message introduces (assistant messages only).
    pub fn tool_use_ids(&self) -> Vec<&str> {
        match (&self.role, &self.content) {
            (Role::Assistant, MessageContent::Blocks(blocks)) => blocks
                .iter()
                .filter_map(|b| match b {
                    Block::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
