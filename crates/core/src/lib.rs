//! # Fermata Core
//!
//! Domain types, traits, and error definitions for the fermata agent
//! engine. This crate has no transport or runtime coupling; it defines the
//! model that the provider and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! The provider and every tool sit behind traits defined here, so the
//! orchestration engine can be driven end to end by test doubles. All
//! crates depend inward on core.

pub mod cancel;
pub mod error;
pub mod event;
pub mod history;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use cancel::CancelToken;
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{ProgressBus, ProgressEvent, ProgressKind};
pub use history::ConversationHistory;
pub use message::{Block, Message, MessageContent, Role};
pub use provider::{
    BlockDelta, BlockStart, CompletedTurn, Provider, ProviderRequest, StopReason, StreamEvent,
    TokenUsage,
};
pub use tool::{Tool, ToolCall, ToolDefinition, ToolOutput, ToolRegistry};
