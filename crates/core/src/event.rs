//! Progress events — the typed channel between the engine and any
//! presentation layer.
//!
//! Events are ephemeral: emitted, observed, discarded. The bus replaces the
//! stack of optional callbacks a layered design would otherwise thread
//! through every call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::provider::TokenUsage;

/// The kind of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// The query was accepted; also re-used for streamed thinking snapshots
    Thinking,
    /// The provider request is being prepared
    Analyzing,
    /// A tool execution is starting
    ExecutingTools,
    /// A tool execution finished successfully
    ToolExecutionComplete,
    /// A tool execution returned an error result
    ToolExecutionError,
    /// The final answer is being produced
    Generating,
    /// Token usage changed
    TokenUpdate,
    /// Accumulated thinking content is final for this turn
    ThinkingComplete,
    /// The query resolved; the answer rides in `data`
    Complete,
    /// The query failed
    Error,
    /// The query was cancelled
    Aborted,
}

/// One progress notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            data: None,
            token_usage: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }
}

/// A broadcast-based bus for progress events.
///
/// Multi-consumer pub/sub over `tokio::sync::broadcast`; publishing with no
/// subscribers is fine and the event is simply dropped.
pub struct ProgressBus {
    sender: broadcast::Sender<Arc<ProgressEvent>>,
}

impl ProgressBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ProgressEvent>> {
        self.sender.subscribe()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(256)
    }
}
