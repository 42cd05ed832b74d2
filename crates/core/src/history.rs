//! Bounded conversation history with referential-integrity validation.
//!
//! The history is the only state shared across queries. It is mutated by the
//! controller alone, and only between queries: after a query fully resolves
//! the completed turn is reconciled in, the window is truncated, and any
//! tool_result block whose tool_use fell out of the window is stripped.

use tracing::debug;

use crate::message::{Block, Message, MessageContent, Role};

/// Default retained-message cap: 10 user/assistant exchanges.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// An ordered, bounded message log for one session.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<Message>,
    limit: usize,
}

impl ConversationHistory {
    /// An empty history with the default 20-message window.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// An empty history with a custom window size.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            messages: Vec::new(),
            limit,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Appends a completed turn's messages, then truncates and re-validates.
    ///
    /// `turn_messages` is the full transcript of one resolved query in
    /// order: the user query, any intermediate assistant/tool_result pairs,
    /// and the final assistant answer.
    pub fn reconcile(&mut self, turn_messages: Vec<Message>) {
        self.messages.extend(turn_messages);
        self.truncate_and_validate();
    }

    /// Appends the synthetic error exchange used to keep conversational
    /// continuity after an unrecoverable provider failure.
    pub fn record_failure(&mut self, query: &str, error_message: &str) {
        self.messages.push(Message::user(query));
        self.messages.push(Message::assistant(format!(
            "I encountered an error: {error_message}"
        )));
        self.truncate_and_validate();
    }

    /// Drops oldest messages past the window, then strips tool_result
    /// blocks that no longer reference a retained tool_use. Truncation can
    /// land mid-cycle, so validation is mandatory after every cap.
    fn truncate_and_validate(&mut self) {
        if self.messages.len() > self.limit {
            let excess = self.messages.len() - self.limit;
            self.messages.drain(..excess);
            debug!(dropped = excess, "Truncated conversation history");
        }
        self.strip_orphaned_tool_results();
    }

    /// Removes tool_result blocks whose tool_use id is not introduced by an
    /// earlier retained assistant message. A user message stripped to zero
    /// blocks is dropped whole rather than left dangling.
    fn strip_orphaned_tool_results(&mut self) {
        let mut seen_tool_use_ids: Vec<String> = Vec::new();
        let mut validated: Vec<Message> = Vec::with_capacity(self.messages.len());

        for message in self.messages.drain(..) {
            match (&message.role, &message.content) {
                (Role::Assistant, MessageContent::Blocks(_)) => {
                    seen_tool_use_ids
                        .extend(message.tool_use_ids().iter().map(|id| id.to_string()));
                    validated.push(message);
                }
                (Role::User, MessageContent::Blocks(blocks)) => {
                    let kept: Vec<Block> = blocks
                        .iter()
                        .filter(|block| match block {
                            Block::ToolResult { tool_use_id, .. } => {
                                let known = seen_tool_use_ids.iter().any(|id| id == tool_use_id);
                                if !known {
                                    debug!(%tool_use_id, "Dropping orphaned tool_result block");
                                }
                                known
                            }
                            _ => true,
                        })
                        .cloned()
                        .collect();

                    if !kept.is_empty() {
                        validated.push(Message {
                            role: Role::User,
                            content: MessageContent::Blocks(kept),
                        });
                    }
                }
                _ => validated.push(message),
            }
        }

        self.messages = validated;
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}
