//! The agent controller — the single public entry point for queries.
//!
//! One controller owns one conversation. Queries are single-flight: a
//! second `process_query` while one is in flight is rejected immediately
//! rather than queued. The controller owns the busy flag, the cancel token
//! for the in-flight query, and the conversation history; the engine it
//! drives is stateless per query.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fermata_config::AppConfig;
use fermata_core::cancel::CancelToken;
use fermata_core::error::{Error, Result};
use fermata_core::event::{ProgressBus, ProgressEvent, ProgressKind};
use fermata_core::history::ConversationHistory;
use fermata_core::message::Message;
use fermata_core::provider::Provider;
use fermata_core::tool::ToolRegistry;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::engine::{Engine, EngineSettings};

/// Orchestrates queries against one conversation.
pub struct Agent {
    engine: Engine,
    bus: Arc<ProgressBus>,
    busy: AtomicBool,
    active_cancel: Mutex<Option<CancelToken>>,
    history: Mutex<ConversationHistory>,
}

impl Agent {
    /// Build an agent from its collaborators and configuration.
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        config: &AppConfig,
    ) -> Self {
        let bus = Arc::new(ProgressBus::default());
        let settings = EngineSettings {
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            max_tool_cycles: config.max_tool_cycles,
        };

        Self {
            engine: Engine::new(provider, tools, Arc::clone(&bus), settings),
            bus,
            busy: AtomicBool::new(false),
            active_cancel: Mutex::new(None),
            history: Mutex::new(ConversationHistory::with_limit(config.history_limit)),
        }
    }

    /// Subscribe to progress events for all queries on this agent.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ProgressEvent>> {
        self.bus.subscribe()
    }

    /// Whether a query is currently in flight.
    pub fn is_processing(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// A snapshot of the retained conversation.
    pub fn conversation(&self) -> Vec<Message> {
        self.lock_history().messages().to_vec()
    }

    /// Cancel the in-flight query, if any. Returns whether there was one.
    ///
    /// Cancellation is cooperative: the query observes the token at its
    /// next suspension point and unwinds with `Error::Cancelled`.
    pub fn abort(&self) -> bool {
        let guard = match self.active_cancel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(token) => {
                info!("Abort requested for in-flight query");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Process one query through the full tool-use loop.
    ///
    /// Exactly one terminal event is published per accepted query:
    /// `complete`, `error`, or `aborted`. A rejected (busy) query publishes
    /// nothing. The conversation is updated only on success or on provider
    /// failure; cancellation and the cycle ceiling leave it untouched.
    pub async fn process_query(&self, query: &str) -> Result<String> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Query rejected, another is in flight");
            return Err(Error::Busy);
        }

        let cancel = CancelToken::new();
        *self.lock_cancel() = Some(cancel.clone());

        self.bus.publish(ProgressEvent::new(
            ProgressKind::Thinking,
            "Processing your query...",
        ));

        let result = self.run_query(query, &cancel).await;

        *self.lock_cancel() = None;
        self.busy.store(false, Ordering::SeqCst);
        result
    }

    async fn run_query(&self, query: &str, cancel: &CancelToken) -> Result<String> {
        let prior = self.lock_history().messages().to_vec();

        match self.engine.run(&prior, query, cancel).await {
            Ok(outcome) => {
                self.lock_history().reconcile(outcome.transcript);
                self.bus.publish(
                    ProgressEvent::new(ProgressKind::Complete, "Query complete")
                        .with_data(serde_json::json!({ "response": outcome.answer }))
                        .with_usage(outcome.usage),
                );
                Ok(outcome.answer)
            }
            Err(Error::Cancelled) => {
                info!("Query aborted");
                self.bus.publish(ProgressEvent::new(
                    ProgressKind::Aborted,
                    "Operation was cancelled",
                ));
                Err(Error::Cancelled)
            }
            Err(err @ Error::CycleLimitExceeded { .. }) => {
                self.bus
                    .publish(ProgressEvent::new(ProgressKind::Error, err.to_string()));
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "Query failed");
                self.lock_history().record_failure(query, &err.to_string());
                self.bus
                    .publish(ProgressEvent::new(ProgressKind::Error, err.to_string()));
                Err(err)
            }
        }
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, ConversationHistory> {
        match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_cancel(&self) -> std::sync::MutexGuard<'_, Option<CancelToken>> {
        match self.active_cancel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
