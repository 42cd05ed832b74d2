//! The tool-cycle engine — one query from first provider call to final
//! answer.
//!
//! A query resolves as a sequence of provider turns. The first turn is
//! streamed so text and thinking surface incrementally; every follow-up
//! inside a tool cycle is a plain completion. A turn that stops for tool
//! use has its tools executed sequentially, the results folded back into
//! the transcript, and the loop continues. Tool failures never abort the
//! query: they become tool_result content for the model to react to. The
//! only faults that escape the loop are cancellation, provider failure,
//! and the cycle ceiling.

use std::sync::Arc;

use fermata_core::cancel::CancelToken;
use fermata_core::error::{Error, Result, ToolError};
use fermata_core::event::{ProgressBus, ProgressEvent, ProgressKind};
use fermata_core::message::{Block, Message};
use fermata_core::provider::{CompletedTurn, Provider, ProviderRequest, StopReason, TokenUsage};
use fermata_core::tool::{ToolCall, ToolOutput, ToolRegistry};
use tracing::{debug, info, warn};

use crate::decoder::StreamDecoder;

/// Static settings for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub model: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    /// Ceiling on tool-use turns per query.
    pub max_tool_cycles: u32,
}

/// What a resolved query hands back to the controller.
#[derive(Debug)]
pub struct QueryOutcome {
    /// The final answer text
    pub answer: String,

    /// The full transcript of this query: the user message, every
    /// intermediate assistant/tool_result pair, and the final answer
    pub transcript: Vec<Message>,

    /// Accumulated token usage across all round trips
    pub usage: TokenUsage,
}

/// Runs the bounded tool-use loop for a single query.
pub struct Engine {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    bus: Arc<ProgressBus>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        bus: Arc<ProgressBus>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            provider,
            tools,
            bus,
            settings,
        }
    }

    /// Resolve one query against the given prior conversation.
    ///
    /// `prior` is read-only context; the returned transcript holds only the
    /// messages this query produced, ready for reconciliation.
    pub async fn run(
        &self,
        prior: &[Message],
        query: &str,
        cancel: &CancelToken,
    ) -> Result<QueryOutcome> {
        let mut transcript: Vec<Message> = vec![Message::user(query)];
        let mut usage = TokenUsage::default();
        let mut pending_thinking = String::new();

        self.bus.publish(ProgressEvent::new(
            ProgressKind::Analyzing,
            "Analyzing your request...",
        ));

        let mut turn = self.first_turn(prior, &transcript, cancel).await?;
        let mut cycles: u32 = 0;

        loop {
            if let Some(turn_usage) = turn.usage {
                usage = TokenUsage::new(
                    usage.input_tokens + turn_usage.input_tokens,
                    usage.output_tokens + turn_usage.output_tokens,
                );
            }
            collect_thinking(&turn.blocks, &mut pending_thinking);

            if turn.stop_reason == StopReason::EndTurn {
                break;
            }

            cycles += 1;
            if cycles > self.settings.max_tool_cycles {
                warn!(
                    limit = self.settings.max_tool_cycles,
                    "Tool cycle ceiling hit, aborting query"
                );
                return Err(Error::CycleLimitExceeded {
                    limit: self.settings.max_tool_cycles,
                });
            }
            debug!(cycle = cycles, "Executing tool-use turn");

            // Echo the assistant turn verbatim: thinking blocks keep their
            // signatures and stay ahead of the tool_use blocks they signed.
            let assistant_blocks: Vec<Block> = turn
                .blocks
                .iter()
                .filter(|block| !matches!(block, Block::Text { text } if text.is_empty()))
                .cloned()
                .collect();
            transcript.push(Message::assistant_blocks(assistant_blocks));

            self.flush_thinking(&mut pending_thinking);
            let results = self.execute_tools(&turn.blocks, cancel).await?;
            transcript.push(Message::tool_results(results));

            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let request = self.build_request(prior, &transcript);
            turn = self.provider.complete(request).await?;
        }

        self.flush_thinking(&mut pending_thinking);
        self.bus.publish(ProgressEvent::new(
            ProgressKind::Generating,
            "Generating response...",
        ));

        let mut answer: String = turn
            .blocks
            .iter()
            .filter_map(|block| match block {
                Block::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if answer.is_empty() {
            answer = "I was unable to generate a response.".into();
        }
        transcript.push(Message::assistant(answer.clone()));

        info!(
            cycles,
            total_tokens = usage.total_tokens,
            "Query resolved"
        );

        Ok(QueryOutcome {
            answer,
            transcript,
            usage,
        })
    }

    fn build_request(&self, prior: &[Message], transcript: &[Message]) -> ProviderRequest {
        let mut messages = Vec::with_capacity(prior.len() + transcript.len());
        messages.extend_from_slice(prior);
        messages.extend_from_slice(transcript);

        ProviderRequest {
            model: self.settings.model.clone(),
            messages,
            system: self.settings.system_prompt.clone(),
            max_tokens: self.settings.max_tokens,
            tools: self.tools.describe_for_provider(),
        }
    }

    async fn first_turn(
        &self,
        prior: &[Message],
        transcript: &[Message],
        cancel: &CancelToken,
    ) -> Result<CompletedTurn> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let request = self.build_request(prior, transcript);
        let rx = self.provider.stream(request).await?;
        StreamDecoder::new(&self.bus, cancel).decode(rx).await
    }

    /// Execute every tool call in a turn, in emission order, producing one
    /// tool_result block per call.
    async fn execute_tools(
        &self,
        blocks: &[Block],
        cancel: &CancelToken,
    ) -> Result<Vec<Block>> {
        let mut results = Vec::new();

        for block in blocks {
            let Block::ToolUse { id, name, input } = block else {
                continue;
            };

            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let call = ToolCall {
                name: name.clone(),
                parameters: input.clone(),
            };
            let signature = format_call(&call.name, &call.parameters);
            self.bus.publish(
                ProgressEvent::new(
                    ProgressKind::ExecutingTools,
                    format!("Executing {signature}"),
                )
                .with_data(serde_json::json!({ "toolName": call.name })),
            );

            let output = self.run_tool(&call, cancel).await?;
            let content = output.content();

            let (kind, message) = if output.is_error() {
                (
                    ProgressKind::ToolExecutionError,
                    format!("Error in {}: {}", call.name, truncate(&content, 200)),
                )
            } else {
                (
                    ProgressKind::ToolExecutionComplete,
                    format!("{} completed: {}", call.name, truncate(&content, 200)),
                )
            };
            self.bus.publish(ProgressEvent::new(kind, message).with_data(
                serde_json::json!({ "toolName": call.name, "isError": output.is_error() }),
            ));

            results.push(Block::ToolResult {
                tool_use_id: id.clone(),
                content,
                is_error: output.is_error(),
            });
        }

        Ok(results)
    }

    /// One tool invocation. Everything except cancellation comes back as a
    /// successful `ToolOutput`; failures ride in its `error` field.
    async fn run_tool(&self, call: &ToolCall, cancel: &CancelToken) -> Result<ToolOutput> {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, "Model requested an unknown tool");
            return Ok(ToolOutput::failed(
                &call.name,
                format!("Tool '{}' not found", call.name),
            ));
        };

        match tool.execute(&call.parameters, cancel).await {
            Ok(text) => Ok(ToolOutput::ok(&call.name, text)),
            Err(ToolError::Cancelled) => Err(Error::Cancelled),
            Err(ToolError::Failed(reason)) => Ok(ToolOutput::failed(&call.name, reason)),
        }
    }

    /// Publish accumulated thinking as a `thinking_complete` event, once.
    fn flush_thinking(&self, pending: &mut String) {
        if pending.trim().is_empty() {
            return;
        }
        self.bus.publish(ProgressEvent::new(
            ProgressKind::ThinkingComplete,
            std::mem::take(pending),
        ));
    }
}

/// Render a tool invocation as a compact call signature for progress
/// messages, e.g. `read_file(src/main.rs)` or `bash_command(ls -la)`.
fn format_call(name: &str, params: &serde_json::Value) -> String {
    if let Some(path) = params["path"].as_str() {
        return format!("{name}({path})");
    }
    if let Some(command) = params["command"].as_str() {
        return format!("{name}({})", truncate(command, 50));
    }

    match params.as_object() {
        Some(object) if !object.is_empty() => {
            format!("{name}({})", truncate(&params.to_string(), 50))
        }
        _ => format!("{name}()"),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}

fn collect_thinking(blocks: &[Block], log: &mut String) {
    for block in blocks {
        if let Block::Thinking { thinking, .. } = block
            && !thinking.is_empty()
        {
            if !log.is_empty() {
                log.push_str("\n\n");
            }
            log.push_str(thinking);
        }
    }
}
