//! Stream decoding — folding an incremental provider stream into one
//! completed turn.
//!
//! The decoder consumes the event stream of a single provider turn and
//! accumulates per-index content blocks until the stream ends. Thinking
//! content and its opaque signature are captured verbatim so they can be
//! echoed back ahead of any tool_use blocks on the follow-up request. Tool
//! input arrives as raw JSON fragments and is parsed only once the stream
//! is complete; a turn whose argument JSON does not parse still yields a
//! tool call, with an empty object as its parameters, so the tool itself
//! can report the missing arguments back to the model.

use fermata_core::cancel::CancelToken;
use fermata_core::error::{Error, ProviderError, Result};
use fermata_core::event::{ProgressBus, ProgressEvent, ProgressKind};
use fermata_core::message::Block;
use fermata_core::provider::{BlockDelta, BlockStart, CompletedTurn, StopReason, StreamEvent, TokenUsage};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A content block under accumulation, indexed by stream position.
enum PartialBlock {
    Text(String),
    Thinking {
        content: String,
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

/// Decodes one streamed provider turn, publishing progress along the way.
pub struct StreamDecoder<'a> {
    bus: &'a ProgressBus,
    cancel: &'a CancelToken,
}

impl<'a> StreamDecoder<'a> {
    pub fn new(bus: &'a ProgressBus, cancel: &'a CancelToken) -> Self {
        Self { bus, cancel }
    }

    /// Drain the stream into a completed turn.
    ///
    /// The cancel token is checked before consuming each event; a
    /// cancellation observed mid-stream abandons the rest of the turn.
    pub async fn decode(
        &self,
        mut rx: mpsc::Receiver<std::result::Result<StreamEvent, ProviderError>>,
    ) -> Result<CompletedTurn> {
        let mut partials: Vec<Option<PartialBlock>> = Vec::new();
        let mut input_tokens: u32 = 0;
        let mut output_tokens: u32 = 0;

        while let Some(event) = rx.recv().await {
            if self.cancel.is_cancelled() {
                debug!("Cancellation observed mid-stream, abandoning turn");
                return Err(Error::Cancelled);
            }

            match event? {
                StreamEvent::TurnStart {
                    input_tokens: tokens,
                } => {
                    input_tokens = tokens;
                    self.publish_usage(input_tokens, output_tokens);
                }
                StreamEvent::BlockStart { index, start } => {
                    if partials.len() <= index {
                        partials.resize_with(index + 1, || None);
                    }
                    partials[index] = Some(match start {
                        BlockStart::Text => PartialBlock::Text(String::new()),
                        BlockStart::Thinking => PartialBlock::Thinking {
                            content: String::new(),
                            signature: None,
                        },
                        BlockStart::ToolUse { id, name } => PartialBlock::ToolUse {
                            id,
                            name,
                            input_json: String::new(),
                        },
                    });
                }
                StreamEvent::BlockDelta { index, delta } => {
                    let Some(Some(partial)) = partials.get_mut(index) else {
                        warn!(index, "Delta for a block that never started, skipping");
                        continue;
                    };
                    match (partial, delta) {
                        (PartialBlock::Text(text), BlockDelta::Text { value }) => {
                            text.push_str(&value);
                        }
                        (
                            PartialBlock::Thinking { content, .. },
                            BlockDelta::Thinking { value },
                        ) => {
                            content.push_str(&value);
                            // Latest-snapshot semantics: one event per delta,
                            // each carrying everything accumulated so far.
                            self.bus.publish(
                                ProgressEvent::new(ProgressKind::Thinking, "Thinking...")
                                    .with_data(serde_json::json!({ "thinking": content })),
                            );
                        }
                        (
                            PartialBlock::Thinking { signature, .. },
                            BlockDelta::Signature { value },
                        ) => {
                            signature.get_or_insert_with(String::new).push_str(&value);
                        }
                        (
                            PartialBlock::ToolUse { input_json, .. },
                            BlockDelta::ToolInput { value },
                        ) => {
                            input_json.push_str(&value);
                        }
                        _ => {
                            warn!(index, "Delta kind does not match its block, skipping");
                        }
                    }
                }
                StreamEvent::BlockStop { .. } => {}
                StreamEvent::TurnDelta {
                    output_tokens: tokens,
                } => {
                    output_tokens = tokens;
                    self.publish_usage(input_tokens, output_tokens);
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let blocks: Vec<Block> = partials
            .into_iter()
            .flatten()
            .map(finish_block)
            .collect();

        let stop_reason = if blocks.iter().any(|b| matches!(b, Block::ToolUse { .. })) {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        };

        Ok(CompletedTurn {
            blocks,
            stop_reason,
            usage: Some(TokenUsage::new(input_tokens, output_tokens)),
        })
    }

    fn publish_usage(&self, input_tokens: u32, output_tokens: u32) {
        self.bus.publish(
            ProgressEvent::new(ProgressKind::TokenUpdate, "Token usage updated")
                .with_usage(TokenUsage::new(input_tokens, output_tokens)),
        );
    }
}

fn finish_block(partial: PartialBlock) -> Block {
    match partial {
        PartialBlock::Text(text) => Block::Text { text },
        PartialBlock::Thinking { content, signature } => Block::Thinking {
            thinking: content,
            signature,
        },
        PartialBlock::ToolUse {
            id,
            name,
            input_json,
        } => {
            let input = if input_json.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&input_json).unwrap_or_else(|e| {
                    warn!(tool = %name, error = %e, "Tool input JSON failed to parse, using empty object");
                    serde_json::json!({})
                })
            };
            Block::ToolUse { id, name, input }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode_all(events: Vec<StreamEvent>) -> Result<CompletedTurn> {
        let bus = ProgressBus::default();
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel(64);
        for event in events {
            tx.send(Ok(event)).await.unwrap();
        }
        drop(tx);
        StreamDecoder::new(&bus, &cancel).decode(rx).await
    }

    #[tokio::test]
    async fn text_only_turn() {
        let turn = decode_all(vec![
            StreamEvent::TurnStart { input_tokens: 12 },
            StreamEvent::BlockStart {
                index: 0,
                start: BlockStart::Text,
            },
            StreamEvent::BlockDelta {
                index: 0,
                delta: BlockDelta::Text {
                    value: "Hello, ".into(),
                },
            },
            StreamEvent::BlockDelta {
                index: 0,
                delta: BlockDelta::Text {
                    value: "world".into(),
                },
            },
            StreamEvent::BlockStop { index: 0 },
            StreamEvent::TurnDelta { output_tokens: 4 },
        ])
        .await
        .unwrap();

        assert_eq!(turn.stop_reason, StopReason::EndTurn);
        assert_eq!(
            turn.blocks,
            vec![Block::Text {
                text: "Hello, world".into()
            }]
        );
        assert_eq!(turn.usage.unwrap().total_tokens, 16);
    }

    #[tokio::test]
    async fn thinking_then_tool_use() {
        let turn = decode_all(vec![
            StreamEvent::TurnStart { input_tokens: 30 },
            StreamEvent::BlockStart {
                index: 0,
                start: BlockStart::Thinking,
            },
            StreamEvent::BlockDelta {
                index: 0,
                delta: BlockDelta::Thinking {
                    value: "Need the file first".into(),
                },
            },
            StreamEvent::BlockDelta {
                index: 0,
                delta: BlockDelta::Signature {
                    value: "sig_opaque".into(),
                },
            },
            StreamEvent::BlockStop { index: 0 },
            StreamEvent::BlockStart {
                index: 1,
                start: BlockStart::ToolUse {
                    id: "toolu_1".into(),
                    name: "read_file".into(),
                },
            },
            StreamEvent::BlockDelta {
                index: 1,
                delta: BlockDelta::ToolInput {
                    value: r#"{"path":"#.into(),
                },
            },
            StreamEvent::BlockDelta {
                index: 1,
                delta: BlockDelta::ToolInput {
                    value: r#""a.txt"}"#.into(),
                },
            },
            StreamEvent::BlockStop { index: 1 },
        ])
        .await
        .unwrap();

        assert_eq!(turn.stop_reason, StopReason::ToolUse);
        assert_eq!(
            turn.blocks[0],
            Block::Thinking {
                thinking: "Need the file first".into(),
                signature: Some("sig_opaque".into()),
            }
        );
        assert_eq!(
            turn.blocks[1],
            Block::ToolUse {
                id: "toolu_1".into(),
                name: "read_file".into(),
                input: serde_json::json!({"path": "a.txt"}),
            }
        );
    }

    #[tokio::test]
    async fn malformed_tool_input_falls_back_to_empty_object() {
        let turn = decode_all(vec![
            StreamEvent::BlockStart {
                index: 0,
                start: BlockStart::ToolUse {
                    id: "toolu_1".into(),
                    name: "read_file".into(),
                },
            },
            StreamEvent::BlockDelta {
                index: 0,
                delta: BlockDelta::ToolInput {
                    value: r#"{"path": "#.into(),
                },
            },
            StreamEvent::BlockStop { index: 0 },
        ])
        .await
        .unwrap();

        assert_eq!(
            turn.blocks[0],
            Block::ToolUse {
                id: "toolu_1".into(),
                name: "read_file".into(),
                input: serde_json::json!({}),
            }
        );
    }

    #[tokio::test]
    async fn empty_tool_input_is_empty_object() {
        let turn = decode_all(vec![
            StreamEvent::BlockStart {
                index: 0,
                start: BlockStart::ToolUse {
                    id: "toolu_1".into(),
                    name: "list_files".into(),
                },
            },
            StreamEvent::BlockStop { index: 0 },
        ])
        .await
        .unwrap();

        assert_eq!(
            turn.blocks[0],
            Block::ToolUse {
                id: "toolu_1".into(),
                name: "list_files".into(),
                input: serde_json::json!({}),
            }
        );
    }

    #[tokio::test]
    async fn cancellation_abandons_the_stream() {
        let bus = ProgressBus::default();
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel(64);
        tx.send(Ok(StreamEvent::TurnStart { input_tokens: 1 }))
            .await
            .unwrap();
        drop(tx);

        cancel.cancel();
        let result = StreamDecoder::new(&bus, &cancel).decode(rx).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn provider_stream_error_propagates() {
        let bus = ProgressBus::default();
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel(64);
        tx.send(Err(ProviderError::StreamInterrupted("reset".into())))
            .await
            .unwrap();
        drop(tx);

        let result = StreamDecoder::new(&bus, &cancel).decode(rx).await;
        assert!(matches!(result, Err(Error::Provider(_))));
    }

    #[tokio::test]
    async fn thinking_snapshot_published_per_delta() {
        let bus = ProgressBus::default();
        let mut events_rx = bus.subscribe();
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel(64);

        tx.send(Ok(StreamEvent::BlockStart {
            index: 0,
            start: BlockStart::Thinking,
        }))
        .await
        .unwrap();
        for fragment in ["I should ", "check the ", "file first"] {
            tx.send(Ok(StreamEvent::BlockDelta {
                index: 0,
                delta: BlockDelta::Thinking {
                    value: fragment.into(),
                },
            }))
            .await
            .unwrap();
        }
        tx.send(Ok(StreamEvent::BlockStop { index: 0 }))
            .await
            .unwrap();
        drop(tx);

        StreamDecoder::new(&bus, &cancel).decode(rx).await.unwrap();

        // One snapshot per delta, each carrying the accumulated buffer.
        let mut snapshots = Vec::new();
        while let Ok(event) = events_rx.try_recv() {
            if event.kind == ProgressKind::Thinking {
                snapshots.push(event.data.as_ref().unwrap()["thinking"].as_str().unwrap().to_string());
            }
        }
        assert_eq!(
            snapshots,
            vec![
                "I should ".to_string(),
                "I should check the ".to_string(),
                "I should check the file first".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn token_updates_are_published() {
        let bus = ProgressBus::default();
        let mut events_rx = bus.subscribe();
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel(64);
        tx.send(Ok(StreamEvent::TurnStart { input_tokens: 10 }))
            .await
            .unwrap();
        tx.send(Ok(StreamEvent::TurnDelta { output_tokens: 7 }))
            .await
            .unwrap();
        drop(tx);

        StreamDecoder::new(&bus, &cancel).decode(rx).await.unwrap();

        let first = events_rx.recv().await.unwrap();
        assert_eq!(first.kind, ProgressKind::TokenUpdate);
        assert_eq!(first.token_usage.unwrap().total_tokens, 10);

        let second = events_rx.recv().await.unwrap();
        assert_eq!(second.kind, ProgressKind::TokenUpdate);
        assert_eq!(second.token_usage.unwrap().total_tokens, 17);
    }
}
