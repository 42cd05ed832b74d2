//! Query orchestration for fermata.
//!
//! A query moves through three layers:
//!
//! 1. **Controller** (`Agent`) — single-flight admission, cancellation,
//!    history reconciliation, terminal events
//! 2. **Engine** — the bounded tool-use loop: streamed first turn,
//!    completion follow-ups, sequential tool execution
//! 3. **Decoder** — folds one provider event stream into a completed turn
//!
//! The loop continues until the model answers without requesting tools or
//! the cycle ceiling is hit.

pub mod controller;
pub mod decoder;
pub mod engine;

pub use controller::Agent;
pub use decoder::StreamDecoder;
pub use engine::{Engine, EngineSettings, QueryOutcome};
