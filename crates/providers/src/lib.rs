//! LLM provider implementations for fermata.
//!
//! All providers implement the `fermata_core::Provider` trait. The agent
//! engine consumes that trait alone, so any compliant backend can be
//! substituted.

pub mod anthropic;

pub use anthropic::AnthropicProvider;
