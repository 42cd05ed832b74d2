//! Error types for the fermata domain.
//!
//! Uses `thiserror` for ergonomic error definitions. The top-level `Error`
//! is the fault surface a caller of the agent sees; `ProviderError` and
//! `ToolError` are the bounded-context enums the transport and tool layers
//! produce.

use thiserror::Error;

/// The top-level error type for agent operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A new query arrived while one was already in flight.
    #[error("Agent is already processing a query")]
    Busy,

    /// The in-flight query was cancelled. Always re-raised verbatim, never
    /// wrapped, so callers can distinguish it from ordinary failure.
    #[error("Operation was cancelled")]
    Cancelled,

    /// The tool-use loop hit its safety ceiling.
    #[error("Maximum tool cycles ({limit}) exceeded; possible tool loop")]
    CycleLimitExceeded { limit: u32 },

    /// The provider or transport failed.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this fault is a cancellation (as opposed to a failure).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Faults produced by the provider transport layer.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Faults a tool execution may raise.
///
/// Tools report expected failures (missing parameter, file not found) as
/// descriptive result text, not as errors; `Cancelled` is the only variant
/// the engine propagates. Anything else a defensive implementation returns
/// is folded back into conversation content.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Operation was cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_limit_message_names_the_ceiling() {
        let err = Error::CycleLimitExceeded { limit: 20 };
        assert!(err.to_string().contains("20"));
        assert!(err.to_string().contains("tool cycles"));
    }

    #[test]
    fn cancellation_is_distinguishable() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Busy.is_cancelled());
        assert!(
            !Error::Provider(ProviderError::Network("reset".into())).is_cancelled()
        );
    }

    #[test]
    fn provider_error_displays_status() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
    }
}
