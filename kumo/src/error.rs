//! Error types for the kumo runtime.
//!
//! Every failure surfaced by the event loop and the orchestrators is one of
//! the kinds defined here. Model providers are expected to map their wire
//! errors onto [`Error::Throttled`], [`Error::ContextWindowExceeded`] or
//! [`Error::Provider`] so the retry logic can tell them apart.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// A type alias for `Result<T, kumo::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The model provider rejected the request due to throttling.
    ///
    /// This is the only error kind the event loop retries.
    #[error("model request throttled: {0}")]
    Throttled(String),

    /// The conversation no longer fits the model's context window.
    ///
    /// Never retried; callers may trim the conversation and reinvoke.
    #[error("context window exceeded: {0}")]
    ContextWindowExceeded(String),

    /// Any other model provider failure, including a stream that ended
    /// without a message stop event.
    #[error("model provider error: {0}")]
    Provider(String),

    /// A tool runner failed.
    ///
    /// The tool executor converts this into a `tool_result` with error
    /// status rather than letting it escape the loop; the variant exists
    /// for tool implementations to report failures with context.
    #[error("tool '{tool_name}' failed: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool_name: String,
        /// The underlying error message.
        message: String,
    },

    /// The event loop failed after a successful model call.
    ///
    /// Carries the request state accumulated up to the failure so callers
    /// can inspect or resume from it.
    #[error("event loop failed: {message}")]
    EventLoop {
        /// Description of the underlying failure.
        message: String,
        /// Request state captured at the point of failure.
        request_state: HashMap<String, Value>,
    },

    /// The event loop exceeded its cycle ceiling without the model
    /// reaching a terminal stop reason.
    #[error("event loop exceeded {0} cycles")]
    MaxCycles(usize),

    /// Agent construction was given an invalid configuration.
    #[error("invalid agent configuration: {0}")]
    Config(String),

    /// Graph construction failed validation.
    #[error("graph validation failed: {0}")]
    GraphValidation(String),

    /// Graph construction detected a cycle.
    #[error("graph contains a cycle through node '{0}'")]
    GraphCycle(String),

    /// Swarm construction was given an invalid configuration.
    #[error("invalid swarm configuration: {0}")]
    SwarmConfig(String),

    /// A wall-clock guard expired.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The invocation was cancelled via its context.
    #[error("operation cancelled")]
    Cancelled,

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a new throttling error.
    #[must_use]
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::Throttled(message.into())
    }

    /// Create a new context-window-exceeded error.
    #[must_use]
    pub fn context_window_exceeded(message: impl Into<String>) -> Self {
        Self::ContextWindowExceeded(message.into())
    }

    /// Create a new provider error.
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    /// Create a new tool error.
    #[must_use]
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a new event loop error carrying the captured request state.
    #[must_use]
    pub fn event_loop(
        message: impl Into<String>,
        request_state: HashMap<String, Value>,
    ) -> Self {
        Self::EventLoop {
            message: message.into(),
            request_state,
        }
    }

    /// Create a new agent configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new graph validation error.
    #[must_use]
    pub fn graph_validation(message: impl Into<String>) -> Self {
        Self::GraphValidation(message.into())
    }

    /// Create a new swarm configuration error.
    #[must_use]
    pub fn swarm_config(message: impl Into<String>) -> Self {
        Self::SwarmConfig(message.into())
    }

    /// Returns `true` if this error is retryable by the event loop.
    ///
    /// Only throttling errors are retried; everything else surfaces
    /// immediately.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }

    /// Returns `true` if this is a context-window-exceeded error.
    #[must_use]
    pub const fn is_context_overflow(&self) -> bool {
        matches!(self, Self::ContextWindowExceeded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_is_retryable() {
        assert!(Error::throttled("slow down").is_retryable());
        assert!(!Error::provider("boom").is_retryable());
        assert!(!Error::context_window_exceeded("too big").is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn context_overflow_detection() {
        assert!(Error::context_window_exceeded("too big").is_context_overflow());
        assert!(!Error::throttled("slow down").is_context_overflow());
    }

    #[test]
    fn display_includes_context() {
        let err = Error::tool("calculator", "division by zero");
        assert_eq!(
            err.to_string(),
            "tool 'calculator' failed: division by zero"
        );

        let err = Error::MaxCycles(100);
        assert_eq!(err.to_string(), "event loop exceeded 100 cycles");
    }

    #[test]
    fn event_loop_error_carries_state() {
        let mut state = HashMap::new();
        state.insert("key".to_owned(), serde_json::json!("value"));
        let err = Error::event_loop("tool dispatch failed", state);

        match err {
            Error::EventLoop { request_state, .. } => {
                assert_eq!(request_state["key"], "value");
            }
            _ => panic!("expected EventLoop variant"),
        }
    }

    #[test]
    fn from_serde_json() {
        let parse_err = serde_json::from_str::<Value>("not json").unwrap_err();
        let err = Error::from(parse_err);
        assert!(matches!(err, Error::Json(_)));
    }
}
