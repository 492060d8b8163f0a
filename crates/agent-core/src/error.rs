//! Protocol-level error taxonomy shared by every transport and middleware layer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable machine-readable error codes carried in `error` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolErrorCode {
    ConnectionFailed,
    ConnectionTimeout,
    ConnectionClosed,

    InvalidMessage,
    UnsupportedVersion,
    MalformedPayload,

    AgentNotFound,
    AgentUnavailable,
    AgentTimeout,

    ToolNotFound,
    ToolExecutionFailed,

    RegistrationFailed,
    DuplicateAgent,

    CircuitOpen,
    RateLimited,

    InternalError,
}

impl ProtocolErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::UnsupportedVersion => "UNSUPPORTED_VERSION",
            Self::MalformedPayload => "MALFORMED_PAYLOAD",
            Self::AgentNotFound => "AGENT_NOT_FOUND",
            Self::AgentUnavailable => "AGENT_UNAVAILABLE",
            Self::AgentTimeout => "AGENT_TIMEOUT",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::ToolExecutionFailed => "TOOL_EXECUTION_FAILED",
            Self::RegistrationFailed => "REGISTRATION_FAILED",
            Self::DuplicateAgent => "DUPLICATE_AGENT",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::RateLimited => "RATE_LIMITED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Arbitrary structured details attached to a [`ProtocolError`].
pub type ErrorDetails = HashMap<String, Value>;

/// Error raised anywhere a protocol envelope, transport, or agent dispatch
/// step fails in a way the caller should be able to branch on by code.
#[derive(Debug, thiserror::Error, Clone)]
#[error("{code}: {message}", code = self.code.as_str())]
pub struct ProtocolError {
    pub code: ProtocolErrorCode,
    pub message: String,
    pub details: ErrorDetails,
}

impl ProtocolError {
    pub fn new(code: ProtocolErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: ErrorDetails::new(),
        }
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorCode::ConnectionFailed, message)
    }

    pub fn connection_timeout(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorCode::ConnectionTimeout, message)
    }

    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorCode::ConnectionClosed, message)
    }

    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorCode::InvalidMessage, message)
    }

    pub fn unsupported_version(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorCode::UnsupportedVersion, message)
    }

    pub fn malformed_payload(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorCode::MalformedPayload, message)
    }

    pub fn agent_not_found(agent_name: &str) -> Self {
        Self::new(
            ProtocolErrorCode::AgentNotFound,
            format!("Agent '{agent_name}' not found in registry"),
        )
    }

    pub fn agent_unavailable(agent_name: &str) -> Self {
        Self::new(
            ProtocolErrorCode::AgentUnavailable,
            format!("Agent '{agent_name}' is unavailable"),
        )
    }

    pub fn agent_timeout(agent_name: &str, timeout_secs: f64) -> Self {
        Self::new(
            ProtocolErrorCode::AgentTimeout,
            format!("Agent '{agent_name}' timed out after {timeout_secs}s"),
        )
    }

    pub fn tool_not_found(tool_name: &str) -> Self {
        Self::new(
            ProtocolErrorCode::ToolNotFound,
            format!("Tool '{tool_name}' not found"),
        )
    }

    pub fn tool_execution_failed(tool_name: &str, reason: &str) -> Self {
        Self::new(
            ProtocolErrorCode::ToolExecutionFailed,
            format!("Tool '{tool_name}' execution failed: {reason}"),
        )
    }

    pub fn registration_failed(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorCode::RegistrationFailed, message)
    }

    pub fn duplicate_agent(agent_name: &str) -> Self {
        Self::new(
            ProtocolErrorCode::DuplicateAgent,
            format!("Agent '{agent_name}' is already registered"),
        )
    }

    pub fn circuit_open(agent_name: &str) -> Self {
        Self::new(
            ProtocolErrorCode::CircuitOpen,
            format!("Circuit breaker open for '{agent_name}'"),
        )
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorCode::RateLimited, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorCode::InternalError, message)
    }
}

/// Raised when a remote agent's own handler fails; distinct from
/// [`ProtocolError`] because it wraps an opaque error surfaced by the other
/// side rather than a failure of the protocol itself.
#[derive(Debug, thiserror::Error, Clone)]
#[error("remote execution failed on agent '{agent_name}': {original_error}")]
pub struct RemoteExecutionError {
    pub agent_name: String,
    pub original_error: String,
    pub details: ErrorDetails,
}

impl RemoteExecutionError {
    pub fn new(agent_name: impl Into<String>, original_error: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            original_error: original_error.into(),
            details: ErrorDetails::new(),
        }
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }
}

/// Top-level error type returned by transports, servers, and clients, unifying
/// protocol-level failures with opaque remote-execution failures.
#[derive(Debug, thiserror::Error, Clone)]
pub enum AgentError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    RemoteExecution(#[from] RemoteExecutionError),
}

impl AgentError {
    /// Best-effort protocol error code for this error, used when mapping to
    /// an `error` envelope or an HTTP/gRPC status.
    pub fn code(&self) -> ProtocolErrorCode {
        match self {
            Self::Protocol(e) => e.code,
            Self::RemoteExecution(_) => ProtocolErrorCode::InternalError,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Protocol(e) => e.message.clone(),
            Self::RemoteExecution(e) => e.original_error.clone(),
        }
    }

    pub fn details(&self) -> ErrorDetails {
        match self {
            Self::Protocol(e) => e.details.clone(),
            Self::RemoteExecution(e) => e.details.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trips_through_serde() {
        let json = serde_json::to_string(&ProtocolErrorCode::AgentTimeout).unwrap();
        assert_eq!(json, "\"AGENT_TIMEOUT\"");
        let back: ProtocolErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_str(), "AGENT_TIMEOUT");
    }

    #[test]
    fn agent_not_found_message_includes_name() {
        let err = ProtocolError::agent_not_found("summarizer");
        assert_eq!(err.code, ProtocolErrorCode::AgentNotFound);
        assert!(err.message.contains("summarizer"));
    }

    #[test]
    fn agent_error_from_protocol_preserves_code() {
        let err: AgentError = ProtocolError::circuit_open("summarizer").into();
        assert_eq!(err.code(), ProtocolErrorCode::CircuitOpen);
    }
}
