//! Envelope-level request handling shared by every transport's connection
//! loop: decode a request envelope, call the agent, encode the reply.

use agent_core::{Agent, AgentError, Envelope, EnvelopeKind, Message, ProtocolError};
use serde_json::{json, Value};

pub fn request_method(request: &Envelope) -> &str {
    request
        .payload
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("process")
}

fn decode_request_message(request: &Envelope) -> Result<Message, ProtocolError> {
    let raw = request
        .payload
        .get("message")
        .ok_or_else(|| ProtocolError::invalid_message("request missing 'message'"))?;
    serde_json::from_value(raw.clone())
        .map_err(|e| ProtocolError::malformed_payload(format!("failed to decode message: {e}")))
}

/// Maps any agent-raised error to the `error` envelope the spec requires:
/// typed protocol errors keep their code, anything else becomes
/// `INTERNAL_ERROR`.
pub fn error_envelope(request_id: impl Into<String>, error: &AgentError) -> Envelope {
    let protocol_error = match error {
        AgentError::Protocol(e) => e.clone(),
        AgentError::RemoteExecution(e) => ProtocolError::internal(e.original_error.clone()),
    };
    Envelope::error(request_id, &protocol_error)
}

/// Handles a `process` request end to end, returning the `response` or
/// `error` envelope to write back.
pub async fn handle_unary(agent: &dyn Agent, request: &Envelope) -> Envelope {
    let message = match decode_request_message(request) {
        Ok(m) => m,
        Err(e) => return Envelope::error(request.id.clone(), &e),
    };
    match agent.process(message).await {
        Ok(response) => Envelope::response(request.id.clone(), json!({ "message": response })),
        Err(e) => error_envelope(request.id.clone(), &e),
    }
}

/// Starts a `stream` request, returning the agent's message stream to drain,
/// or the `error` envelope to write back if the request itself is malformed.
pub fn start_stream(agent: &dyn Agent, request: &Envelope) -> Result<Message, Envelope> {
    decode_request_message(request).map_err(|e| Envelope::error(request.id.clone(), &e))
}

pub fn chunk_envelope(request_id: impl Into<String>, message: &Message) -> Envelope {
    Envelope::stream_chunk(request_id, json!(message))
}

pub fn end_envelope(request_id: impl Into<String>) -> Envelope {
    Envelope::stream_end(request_id)
}

pub fn is_stream_request(request: &Envelope) -> bool {
    request.kind == EnvelopeKind::Request && request_method(request) == "stream"
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{AgentError, MessageStream};
    use async_trait::async_trait;
    use serde_json::json as j;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }
        async fn process(&self, message: Message) -> Result<Message, AgentError> {
            Ok(message)
        }
    }

    #[tokio::test]
    async fn handle_unary_round_trips_a_message() {
        let request = Envelope::request(
            "process",
            Some("echo"),
            j!({ "message": Message::new("user", j!("hi")) }),
        );
        let response = handle_unary(&EchoAgent, &request).await;
        assert_eq!(response.kind, EnvelopeKind::Response);
        assert_eq!(response.payload["message"]["content"], "hi");
    }

    #[test]
    fn malformed_request_becomes_an_error_envelope() {
        let request = Envelope::request("process", Some("echo"), j!({}));
        assert!(start_stream(&EchoAgent, &request).is_err());
    }

    #[allow(dead_code)]
    fn _unused(_s: MessageStream) {}
}
