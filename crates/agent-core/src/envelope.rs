//! The wire envelope shared by every transport: Unix/TCP framed streams,
//! WebSocket messages, HTTP/SSE bodies, and the gRPC bridge all exchange the
//! same `Envelope` shape, just carried over different plumbing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Protocol version stamped on every envelope. Bumped only on breaking wire
/// changes; a mismatch is always rejected rather than negotiated.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Maximum encoded envelope size accepted by any framed transport.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Discriminant for the kind of envelope being carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Request,
    Response,
    Error,
    Heartbeat,
    Register,
    Unregister,
    StreamChunk,
    StreamEnd,
}

/// A single message exchanged over the wire.
///
/// `payload` is deliberately untyped JSON: its shape depends on `kind` (a
/// request payload has `method`/`agent_name`/`message`, an error payload has
/// `error_code`/`error_message`/`error_details`, and so on). Callers decode
/// the fields they expect with [`Envelope::payload_field`] or
/// `serde_json::from_value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: String,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl Envelope {
    pub fn request(method: &str, agent_name: Option<&str>, extra: Value) -> Self {
        let mut payload = json!({ "method": method });
        if let Some(name) = agent_name {
            payload["agent_name"] = json!(name);
        }
        merge_object(&mut payload, extra);
        Self {
            version: PROTOCOL_VERSION.to_string(),
            kind: EnvelopeKind::Request,
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn response(request_id: impl Into<String>, payload: Value) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            kind: EnvelopeKind::Response,
            id: request_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn error(request_id: impl Into<String>, error: &ProtocolError) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            kind: EnvelopeKind::Error,
            id: request_id.into(),
            timestamp: Utc::now(),
            payload: json!({
                "error_code": error.code.as_str(),
                "error_message": error.message,
                "error_details": error.details,
            }),
        }
    }

    pub fn stream_chunk(request_id: impl Into<String>, message: Value) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            kind: EnvelopeKind::StreamChunk,
            id: request_id.into(),
            timestamp: Utc::now(),
            payload: json!({ "message": message }),
        }
    }

    pub fn stream_end(request_id: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            kind: EnvelopeKind::StreamEnd,
            id: request_id.into(),
            timestamp: Utc::now(),
            payload: json!({}),
        }
    }

    pub fn heartbeat(agent_name: &str) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            kind: EnvelopeKind::Heartbeat,
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            payload: json!({ "agent_name": agent_name }),
        }
    }

    /// Checks that the envelope carries a version this build understands.
    /// Type/id/payload presence is already guaranteed by successful
    /// deserialization, since those fields are not optional on the struct.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::unsupported_version(format!(
                "unsupported protocol version: {}",
                self.version
            )));
        }
        Ok(())
    }

    pub fn payload_field(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self)
            .map_err(|e| ProtocolError::internal(format!("failed to encode envelope: {e}")))
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::malformed_payload(format!(
                "envelope of {} bytes exceeds maximum of {MAX_MESSAGE_SIZE}",
                data.len()
            )));
        }
        let envelope: Self = serde_json::from_slice(data)
            .map_err(|e| ProtocolError::malformed_payload(format!("failed to decode envelope: {e}")))?;
        envelope.validate()?;
        Ok(envelope)
    }
}

fn merge_object(base: &mut Value, extra: Value) {
    let Value::Object(extra_map) = extra else {
        return;
    };
    if let Value::Object(base_map) = base {
        for (key, value) in extra_map {
            base_map.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_carries_method_and_agent_name() {
        let env = Envelope::request("process", Some("summarizer"), json!({"message": "hi"}));
        assert_eq!(env.kind, EnvelopeKind::Request);
        assert_eq!(env.payload["method"], "process");
        assert_eq!(env.payload["agent_name"], "summarizer");
        assert_eq!(env.payload["message"], "hi");
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let env = Envelope::response("req-1", json!({"ok": true}));
        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.id, "req-1");
        assert_eq!(decoded.kind, EnvelopeKind::Response);
        assert_eq!(decoded.payload["ok"], true);
    }

    #[test]
    fn decode_rejects_unsupported_version() {
        let raw = json!({
            "version": "2.0",
            "type": "request",
            "id": "x",
            "timestamp": Utc::now().to_rfc3339(),
            "payload": {}
        });
        let bytes = serde_json::to_vec(&raw).unwrap();
        let err = Envelope::decode(&bytes).unwrap_err();
        assert_eq!(err.code, crate::error::ProtocolErrorCode::UnsupportedVersion);
    }

    #[test]
    fn decode_rejects_garbage_as_malformed_payload() {
        let err = Envelope::decode(b"not json").unwrap_err();
        assert_eq!(err.code, crate::error::ProtocolErrorCode::MalformedPayload);
    }

    #[test]
    fn decode_rejects_oversized_frames() {
        let oversized = vec![b'a'; MAX_MESSAGE_SIZE + 1];
        let err = Envelope::decode(&oversized).unwrap_err();
        assert_eq!(err.code, crate::error::ProtocolErrorCode::MalformedPayload);
    }

    #[test]
    fn stream_end_has_empty_payload() {
        let env = Envelope::stream_end("req-2");
        assert_eq!(env.payload, json!({}));
    }
}
