//! gRPC transport: a single `AgentService` with a unary `Process` and a
//! server-streaming `ProcessStream`, bridging JSON envelopes' decoded
//! `Message` to and from protobuf.

mod client;
mod server;
mod status;

pub mod pb {
    pub use self::generated::*;

    mod generated {
        tonic::include_proto!("agentfabric");
    }

    use agent_core::Metadata;
    use serde_json::Value;
    use std::collections::HashMap;

    pub fn message_to_proto(message: &agent_core::Message) -> Message {
        Message {
            role: message.role.clone(),
            content: value_to_string(&message.content),
            metadata: metadata_to_proto(&message.metadata),
            timestamp: message.timestamp.to_rfc3339(),
        }
    }

    pub fn proto_to_message(proto: Message) -> agent_core::Message {
        agent_core::Message {
            role: proto.role,
            content: string_to_value(&proto.content),
            metadata: proto_to_metadata(proto.metadata),
            timestamp: proto.timestamp.parse().unwrap_or_else(|_| chrono::Utc::now()),
        }
    }

    fn value_to_string(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }

    fn string_to_value(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
    }

    fn metadata_to_proto(metadata: &Metadata) -> HashMap<String, String> {
        metadata.iter().map(|(k, v)| (k.clone(), value_to_string(v))).collect()
    }

    fn proto_to_metadata(metadata: HashMap<String, String>) -> Metadata {
        metadata.into_iter().map(|(k, v)| (k, string_to_value(&v))).collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use serde_json::json;

        #[test]
        fn scalar_string_content_round_trips_unchanged() {
            let message = agent_core::Message::new("user", json!("hello"));
            let proto = message_to_proto(&message);
            assert_eq!(proto.content, "hello");
            let back = proto_to_message(proto);
            assert_eq!(back.content, json!("hello"));
        }

        #[test]
        fn structured_content_round_trips_through_json() {
            let message = agent_core::Message::new("user", json!({"a": 1}));
            let proto = message_to_proto(&message);
            let back = proto_to_message(proto);
            assert_eq!(back.content, json!({"a": 1}));
        }
    }
}

pub use client::GrpcRemoteAgent;
pub use server::GrpcService;
pub use status::{protocol_error_to_status, status_to_protocol_error};
