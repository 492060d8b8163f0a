//! `agent-fabric`: a transport-agnostic remote-agent dispatch fabric.
//!
//! This crate is a thin facade over the workspace members — it exists so a
//! downstream `Cargo.toml` can depend on one crate instead of eight. Each
//! sub-crate stays usable standalone; nothing here adds behavior of its own.

mod config;

pub use agent_client::RemoteAgent;
pub use config::{
    AgentConfig, AgentHostConfig, CacheSettings, CircuitBreakerSettings, ConfigError,
    RateLimiterSettings, RegistryConfig, RetrySettings,
};
pub use agent_composition::{
    content_contains, metadata_has_key, role_equals, Aggregator, Condition, ConditionalAgent,
    FallbackAgent, ParallelAgent, SequentialAgent,
};
pub use agent_core::{
    Agent, AgentError, Endpoint, Envelope, EnvelopeKind, ErrorDetails, Message, MessageStream,
    Metadata, ProtocolError, ProtocolErrorCode, RemoteExecutionError, ToolResult,
    MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use agent_grpc::{protocol_error_to_status, status_to_protocol_error, GrpcRemoteAgent, GrpcService};
pub use agent_middleware::{
    BatchingConfig, BatchingDecorator, BatchingMetrics, CachingConfig, CachingDecorator,
    CachingMetrics, CircuitBreakerConfig, CircuitBreakerDecorator, CircuitBreakerMetrics,
    CircuitState, KeyGenerator, RateLimiterConfig, RateLimiterDecorator, RateLimiterMetrics,
    RetryConfig, RetryDecorator, RetryMetrics,
};
pub use agent_registry::{heartbeat_loop, heartbeat_loop_with_interval, AgentRegistration, AgentRegistry};
pub use agent_server::LocalAgent;
pub use agent_transport::{
    create_memory_transport_pair, InMemoryTransport, TcpTransport, Transport, UnixTransport,
    WebSocketTransport, WebSocketTransportConfig,
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    struct Echo;

    #[async_trait::async_trait]
    impl Agent for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn process(&self, message: Message) -> Result<Message, AgentError> {
            Ok(message)
        }

        async fn stream(&self, message: Message) -> MessageStream {
            Box::pin(futures_util::stream::once(async move { Ok(message) }))
        }
    }

    #[tokio::test]
    async fn facade_reexports_compose_end_to_end() {
        let agent: Arc<dyn Agent> = Arc::new(Echo);
        let sequential = SequentialAgent::new("pipeline", vec![agent.clone(), agent.clone()]).unwrap();
        let reply = sequential.process(Message::new("user", json!("hi"))).await.unwrap();
        assert_eq!(reply.content, json!("hi"));
    }
}
