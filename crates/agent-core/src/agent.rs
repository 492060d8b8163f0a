//! The `Agent` trait every local implementation, remote proxy, middleware
//! decorator, and composition pattern in this fabric implements.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::AgentError;
use crate::types::Message;

/// A stream of response messages, as returned by [`Agent::stream`].
pub type MessageStream = BoxStream<'static, Result<Message, AgentError>>;

/// Common interface implemented by local agents, remote proxies, middleware
/// decorators, and composition patterns alike, so any of them can stand in
/// for any other.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier used for routing, registry lookups, and logging.
    fn name(&self) -> &str;

    /// Process a single message and return a single response.
    async fn process(&self, message: Message) -> Result<Message, AgentError>;

    /// Process a single message, returning a stream of response chunks.
    ///
    /// The default implementation adapts [`Agent::process`] into a
    /// single-item stream for agents that do not support incremental
    /// output.
    async fn stream(&self, message: Message) -> MessageStream {
        let result = self.process(message).await;
        Box::pin(futures_util::stream::once(async move { result }))
    }

    /// Capability tags advertised for discovery and routing. Empty by
    /// default; most agents don't need to advertise anything.
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }

        async fn process(&self, message: Message) -> Result<Message, AgentError> {
            Ok(Message::new("assistant", message.content))
        }
    }

    #[tokio::test]
    async fn default_stream_impl_yields_single_chunk() {
        let agent = EchoAgent;
        let input = Message::new("user", json!("hi"));
        let mut stream = agent.stream(input).await;
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.content, json!("hi"));
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn default_capabilities_are_empty() {
        assert!(EchoAgent.capabilities().is_empty());
    }
}
