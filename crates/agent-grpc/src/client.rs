//! Client-side bridge: dials `AgentService` over a `tonic::transport::Channel`
//! and presents it as an ordinary `Agent`, the way `RemoteAgent` does for the
//! byte-stream and HTTP transports.

use agent_core::{Agent, AgentError, Message, MessageStream, ProtocolError};
use async_trait::async_trait;
use futures_util::StreamExt;
use tonic::transport::Channel;
use tonic::Request;

use crate::pb;
use crate::pb::agent_service_client::AgentServiceClient;
use crate::status::status_to_protocol_error;

pub struct GrpcRemoteAgent {
    name: String,
    client: tokio::sync::Mutex<AgentServiceClient<Channel>>,
}

impl GrpcRemoteAgent {
    pub async fn connect(name: impl Into<String>, url: &str) -> Result<Self, ProtocolError> {
        let channel = Channel::from_shared(url.to_string())
            .map_err(|e| ProtocolError::invalid_message(format!("invalid grpc url '{url}': {e}")))?
            .connect()
            .await
            .map_err(|e| ProtocolError::connection_failed(format!("failed to connect to {url}: {e}")))?;
        Ok(Self {
            name: name.into(),
            client: tokio::sync::Mutex::new(AgentServiceClient::new(channel)),
        })
    }

    fn build_request(message: &Message, method: &str) -> pb::Request {
        pb::Request {
            method: method.to_string(),
            agent_name: String::new(),
            messages: vec![pb::message_to_proto(message)],
            tool_call: None,
            metadata: Default::default(),
        }
    }
}

#[async_trait]
impl Agent for GrpcRemoteAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, message: Message) -> Result<Message, AgentError> {
        let request = Request::new(Self::build_request(&message, "process"));
        let mut client = self.client.lock().await;
        let response = client
            .process(request)
            .await
            .map_err(|status| status_to_protocol_error(&status))?
            .into_inner();
        let message = response
            .message
            .ok_or_else(|| ProtocolError::malformed_payload("grpc response carries no message"))?;
        Ok(pb::proto_to_message(message))
    }

    async fn stream(&self, message: Message) -> MessageStream {
        let request = Request::new(Self::build_request(&message, "stream"));
        let mut client = self.client.lock().await;
        let response = match client.process_stream(request).await {
            Ok(r) => r,
            Err(status) => {
                let error = status_to_protocol_error(&status);
                return Box::pin(futures_util::stream::once(async move { Err(error.into()) }));
            }
        };
        drop(client);

        let inbound = response.into_inner();
        let mapped = inbound.map(|item| match item {
            Ok(chunk) => chunk
                .message
                .map(pb::proto_to_message)
                .ok_or_else(|| ProtocolError::malformed_payload("grpc stream chunk carries no message").into()),
            Err(status) => Err(status_to_protocol_error(&status).into()),
        });
        Box::pin(mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_rejects_an_invalid_url() {
        let err = GrpcRemoteAgent::connect("remote", "not a url").await.unwrap_err();
        assert_eq!(err.code, agent_core::ProtocolErrorCode::InvalidMessage);
    }
}
