//! Server-side `AgentService` implementation bridging to a local `Agent`.

use std::pin::Pin;
use std::sync::Arc;

use agent_core::Agent;
use futures_util::{Stream, StreamExt};
use tonic::{Request, Response, Status};

use crate::pb;
use crate::pb::agent_service_server::{AgentService, AgentServiceServer};
use crate::status::protocol_error_to_status;

pub struct GrpcService {
    agent: Arc<dyn Agent>,
}

impl GrpcService {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self { agent }
    }

    pub fn into_server(self) -> AgentServiceServer<Self> {
        AgentServiceServer::new(self)
    }

    fn decode_message(request: &pb::Request) -> Result<agent_core::Message, Status> {
        request
            .messages
            .first()
            .cloned()
            .map(pb::proto_to_message)
            .ok_or_else(|| Status::invalid_argument("request carries no message"))
    }
}

#[tonic::async_trait]
impl AgentService for GrpcService {
    async fn process(&self, request: Request<pb::Request>) -> Result<Response<pb::Response>, Status> {
        let message = Self::decode_message(request.get_ref())?;
        match self.agent.process(message).await {
            Ok(response) => Ok(Response::new(pb::Response {
                message: Some(pb::message_to_proto(&response)),
                tool_result: None,
            })),
            Err(e) => Err(to_status(&e)),
        }
    }

    type ProcessStreamStream = Pin<Box<dyn Stream<Item = Result<pb::StreamChunk, Status>> + Send + 'static>>;

    async fn process_stream(
        &self,
        request: Request<pb::Request>,
    ) -> Result<Response<Self::ProcessStreamStream>, Status> {
        let message = Self::decode_message(request.get_ref())?;
        let chunks = self.agent.stream(message).await;
        let mapped = chunks.map(|item| {
            item.map(|message: agent_core::Message| pb::StreamChunk {
                message: Some(pb::message_to_proto(&message)),
            })
            .map_err(|e| to_status(&e))
        });
        Ok(Response::new(Box::pin(mapped)))
    }
}

fn to_status(error: &agent_core::AgentError) -> Status {
    match error {
        agent_core::AgentError::Protocol(e) => protocol_error_to_status(e),
        agent_core::AgentError::RemoteExecution(e) => Status::internal(e.original_error.clone()),
    }
}
