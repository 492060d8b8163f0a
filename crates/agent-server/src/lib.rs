//! Binds one agent to one endpoint and serves requests until `stop()`.
//!
//! Endpoint scheme picks the listener: Unix and TCP get a raw accept loop
//! over `agent-transport`'s framed byte streams, WebSocket and HTTP get an
//! axum server, gRPC is served by `agent-grpc` instead (this crate rejects
//! it with a pointer there, mirroring `agent-client`'s proxy).

mod connection;
mod dispatch;
mod http;
mod listener;
mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use agent_core::{Agent, Endpoint, ProtocolError};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

pub use dispatch::{error_envelope, handle_unary};

/// Dispatcher binding one agent to one endpoint.
pub struct LocalAgent {
    agent: Arc<dyn Agent>,
    endpoint: Endpoint,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
    unix_path: Mutex<Option<std::path::PathBuf>>,
}

impl LocalAgent {
    pub fn new(agent: Arc<dyn Agent>, endpoint: Endpoint) -> Self {
        Self {
            agent,
            endpoint,
            accept_task: Mutex::new(None),
            connections: Arc::new(Mutex::new(Vec::new())),
            unix_path: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<(), ProtocolError> {
        match &self.endpoint {
            Endpoint::Unix { path } => {
                let listener = listener::bind_unix(path).await?;
                *self.unix_path.lock().await = Some(path.clone());
                let task = listener::spawn_unix_accept_loop(
                    self.agent.clone(),
                    listener,
                    path.to_string_lossy().to_string(),
                    self.connections.clone(),
                );
                *self.accept_task.lock().await = Some(task);
                info!(agent = self.agent.name(), path = %path.display(), "listening on unix socket");
                Ok(())
            }
            Endpoint::Tcp { host, port } => {
                let addr: SocketAddr = format!("{host}:{port}")
                    .parse()
                    .map_err(|e| ProtocolError::connection_failed(format!("invalid tcp address: {e}")))?;
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|e| ProtocolError::connection_failed(format!("failed to bind {addr}: {e}")))?;
                let task = listener::spawn_tcp_accept_loop(self.agent.clone(), listener, self.connections.clone());
                *self.accept_task.lock().await = Some(task);
                info!(agent = self.agent.name(), %addr, "listening on tcp");
                Ok(())
            }
            Endpoint::WebSocket { url, .. } => {
                let addr = host_port_from_url(url)?;
                let router = websocket::build_router(self.agent.clone());
                let task = spawn_axum(addr, router);
                *self.accept_task.lock().await = Some(task);
                info!(agent = self.agent.name(), %addr, "listening for websocket connections");
                Ok(())
            }
            Endpoint::Http { url, .. } => {
                let addr = host_port_from_url(url)?;
                let router = http::build_router(self.agent.clone());
                let task = spawn_axum(addr, router);
                *self.accept_task.lock().await = Some(task);
                info!(agent = self.agent.name(), %addr, "listening for http connections");
                Ok(())
            }
            Endpoint::Grpc { .. } => Err(ProtocolError::invalid_message(
                "grpc:// endpoints are served by agent-grpc's GrpcServer, not LocalAgent",
            )),
        }
    }

    pub async fn stop(&self) {
        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
        let mut connections = self.connections.lock().await;
        for task in connections.drain(..) {
            task.abort();
            let _ = task.await;
        }
        if let Some(path) = self.unix_path.lock().await.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn spawn_axum(addr: SocketAddr, router: axum::Router) -> JoinHandle<()> {
    tokio::spawn(async move {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, router).await {
                    tracing::warn!(error = %e, "axum server exited");
                }
            }
            Err(e) => tracing::warn!(%addr, error = %e, "failed to bind"),
        }
    })
}

fn host_port_from_url(url: &str) -> Result<SocketAddr, ProtocolError> {
    let without_scheme = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    authority
        .parse()
        .map_err(|e| ProtocolError::invalid_message(format!("endpoint '{url}' has no host:port: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{AgentError, Message};
    use async_trait::async_trait;
    use serde_json::json;

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

    #[test]
    fn host_port_from_url_strips_scheme_and_path() {
        let addr = host_port_from_url("http://127.0.0.1:8080/ignored").unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn serves_http_process_requests() {
        let local = LocalAgent::new(
            Arc::new(EchoAgent),
            Endpoint::Http {
                url: "http://127.0.0.1:38813".to_string(),
                secure: false,
            },
        );
        local.start().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let client = reqwest::Client::new();
        let request = agent_core::Envelope::request(
            "process",
            Some("echo"),
            json!({ "message": Message::new("user", json!("hi")) }),
        );
        let response = client
            .post("http://127.0.0.1:38813/process")
            .body(serde_json::to_vec(&request).unwrap())
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());

        local.stop().await;
    }
}
