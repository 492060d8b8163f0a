//! WebSocket transport with automatic reconnection and ping/pong keepalive.
//!
//! Uses binary frames for envelope bytes. WebSocket already frames messages
//! at the transport layer, so `send_framed`/`receive_framed` are overridden
//! to skip the 4-byte length prefix used by the raw byte-stream transports.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::time::{sleep, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use agent_core::ProtocolError;

use crate::{Transport, MAX_MESSAGE_SIZE};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone)]
pub struct WebSocketTransportConfig {
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
}

impl Default for WebSocketTransportConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_retry_delay: Duration::from_secs(1),
        }
    }
}

pub struct WebSocketTransport {
    url: String,
    config: WebSocketTransportConfig,
    ws: Option<WsStream>,
    receive_buffer: Vec<u8>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, config: WebSocketTransportConfig) -> Self {
        Self {
            url: url.into(),
            config,
            ws: None,
            receive_buffer: Vec::new(),
        }
    }

    async fn connect_with_retry(&mut self) -> Result<(), ProtocolError> {
        let mut last_error = None;
        let mut retry_delay = self.config.initial_retry_delay;

        for attempt in 0..self.config.max_retries {
            let request = self
                .url
                .as_str()
                .into_client_request()
                .map_err(|e| ProtocolError::connection_failed(format!("invalid URL '{}': {e}", self.url)))?;

            match connect_async(request).await {
                Ok((stream, _response)) => {
                    self.ws = Some(stream);
                    self.receive_buffer.clear();
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    if attempt + 1 < self.config.max_retries {
                        sleep(retry_delay).await;
                        retry_delay *= 2;
                    }
                }
            }
        }

        Err(ProtocolError::connection_failed(format!(
            "failed to connect to {} after {} attempts: {}",
            self.url,
            self.config.max_retries,
            last_error.unwrap_or_default()
        )))
    }

    async fn ensure_connected(&mut self) -> Result<(), ProtocolError> {
        if self.ws.is_none() {
            self.connect_with_retry().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&mut self) -> Result<(), ProtocolError> {
        self.connect_with_retry().await
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.ensure_connected().await?;
        let ws = self.ws.as_mut().expect("ensure_connected populates ws");
        match ws.send(WsMessage::Binary(data.to_vec().into())).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.ws = None;
                Err(ProtocolError::connection_closed(format!(
                    "connection closed during send: {e}"
                )))
            }
        }
    }

    async fn receive(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.ensure_connected().await?;
        loop {
            let ws = self.ws.as_mut().expect("ensure_connected populates ws");
            match ws.next().await {
                Some(Ok(WsMessage::Binary(data))) => return Ok(data.to_vec()),
                Some(Ok(WsMessage::Text(text))) => return Ok(text.as_bytes().to_vec()),
                Some(Ok(WsMessage::Ping(payload))) => {
                    let _ = ws.send(WsMessage::Pong(payload)).await;
                    continue;
                }
                Some(Ok(WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Close(_))) | None => {
                    self.ws = None;
                    return Err(ProtocolError::connection_closed(
                        "connection closed during receive",
                    ));
                }
                Some(Ok(WsMessage::Frame(_))) => continue,
                Some(Err(e)) => {
                    self.ws = None;
                    return Err(ProtocolError::connection_failed(format!(
                        "failed to receive data: {e}"
                    )));
                }
            }
        }
    }

    /// WebSocket has no intrinsic byte-addressable read; buffer whole
    /// messages until at least `n` bytes have accumulated.
    async fn receive_exactly(&mut self, n: usize) -> Result<Vec<u8>, ProtocolError> {
        while self.receive_buffer.len() < n {
            match self.receive().await {
                Ok(chunk) => self.receive_buffer.extend_from_slice(&chunk),
                Err(e) if e.code == agent_core::ProtocolErrorCode::ConnectionClosed => {
                    if !self.receive_buffer.is_empty() {
                        return Err(ProtocolError::connection_closed(format!(
                            "connection closed while expecting {} more bytes",
                            n - self.receive_buffer.len()
                        )));
                    }
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
        let remainder = self.receive_buffer.split_off(n);
        Ok(std::mem::replace(&mut self.receive_buffer, remainder))
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if let Some(mut ws) = self.ws.take() {
            let _ = ws.close(None).await;
        }
        self.receive_buffer.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.ws.is_some()
    }

    async fn send_framed(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::malformed_payload(format!(
                "message size {} exceeds maximum {MAX_MESSAGE_SIZE}",
                data.len()
            )));
        }
        self.send(data).await
    }

    async fn receive_framed(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let data = self.receive().await?;
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::malformed_payload(format!(
                "message size {} exceeds maximum {MAX_MESSAGE_SIZE}",
                data.len()
            )));
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_retries_five_times_with_one_second_backoff() {
        let config = WebSocketTransportConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.initial_retry_delay, Duration::from_secs(1));
    }
}
