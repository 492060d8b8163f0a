//! Byte-stream and WebSocket transports underneath the envelope protocol.
//!
//! Every transport here moves opaque bytes; framing, envelope decoding, and
//! retry/backoff policy at the call level live in `agent-client` and
//! `agent-server`. A [`Transport`] only needs to connect, move bytes, and
//! report whether it's still connected.

mod byte_stream;
mod memory;
mod websocket;

pub use byte_stream::{TcpTransport, UnixTransport};
pub use memory::{create_memory_transport_pair, InMemoryTransport};
pub use websocket::{WebSocketTransport, WebSocketTransportConfig};

use async_trait::async_trait;

use agent_core::ProtocolError;

/// Maximum size of a single framed message, mirrored from `agent_core`.
pub const MAX_MESSAGE_SIZE: usize = agent_core::MAX_MESSAGE_SIZE;

/// A bidirectional byte transport to a single peer.
///
/// Implementations are not required to be `Clone`; callers that need to
/// share one connection across tasks wrap it behind a mutex (see
/// `agent-client`'s `RemoteAgent`, which serializes requests on the
/// connection rather than multiplexing).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&mut self) -> Result<(), ProtocolError>;

    /// Send raw bytes with no framing applied.
    async fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Receive up to one unit of the transport's natural chunking (a read
    /// syscall's worth for byte streams, one message for WebSocket).
    async fn receive(&mut self) -> Result<Vec<u8>, ProtocolError>;

    /// Receive exactly `n` bytes, buffering across multiple reads if needed.
    async fn receive_exactly(&mut self, n: usize) -> Result<Vec<u8>, ProtocolError>;

    async fn close(&mut self) -> Result<(), ProtocolError>;

    fn is_connected(&self) -> bool;

    /// Send a 4-byte big-endian length prefix followed by `data`.
    async fn send_framed(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::malformed_payload(format!(
                "message size {} exceeds maximum {MAX_MESSAGE_SIZE}",
                data.len()
            )));
        }
        let len = u32::try_from(data.len())
            .map_err(|_| ProtocolError::malformed_payload("message too large to frame"))?;
        let mut framed = Vec::with_capacity(4 + data.len());
        framed.extend_from_slice(&len.to_be_bytes());
        framed.extend_from_slice(data);
        self.send(&framed).await
    }

    /// Receive a 4-byte big-endian length prefix followed by that many bytes.
    async fn receive_framed(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len_bytes = self.receive_exactly(4).await?;
        let len = u32::from_be_bytes(len_bytes.try_into().expect("receive_exactly(4) returns 4 bytes")) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::malformed_payload(format!(
                "message size {len} exceeds maximum {MAX_MESSAGE_SIZE}"
            )));
        }
        self.receive_exactly(len).await
    }
}
