//! In-memory transport pair, used to exercise server/client dispatch logic
//! in tests without binding a real socket.

use async_trait::async_trait;
use tokio::sync::mpsc;

use agent_core::ProtocolError;

use crate::Transport;

pub struct InMemoryTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    connected: bool,
    receive_buffer: Vec<u8>,
}

impl InMemoryTransport {
    fn new(tx: mpsc::UnboundedSender<Vec<u8>>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            tx,
            rx,
            connected: false,
            receive_buffer: Vec::new(),
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&mut self) -> Result<(), ProtocolError> {
        self.connected = true;
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if !self.connected {
            return Err(ProtocolError::connection_failed("not connected"));
        }
        self.tx
            .send(data.to_vec())
            .map_err(|_| ProtocolError::connection_closed("peer dropped"))
    }

    async fn receive(&mut self) -> Result<Vec<u8>, ProtocolError> {
        if !self.connected {
            return Err(ProtocolError::connection_failed("not connected"));
        }
        self.rx
            .recv()
            .await
            .ok_or_else(|| ProtocolError::connection_closed("peer dropped"))
    }

    async fn receive_exactly(&mut self, n: usize) -> Result<Vec<u8>, ProtocolError> {
        if !self.connected {
            return Err(ProtocolError::connection_failed("not connected"));
        }
        while self.receive_buffer.len() < n {
            let chunk = self
                .rx
                .recv()
                .await
                .ok_or_else(|| ProtocolError::connection_closed("peer dropped"))?;
            self.receive_buffer.extend_from_slice(&chunk);
        }
        let remainder = self.receive_buffer.split_off(n);
        let result = std::mem::replace(&mut self.receive_buffer, remainder);
        Ok(result)
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Builds a connected pair of in-memory transports, one for each side of a
/// simulated connection.
pub fn create_memory_transport_pair() -> (InMemoryTransport, InMemoryTransport) {
    let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel();
    let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel();
    let a = InMemoryTransport::new(a_to_b_tx, b_to_a_rx);
    let b = InMemoryTransport::new(b_to_a_tx, a_to_b_rx);
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn framed_round_trips_across_the_pair() {
        let (mut a, mut b) = create_memory_transport_pair();
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        a.send_framed(b"hello").await.unwrap();
        let received = b.receive_framed().await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn receive_exactly_buffers_across_multiple_sends() {
        let (mut a, mut b) = create_memory_transport_pair();
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        a.send(b"ab").await.unwrap();
        a.send(b"cdef").await.unwrap();
        let chunk = b.receive_exactly(5).await.unwrap();
        assert_eq!(chunk, b"abcde");
        let rest = b.receive_exactly(1).await.unwrap();
        assert_eq!(rest, b"f");
    }
}
