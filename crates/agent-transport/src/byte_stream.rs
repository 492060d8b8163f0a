//! Unix domain socket and TCP transports: plain byte streams read in up-to
//! 64 KiB chunks, framed by the caller via `send_framed`/`receive_framed`.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

use agent_core::ProtocolError;

use crate::Transport;

const READ_CHUNK: usize = 65536;

/// Unix domain socket transport, used for same-host agent-to-agent calls.
pub struct UnixTransport {
    path: String,
    stream: Option<UnixStream>,
}

impl UnixTransport {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stream: None,
        }
    }

    /// Wraps a stream a server listener has already accepted.
    pub fn from_accepted(path: impl Into<String>, stream: UnixStream) -> Self {
        Self {
            path: path.into(),
            stream: Some(stream),
        }
    }
}

#[async_trait]
impl Transport for UnixTransport {
    async fn connect(&mut self) -> Result<(), ProtocolError> {
        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(|e| ProtocolError::connection_failed(format!("failed to connect to {}: {e}", self.path)))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ProtocolError::connection_failed("not connected"))?;
        stream
            .write_all(data)
            .await
            .map_err(|e| ProtocolError::connection_failed(format!("failed to send data: {e}")))
    }

    async fn receive(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ProtocolError::connection_failed("not connected"))?;
        let mut buf = vec![0u8; READ_CHUNK];
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| ProtocolError::connection_failed(format!("failed to receive data: {e}")))?;
        if n == 0 {
            return Err(ProtocolError::connection_closed("connection closed by peer"));
        }
        buf.truncate(n);
        Ok(buf)
    }

    async fn receive_exactly(&mut self, n: usize) -> Result<Vec<u8>, ProtocolError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ProtocolError::connection_failed("not connected"))?;
        let mut buf = vec![0u8; n];
        stream.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::connection_closed(format!(
                    "connection closed while expecting {n} bytes"
                ))
            } else {
                ProtocolError::connection_failed(format!("failed to receive data: {e}"))
            }
        })?;
        Ok(buf)
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// TCP socket transport.
pub struct TcpTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
        }
    }

    /// Wraps a stream a server listener has already accepted.
    pub fn from_accepted(host: impl Into<String>, port: u16, stream: TcpStream) -> Self {
        Self {
            host: host.into(),
            port,
            stream: Some(stream),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<(), ProtocolError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                ProtocolError::connection_failed(format!(
                    "failed to connect to {}:{}: {e}",
                    self.host, self.port
                ))
            })?;
        let _ = stream.set_nodelay(true);
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ProtocolError::connection_failed("not connected"))?;
        stream
            .write_all(data)
            .await
            .map_err(|e| ProtocolError::connection_failed(format!("failed to send data: {e}")))
    }

    async fn receive(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ProtocolError::connection_failed("not connected"))?;
        let mut buf = vec![0u8; READ_CHUNK];
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| ProtocolError::connection_failed(format!("failed to receive data: {e}")))?;
        if n == 0 {
            return Err(ProtocolError::connection_closed("connection closed by peer"));
        }
        buf.truncate(n);
        Ok(buf)
    }

    async fn receive_exactly(&mut self, n: usize) -> Result<Vec<u8>, ProtocolError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ProtocolError::connection_failed("not connected"))?;
        let mut buf = vec![0u8; n];
        stream.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::connection_closed(format!(
                    "connection closed while expecting {n} bytes"
                ))
            } else {
                ProtocolError::connection_failed(format!("failed to receive data: {e}"))
            }
        })?;
        Ok(buf)
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, UnixListener};

    #[tokio::test]
    async fn tcp_transport_round_trips_framed_data() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 9];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut client = TcpTransport::new(addr.ip().to_string(), addr.port());
        client.connect().await.unwrap();
        client.send_framed(b"hi there").await.unwrap();
        let echoed = client.receive_framed().await.unwrap();
        assert_eq!(echoed, b"hi there");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn unix_transport_detects_closed_peer() {
        let dir = tempfile_dir();
        let path = dir.join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut client = UnixTransport::new(path.to_str().unwrap());
        client.connect().await.unwrap();
        server.await.unwrap();

        let err = client.receive().await.unwrap_err();
        assert_eq!(err.code, agent_core::ProtocolErrorCode::ConnectionClosed);
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("agent-transport-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
