//! Accept loops for the byte-stream transports: one task per connection,
//! tracked so `stop()` can cancel them all.

use std::path::Path;
use std::sync::Arc;

use agent_core::{Agent, ProtocolError};
use agent_transport::{TcpTransport, Transport, UnixTransport};
use tokio::net::{TcpListener, UnixListener};
use tokio::task::JoinHandle;
use tracing::info;

use crate::connection;

pub async fn bind_unix(path: &Path) -> Result<UnixListener, ProtocolError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ProtocolError::connection_failed(format!("failed to create {parent:?}: {e}")))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700));
            }
        }
    }
    if path.exists() {
        std::fs::remove_file(path)
            .map_err(|e| ProtocolError::connection_failed(format!("failed to remove stale socket {path:?}: {e}")))?;
    }

    let listener = UnixListener::bind(path)
        .map_err(|e| ProtocolError::connection_failed(format!("failed to bind {path:?}: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }

    Ok(listener)
}

pub fn spawn_unix_accept_loop(
    agent: Arc<dyn Agent>,
    listener: UnixListener,
    path: String,
    connections: Arc<tokio::sync::Mutex<Vec<JoinHandle<()>>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (stream, _addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    info!(error = %e, "unix listener accept failed");
                    continue;
                }
            };
            let transport: Box<dyn Transport> =
                Box::new(UnixTransport::from_accepted(path.clone(), stream));
            let agent = agent.clone();
            let handle = tokio::spawn(connection::serve(agent, transport));
            connections.lock().await.push(handle);
        }
    })
}

pub fn spawn_tcp_accept_loop(
    agent: Arc<dyn Agent>,
    listener: TcpListener,
    connections: Arc<tokio::sync::Mutex<Vec<JoinHandle<()>>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    info!(error = %e, "tcp listener accept failed");
                    continue;
                }
            };
            let transport: Box<dyn Transport> =
                Box::new(TcpTransport::from_accepted(addr.ip().to_string(), addr.port(), stream));
            let agent = agent.clone();
            let handle = tokio::spawn(connection::serve(agent, transport));
            connections.lock().await.push(handle);
        }
    })
}
