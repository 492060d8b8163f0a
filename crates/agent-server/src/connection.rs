//! Per-connection serving loop shared by the Unix and TCP listeners.
//!
//! One task per accepted connection: decode a framed envelope, dispatch
//! unary or streaming, write the reply, repeat until the peer closes or an
//! idle timeout fires. A stuck frame only kills this connection, never the
//! listener.

use std::sync::Arc;
use std::time::Duration;

use agent_core::{Agent, Envelope};
use agent_transport::Transport;
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::dispatch;

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn serve(agent: Arc<dyn Agent>, mut transport: Box<dyn Transport>) {
    loop {
        let frame = match tokio::time::timeout(IDLE_TIMEOUT, transport.receive_framed()).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                debug!(agent = agent.name(), error = %e, "connection closed");
                break;
            }
            Err(_) => {
                debug!(agent = agent.name(), "idle connection timed out");
                break;
            }
        };

        let request = match Envelope::decode(&frame) {
            Ok(env) => env,
            Err(e) => {
                let reply = Envelope::error("unknown", &e);
                let _ = write(&mut transport, &reply).await;
                continue;
            }
        };

        if dispatch::is_stream_request(&request) {
            if serve_stream(agent.as_ref(), &mut transport, &request).await.is_err() {
                break;
            }
        } else {
            let response = dispatch::handle_unary(agent.as_ref(), &request).await;
            if write(&mut transport, &response).await.is_err() {
                break;
            }
        }
    }

    let _ = transport.close().await;
}

async fn serve_stream(
    agent: &dyn Agent,
    transport: &mut Box<dyn Transport>,
    request: &Envelope,
) -> Result<(), ()> {
    let message = match dispatch::start_stream(agent, request) {
        Ok(m) => m,
        Err(error_envelope) => return write(transport, &error_envelope).await,
    };

    let mut stream = agent.stream(message).await;
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                let envelope = dispatch::chunk_envelope(request.id.clone(), &chunk);
                write(transport, &envelope).await?;
            }
            Err(e) => {
                let envelope = dispatch::error_envelope(request.id.clone(), &e);
                write(transport, &envelope).await?;
                return Ok(());
            }
        }
    }

    let end = dispatch::end_envelope(request.id.clone());
    write(transport, &end).await
}

async fn write(transport: &mut Box<dyn Transport>, envelope: &Envelope) -> Result<(), ()> {
    let Ok(bytes) = envelope.encode() else {
        warn!("failed to encode outgoing envelope");
        return Err(());
    };
    transport.send_framed(&bytes).await.map_err(|_| ())
}
