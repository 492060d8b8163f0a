//! WebSocket server side: one binary message per envelope, same dispatch
//! logic as the byte-stream listeners, max message size 10 MiB.

use std::sync::Arc;

use agent_core::{Agent, Envelope};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;

use crate::dispatch;

const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    agent: Arc<dyn Agent>,
}

pub fn build_router(agent: Arc<dyn Agent>) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .with_state(AppState { agent })
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| serve(socket, state.agent))
}

async fn serve(mut socket: WebSocket, agent: Arc<dyn Agent>) {
    while let Some(next) = socket.recv().await {
        let Ok(WsMessage::Binary(data)) = next else {
            continue;
        };

        let request = match Envelope::decode(&data) {
            Ok(env) => env,
            Err(e) => {
                if send(&mut socket, &Envelope::error("unknown", &e)).await.is_err() {
                    return;
                }
                continue;
            }
        };

        if dispatch::is_stream_request(&request) {
            let message = match dispatch::start_stream(agent.as_ref(), &request) {
                Ok(m) => m,
                Err(err_envelope) => {
                    if send(&mut socket, &err_envelope).await.is_err() {
                        return;
                    }
                    continue;
                }
            };

            let mut chunks = agent.stream(message).await;
            let mut ended_with_error = false;
            while let Some(item) = chunks.next().await {
                match item {
                    Ok(chunk) => {
                        let envelope = dispatch::chunk_envelope(request.id.clone(), &chunk);
                        if send(&mut socket, &envelope).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let envelope = dispatch::error_envelope(request.id.clone(), &e);
                        let _ = send(&mut socket, &envelope).await;
                        ended_with_error = true;
                        break;
                    }
                }
            }
            if !ended_with_error {
                let end = dispatch::end_envelope(request.id.clone());
                if send(&mut socket, &end).await.is_err() {
                    return;
                }
            }
        } else {
            let response = dispatch::handle_unary(agent.as_ref(), &request).await;
            if send(&mut socket, &response).await.is_err() {
                return;
            }
        }
    }
}

async fn send(socket: &mut WebSocket, envelope: &Envelope) -> Result<(), axum::Error> {
    let Ok(bytes) = envelope.encode() else {
        return Ok(());
    };
    socket.send(WsMessage::Binary(bytes.into())).await
}
