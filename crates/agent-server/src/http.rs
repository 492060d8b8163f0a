//! HTTP surface: `GET/HEAD /health`, `POST /process`, `POST /stream` (SSE).

use std::sync::Arc;

use agent_core::{Agent, Envelope};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use futures_util::StreamExt;

use crate::dispatch;

#[derive(Clone)]
struct AppState {
    agent: Arc<dyn Agent>,
}

pub fn build_router(agent: Arc<dyn Agent>) -> Router {
    Router::new()
        .route("/health", get(health).head(health))
        .route("/process", post(process))
        .route("/stream", post(stream))
        .with_state(AppState { agent })
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn process(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match Envelope::decode(&body) {
        Ok(env) => env,
        Err(e) => return envelope_response(StatusCode::BAD_REQUEST, &Envelope::error("unknown", &e)),
    };
    let response = dispatch::handle_unary(state.agent.as_ref(), &request).await;
    envelope_response(StatusCode::OK, &response)
}

fn envelope_response(status: StatusCode, envelope: &Envelope) -> Response {
    let body = serde_json::to_vec(envelope).unwrap_or_default();
    (status, body).into_response()
}

async fn stream(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match Envelope::decode(&body) {
        Ok(env) => env,
        Err(e) => return envelope_response(StatusCode::BAD_REQUEST, &Envelope::error("unknown", &e)),
    };

    let message = match dispatch::start_stream(state.agent.as_ref(), &request) {
        Ok(m) => m,
        Err(err_envelope) => return envelope_response(StatusCode::BAD_REQUEST, &err_envelope),
    };

    let request_id = request.id.clone();
    let mut chunks = state.agent.stream(message).await;
    let mut events = Vec::new();
    let mut ended_with_error = false;
    while let Some(item) = chunks.next().await {
        match item {
            Ok(chunk) => events.push(sse_event(&dispatch::chunk_envelope(request_id.clone(), &chunk))),
            Err(e) => {
                events.push(sse_event(&dispatch::error_envelope(request_id.clone(), &e)));
                ended_with_error = true;
                break;
            }
        }
    }
    if !ended_with_error {
        events.push(sse_event(&dispatch::end_envelope(request_id.clone())));
    }

    Sse::new(futures_util::stream::iter(events))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn sse_event(envelope: &Envelope) -> Result<Event, std::convert::Infallible> {
    Ok(Event::default().data(serde_json::to_string(envelope).unwrap_or_default()))
}
