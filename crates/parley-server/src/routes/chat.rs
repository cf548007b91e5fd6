use crate::state::AppState;
use axum::{
    extract::State,
    http::{self, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::Stream;
use parley::{ChatCall, GatewayError, Message, StreamFrame};
use serde::Deserialize;
use serde_json::json;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

// Incoming JSON. `message` is accepted as an alias for `text`, and a
// pre-built `messages` list bypasses history assembly entirely.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SendRequest {
    to: Option<String>,
    text: Option<String>,
    message: Option<String>,
    stream: bool,
    messages: Option<Vec<Message>>,
}

impl SendRequest {
    fn into_call(self) -> ChatCall {
        ChatCall {
            to: self.to,
            text: self.text.or(self.message).unwrap_or_default(),
            messages: self.messages,
        }
    }
}

pub(crate) fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::UnknownAgent(_) | GatewayError::EmptyInput => StatusCode::BAD_REQUEST,
        GatewayError::BackendUnreachable(_) | GatewayError::BackendTimeout(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Serializes stream frames into the wire protocol: one `data:` line per
/// fragment, then a terminal line with `done: true`.
struct ProtocolFormatter;

impl ProtocolFormatter {
    fn format_delta(fragment: &str) -> String {
        let frame = json!({ "data": fragment, "done": false });
        format!("data: {}\n\n", frame)
    }

    fn format_done() -> String {
        format!("data: {}\n\n", json!({ "done": true }))
    }

    fn format_error(message: &str) -> String {
        // Errors after the stream opened ride inside the stream; the HTTP
        // status is already committed.
        let frame = json!({ "error": message, "done": true });
        format!("data: {}\n\n", frame)
    }
}

// Custom SSE response over the gateway's frame channel.
pub struct SseResponse {
    rx: ReceiverStream<StreamFrame>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<StreamFrame>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx).map(|opt| {
            opt.map(|frame| {
                let line = match frame {
                    StreamFrame::Delta(fragment) => ProtocolFormatter::format_delta(&fragment),
                    StreamFrame::Done => ProtocolFormatter::format_done(),
                    StreamFrame::Failed(message) => ProtocolFormatter::format_error(&message),
                };
                Ok(Bytes::from(line))
            })
        })
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        http::Response::builder()
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .header("X-Accel-Buffering", "no")
            .body(body)
            .unwrap()
    }
}

fn error_body(err: &GatewayError) -> Json<serde_json::Value> {
    Json(json!({ "error": err.to_string() }))
}

async fn send_handler(
    State(state): State<AppState>,
    Json(request): Json<SendRequest>,
) -> axum::response::Response {
    let stream_mode = request.stream;
    let call = request.into_call();

    // Resolution and assembly failures happen before any bytes go out, so
    // they can still carry a proper status code in both modes.
    let prepared = match state.gateway.prepare(call).await {
        Ok(prepared) => prepared,
        Err(err) => return (status_for(&err), error_body(&err)).into_response(),
    };

    if stream_mode {
        let (tx, rx) = mpsc::channel::<StreamFrame>(32);
        let gateway = state.gateway.clone();
        tokio::spawn(async move {
            gateway.stream_exchange(prepared, tx).await;
        });
        SseResponse::new(ReceiverStream::new(rx)).into_response()
    } else {
        let from = prepared.agent().name.clone();
        match state.gateway.collect(prepared).await {
            Ok(reply) => Json(json!({ "from": reply.from, "text": reply.text })).into_response(),
            Err(err) => {
                let body = Json(json!({ "from": from, "error": err.to_string() }));
                (status_for(&err), body).into_response()
            }
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/send", post(send_handler))
        .with_state(state)
}
