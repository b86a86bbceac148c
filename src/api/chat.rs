use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::auth::authenticate;
use crate::error::{into_axum_response, GatewayError};
use crate::orchestrate::{run_session, select_flow, FlowKind, FrameSink};
use crate::protocol::encoder::encode_completion_body;
use crate::protocol::openai::ChatCompletionRequest;
use crate::state::AppState;

const STREAM_CHANNEL_CAPACITY: usize = 32;

/// `POST /v1/chat/completions` handler.
///
/// Authenticates, parses and validates the body, routes the model id to a
/// flow, then runs the session in streaming or aggregate mode.
#[must_use]
pub async fn handler(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(err) = authenticate(&headers, &state.allowed_keys) {
        return into_axum_response(&err);
    }

    let request: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return into_axum_response(&GatewayError::InvalidRequest(format!(
                "Malformed JSON body: {err}"
            )));
        }
    };
    if let Err(err) = request.validate() {
        return into_axum_response(&err);
    }

    let Some(flow) = select_flow(&state, &request.model) else {
        return into_axum_response(&GatewayError::InvalidRequest(format!(
            "Unknown model '{}'",
            request.model
        )));
    };

    if request.stream {
        stream_response(state, request, flow)
    } else {
        aggregate_response(&state, &request, flow).await
    }
}

/// Streaming mode: headers go out immediately, the session runs in a spawned
/// task feeding the response body. Failures after that point surface as a
/// named SSE error event.
fn stream_response(state: Arc<AppState>, request: ChatCompletionRequest, flow: FlowKind) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAPACITY);
    let model = request.model.clone();
    let span = tracing::info_span!("chat_stream", request_id = %uuid::Uuid::new_v4());

    tokio::spawn(
        async move {
            let mut sink = FrameSink::streaming(tx, model);
            if let Err(err) = run_session(&state, &request, flow, &mut sink).await {
                tracing::error!(error = %err, "streaming session failed");
                sink.send_error(&err).await;
            }
        }
        .instrument(span),
    );

    let frames = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|bytes| (Ok::<_, Infallible>(bytes), rx))
    });
    sse_ok_response(Body::from_stream(frames))
}

async fn aggregate_response(
    state: &Arc<AppState>,
    request: &ChatCompletionRequest,
    flow: FlowKind,
) -> Response {
    let mut sink = FrameSink::Aggregate;
    match run_session(state, request, flow, &mut sink).await {
        Ok(composer) => {
            let thinking = composer.thinking_emitted().then(|| composer.thinking_text());
            let body = encode_completion_body(
                composer.id(),
                &request.model,
                composer.created_at(),
                thinking,
                composer.answer_text(),
                request.prompt_chars(),
            );
            Json(body).into_response()
        }
        Err(err) => into_axum_response(&err),
    }
}

fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
