//! Session orchestration: drives upstream streams through the decoder,
//! classifier, and composer, and delivers the resulting chunks.
//!
//! One request becomes one session. The hybrid flow chains the reasoning
//! upstream into the answering upstream inside a single session; the direct
//! flows pump a single upstream. All flows share the finalization step in
//! [`run_session`].

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::protocol::encoder::{encode_chunk_frame, encode_error_frame, DONE_FRAME};
use crate::protocol::openai::{ChatCompletionRequest, ChatMessage};
use crate::state::AppState;
use crate::stream::composer::{ComposedChunks, THINKING_CLOSE_MARKER, THINKING_OPEN_MARKER};
use crate::stream::{
    AnsweringClassifier, EventClassifier, LineDecoder, Phase, PhaseComposer, ReasoningClassifier,
    UpstreamEvent,
};
use crate::transport::classify_transport_error;
use crate::transport::retry_policy::should_retry_bootstrap;
use crate::util::unix_now_secs;

/// Pause between the reasoning and answering stages of a hybrid session.
pub const STAGE_PAUSE: Duration = Duration::from_millis(500);

/// Prefix emitted as the first answer delta when the reasoning stage is
/// skipped and the session degrades to a direct answer.
pub const FALLBACK_NOTICE: &str = "[reasoning unavailable, answering directly]\n\n";

/// Which pipeline a request's model id selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Reasoning stage first, then the answering provider seeded with the
    /// collected reasoning trace.
    Hybrid,
    /// Reasoning provider only, thinking and answer from one stream.
    DirectReasoning,
    /// Answering provider only, plain proxy.
    DirectAnswering,
}

/// Map a client-facing model id to its flow. `None` means the model is not
/// served here.
#[must_use]
pub fn select_flow(state: &AppState, model: &str) -> Option<FlowKind> {
    if model == state.config.hybrid_model {
        Some(FlowKind::Hybrid)
    } else if model == state.config.reasoning.exposed_model() {
        Some(FlowKind::DirectReasoning)
    } else if model == state.config.answering.exposed_model() {
        Some(FlowKind::DirectAnswering)
    } else {
        None
    }
}

/// Delivery side of a session.
///
/// Streaming sessions encode each chunk as an SSE frame and push it over the
/// channel feeding the response body; a closed channel means the client went
/// away and the session is abandoned. Aggregate sessions deliver nothing here,
/// the caller reads the composer accumulators afterwards.
pub enum FrameSink {
    Streaming {
        tx: mpsc::Sender<Bytes>,
        model: String,
        client_gone: bool,
    },
    Aggregate,
}

impl FrameSink {
    #[must_use]
    pub fn streaming(tx: mpsc::Sender<Bytes>, model: String) -> Self {
        Self::Streaming {
            tx,
            model,
            client_gone: false,
        }
    }

    /// Whether chunks are delivered live to a client.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    /// Whether delivery is still possible.
    #[must_use]
    pub fn is_open(&self) -> bool {
        match self {
            Self::Streaming { client_gone, .. } => !client_gone,
            Self::Aggregate => true,
        }
    }

    async fn deliver(&mut self, composer: &PhaseComposer, chunks: ComposedChunks) {
        let Self::Streaming {
            tx,
            model,
            client_gone,
        } = self
        else {
            return;
        };
        if *client_gone {
            return;
        }
        for chunk in &chunks {
            let frame = encode_chunk_frame(chunk, composer.id(), model, composer.created_at());
            if tx.send(Bytes::from(frame)).await.is_err() {
                tracing::debug!(id = composer.id(), "client disconnected, abandoning session");
                *client_gone = true;
                return;
            }
        }
    }

    async fn deliver_done(&mut self) {
        if let Self::Streaming {
            tx, client_gone, ..
        } = self
        {
            if !*client_gone && tx.send(Bytes::from_static(DONE_FRAME.as_bytes())).await.is_err() {
                *client_gone = true;
            }
        }
    }

    /// Report a mid-stream failure as a named SSE error event.
    pub async fn send_error(&mut self, err: &GatewayError) {
        if let Self::Streaming {
            tx, client_gone, ..
        } = self
        {
            if !*client_gone {
                let frame = encode_error_frame(&err.to_string());
                let _ = tx.send(Bytes::from(frame)).await;
                *client_gone = true;
            }
        }
    }
}

/// Run one chat-completion session to completion.
///
/// Returns the finalized composer so aggregate callers can read the
/// accumulated thinking and answer text. A client disconnect is not an
/// error: the session just stops early.
///
/// # Errors
///
/// Propagates upstream failures that occur after the session can no longer
/// degrade to a fallback.
pub async fn run_session(
    state: &AppState,
    request: &ChatCompletionRequest,
    flow: FlowKind,
    sink: &mut FrameSink,
) -> Result<PhaseComposer, GatewayError> {
    let mut composer = PhaseComposer::new(state.next_completion_id(), unix_now_secs());
    tracing::info!(id = composer.id(), model = %request.model, flow = ?flow, "session started");

    match flow {
        FlowKind::Hybrid => hybrid_flow(state, request, &mut composer, sink).await?,
        FlowKind::DirectReasoning => direct_reasoning_flow(state, request, &mut composer, sink).await?,
        FlowKind::DirectAnswering => {
            answering_stage(state, request, &request.messages, &mut composer, sink).await?;
        }
    }

    let terminal = composer.finish();
    sink.deliver(&composer, terminal).await;
    sink.deliver_done().await;
    tracing::info!(
        id = composer.id(),
        thinking_chars = composer.thinking_text().chars().count(),
        answer_chars = composer.answer_text().chars().count(),
        "session finished"
    );
    Ok(composer)
}

async fn hybrid_flow(
    state: &AppState,
    request: &ChatCompletionRequest,
    composer: &mut PhaseComposer,
    sink: &mut FrameSink,
) -> Result<(), GatewayError> {
    match reasoning_stage(state, request, composer, sink).await {
        Ok(()) => {}
        // Degrade only while nothing has been emitted; a failure after
        // thinking output started is fatal for the session.
        Err(err) if composer.phase() == Phase::Idle && sink.is_open() => {
            tracing::warn!(id = composer.id(), error = %err, "falling back to direct answer");
            return fallback_stage(state, request, composer, sink).await;
        }
        Err(err) => return Err(err),
    }
    if !sink.is_open() {
        return Ok(());
    }

    let close = composer.close_reasoning_stage();
    sink.deliver(composer, close).await;
    if !sink.is_open() {
        return Ok(());
    }

    // Aggregate callers see no frames until the end; there is no phase
    // boundary to pace for them.
    if sink.is_streaming() {
        tokio::time::sleep(STAGE_PAUSE).await;
    }

    let seeded = seeded_messages(&request.messages, composer.thinking_text());
    answering_stage(state, request, &seeded, composer, sink).await
}

/// Hybrid stage 1: bootstrap, then stream the reasoning trace.
async fn reasoning_stage(
    state: &AppState,
    request: &ChatCompletionRequest,
    composer: &mut PhaseComposer,
    sink: &mut FrameSink,
) -> Result<(), GatewayError> {
    let handle = bootstrap_with_retry(state).await?;
    let response = state
        .reasoning
        .stream_request(&state.transport, &handle, request.last_user_content())
        .await?;
    pump(response, &ThinkingOnly(&ReasoningClassifier), composer, sink).await?;
    if sink.is_open() && composer.thinking_text().is_empty() {
        return Err(GatewayError::EmptyReasoningResult);
    }
    Ok(())
}

async fn direct_reasoning_flow(
    state: &AppState,
    request: &ChatCompletionRequest,
    composer: &mut PhaseComposer,
    sink: &mut FrameSink,
) -> Result<(), GatewayError> {
    let handle = bootstrap_with_retry(state).await?;
    let response = state
        .reasoning
        .stream_request(&state.transport, &handle, request.last_user_content())
        .await?;
    pump(response, &ReasoningClassifier, composer, sink).await
}

/// Direct answer with the degradation notice as the first content delta.
async fn fallback_stage(
    state: &AppState,
    request: &ChatCompletionRequest,
    composer: &mut PhaseComposer,
    sink: &mut FrameSink,
) -> Result<(), GatewayError> {
    let notice = composer.on_event(UpstreamEvent::Answer(FALLBACK_NOTICE.to_string()));
    sink.deliver(composer, notice).await;
    if !sink.is_open() {
        return Ok(());
    }
    answering_stage(state, request, &request.messages, composer, sink).await
}

async fn answering_stage(
    state: &AppState,
    request: &ChatCompletionRequest,
    messages: &[ChatMessage],
    composer: &mut PhaseComposer,
    sink: &mut FrameSink,
) -> Result<(), GatewayError> {
    let temperature = request
        .temperature
        .or(state.config.features.default_temperature);
    let max_tokens = request.max_tokens.or(state.config.features.default_max_tokens);
    let body = state
        .answering
        .build_request_body(messages, temperature, max_tokens);
    let response = state.answering.stream_request(&state.transport, &body).await?;
    pump(response, &AnsweringClassifier, composer, sink).await
}

async fn bootstrap_with_retry(
    state: &AppState,
) -> Result<crate::upstream::ConversationHandle, GatewayError> {
    let mut attempt = 0u32;
    loop {
        match state.reasoning.bootstrap(&state.transport).await {
            Ok(handle) => return Ok(handle),
            Err(err) if should_retry_bootstrap(&err, attempt) => {
                attempt += 1;
                tracing::warn!(attempt, error = %err, "reasoning bootstrap attempt failed, retrying");
            }
            Err(err) => {
                return Err(GatewayError::SessionBootstrapFailed {
                    attempts: attempt + 1,
                    message: err.to_string(),
                });
            }
        }
    }
}

/// Drive one upstream response body through decode, classify, and compose.
///
/// Returns when the upstream closes its stream or the client goes away;
/// dropping the response aborts the upstream request in the latter case.
async fn pump(
    response: reqwest::Response,
    classifier: &dyn EventClassifier,
    composer: &mut PhaseComposer,
    sink: &mut FrameSink,
) -> Result<(), GatewayError> {
    let mut decoder = LineDecoder::new();
    let mut stream = response.bytes_stream();
    let mut payloads = Vec::new();

    while let Some(next) = stream.next().await {
        let bytes = next.map_err(classify_transport_error)?;
        decoder.feed_into(&bytes, &mut payloads);
        for payload in payloads.drain(..) {
            let event = classifier.classify(&payload);
            if let UpstreamEvent::Malformed { raw } = &event {
                tracing::debug!(line = %raw, "skipping malformed upstream line");
            }
            let chunks = composer.on_event(event);
            sink.deliver(composer, chunks).await;
            if !sink.is_open() {
                return Ok(());
            }
        }
    }

    if decoder.pending_len() > 0 {
        tracing::debug!(
            bytes = decoder.pending_len(),
            "discarding unterminated upstream tail"
        );
    }
    Ok(())
}

/// Classifier adapter for the hybrid reasoning stage: only the reasoning
/// trace is consumed there, answer text comes from the answering provider.
struct ThinkingOnly<'a, C: EventClassifier>(&'a C);

impl<C: EventClassifier> EventClassifier for ThinkingOnly<'_, C> {
    fn classify(&self, line: &str) -> UpstreamEvent {
        match self.0.classify(line) {
            UpstreamEvent::Answer(_) => UpstreamEvent::Ignored,
            other => other,
        }
    }
}

/// Build the answering-stage message list: the original conversation with an
/// assistant turn carrying the reasoning trace inserted before the final user
/// turn.
#[must_use]
pub fn seeded_messages(original: &[ChatMessage], thinking: &str) -> Vec<ChatMessage> {
    let mut content = String::with_capacity(
        THINKING_OPEN_MARKER.len() + thinking.len() + THINKING_CLOSE_MARKER.len(),
    );
    content.push_str(THINKING_OPEN_MARKER);
    content.push_str(thinking);
    content.push_str(THINKING_CLOSE_MARKER);

    let split = original.len().saturating_sub(1);
    let mut seeded = Vec::with_capacity(original.len() + 1);
    seeded.extend_from_slice(&original[..split]);
    seeded.push(ChatMessage {
        role: "assistant".to_string(),
        content,
    });
    seeded.extend_from_slice(&original[split..]);
    seeded
}
