use smallvec::SmallVec;

use super::classify::UpstreamEvent;

/// Marker text bracketing the reasoning trace on the outbound wire.
pub const THINKING_OPEN_MARKER: &str = "<thinking>\n";
pub const THINKING_CLOSE_MARKER: &str = "\n</thinking>\n\n";

/// Composition phase of one in-flight session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Thinking,
    Answer,
    Done,
}

/// One outbound delta, produced in emission order and never reordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundChunk {
    pub delta_role: Option<&'static str>,
    pub delta_content: Option<String>,
    pub finish_reason: Option<&'static str>,
}

impl OutboundChunk {
    #[must_use]
    fn role_preamble() -> Self {
        Self {
            delta_role: Some("assistant"),
            delta_content: None,
            finish_reason: None,
        }
    }

    #[must_use]
    fn content(text: String) -> Self {
        Self {
            delta_role: None,
            delta_content: Some(text),
            finish_reason: None,
        }
    }

    #[must_use]
    fn terminal() -> Self {
        Self {
            delta_role: None,
            delta_content: None,
            finish_reason: Some("stop"),
        }
    }
}

/// Chunks produced by one composer step. Bounded: a single upstream event
/// yields at most a role preamble, a marker, and a delta.
pub type ComposedChunks = SmallVec<[OutboundChunk; 3]>;

/// State machine that turns a classified upstream event sequence into a
/// correctly bracketed outbound chunk sequence.
///
/// Owns the per-request session state: correlation id, creation timestamp,
/// phase, and the thinking/answer accumulators. Created when a request is
/// accepted, mutated only by event arrival, discarded when the response is
/// finalized. The hybrid flow drives one composer twice: the reasoning stage
/// ends with [`PhaseComposer::close_reasoning_stage`], then the answer stage
/// continues in the same session.
///
/// Invariants upheld here:
/// - the thinking-open marker is emitted at most once per session;
/// - if it was emitted, exactly one thinking-close marker follows before the
///   session reaches `Done`, even when the upstream ends mid-thinking;
/// - `Done` is terminal: no chunk is ever emitted after it.
pub struct PhaseComposer {
    id: String,
    created_at: u64,
    phase: Phase,
    thinking: String,
    answer: String,
    role_sent: bool,
    thinking_opened: bool,
    thinking_closed: bool,
}

impl PhaseComposer {
    #[must_use]
    pub fn new(id: String, created_at: u64) -> Self {
        Self {
            id,
            created_at,
            phase: Phase::Idle,
            thinking: String::new(),
            answer: String::new(),
            role_sent: false,
            thinking_opened: false,
            thinking_closed: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Accumulated reasoning text, available to seed the answer stage.
    #[must_use]
    pub fn thinking_text(&self) -> &str {
        &self.thinking
    }

    /// Accumulated answer text, for usage accounting and aggregation.
    #[must_use]
    pub fn answer_text(&self) -> &str {
        &self.answer
    }

    /// Whether a thinking block was opened on the outbound stream.
    #[must_use]
    pub fn thinking_emitted(&self) -> bool {
        self.thinking_opened
    }

    /// Consume one classified event, returning the chunks it produces.
    ///
    /// `Ignored` and `Malformed` events are inert: no state transition, no
    /// emitted chunk.
    pub fn on_event(&mut self, event: UpstreamEvent) -> ComposedChunks {
        let mut out = ComposedChunks::new();
        if self.phase == Phase::Done {
            return out;
        }

        match event {
            UpstreamEvent::Thinking(text) => self.on_thinking(text, &mut out),
            UpstreamEvent::Answer(text) => self.on_answer(text, &mut out),
            UpstreamEvent::Ignored | UpstreamEvent::Malformed { .. } => {}
        }
        out
    }

    fn on_thinking(&mut self, text: String, out: &mut ComposedChunks) {
        match self.phase {
            Phase::Idle => {
                self.push_role_preamble(out);
                self.thinking_opened = true;
                out.push(OutboundChunk::content(THINKING_OPEN_MARKER.to_string()));
                self.phase = Phase::Thinking;
                self.thinking.push_str(&text);
                out.push(OutboundChunk::content(text));
            }
            Phase::Thinking => {
                self.thinking.push_str(&text);
                out.push(OutboundChunk::content(text));
            }
            // The machine has no Answer -> Thinking transition; a stray
            // thinking delta after the answer began is dropped.
            Phase::Answer | Phase::Done => {}
        }
    }

    fn on_answer(&mut self, text: String, out: &mut ComposedChunks) {
        match self.phase {
            Phase::Idle => {
                self.push_role_preamble(out);
                self.phase = Phase::Answer;
                self.answer.push_str(&text);
                out.push(OutboundChunk::content(text));
            }
            Phase::Thinking => {
                self.push_thinking_close(out);
                self.phase = Phase::Answer;
                self.answer.push_str(&text);
                out.push(OutboundChunk::content(text));
            }
            Phase::Answer => {
                self.answer.push_str(&text);
                out.push(OutboundChunk::content(text));
            }
            Phase::Done => {}
        }
    }

    /// End the reasoning stage of a hybrid session without finalizing.
    ///
    /// Closes the thinking block if one is open and parks the machine in the
    /// `Answer` phase so the second stage forwards deltas without markers.
    pub fn close_reasoning_stage(&mut self) -> ComposedChunks {
        let mut out = ComposedChunks::new();
        if self.phase == Phase::Done {
            return out;
        }
        if self.phase == Phase::Thinking {
            self.push_thinking_close(&mut out);
            self.phase = Phase::Answer;
        }
        out
    }

    /// Upstream end-of-stream: finalize the session.
    ///
    /// Closes a still-open thinking block, then emits the single terminal
    /// chunk with `finish_reason = "stop"`. Idempotent once `Done`.
    pub fn finish(&mut self) -> ComposedChunks {
        let mut out = ComposedChunks::new();
        if self.phase == Phase::Done {
            return out;
        }
        if self.phase == Phase::Thinking {
            self.push_thinking_close(&mut out);
        }
        self.push_role_preamble(&mut out);
        self.phase = Phase::Done;
        out.push(OutboundChunk::terminal());
        out
    }

    fn push_role_preamble(&mut self, out: &mut ComposedChunks) {
        if !self.role_sent {
            self.role_sent = true;
            out.push(OutboundChunk::role_preamble());
        }
    }

    fn push_thinking_close(&mut self, out: &mut ComposedChunks) {
        if self.thinking_opened && !self.thinking_closed {
            self.thinking_closed = true;
            out.push(OutboundChunk::content(THINKING_CLOSE_MARKER.to_string()));
        }
    }
}
