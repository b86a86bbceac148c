use serde::Deserialize;

/// Provider-agnostic tagged event produced from one decoded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Incremental reasoning-trace text.
    Thinking(String),
    /// Incremental answer text.
    Answer(String),
    /// Parsed fine but carries nothing the composer acts on.
    Ignored,
    /// Not valid JSON; recoverable, the line is skipped.
    Malformed { raw: String },
}

/// Classification of decoded lines into [`UpstreamEvent`]s.
///
/// The only provider-coupled seam in the streaming core: the Phase Composer
/// consumes tagged events without knowing which upstream produced them.
/// Implementations must be pure functions of the input line.
pub trait EventClassifier: Send + Sync {
    fn classify(&self, line: &str) -> UpstreamEvent;
}

// ---------------------------------------------------------------------------
// Reasoning provider
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ReasoningEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    content_type: Option<String>,
    content: Option<String>,
}

/// Classifier for the reasoning provider's event envelope.
///
/// - `content_type == "thinking"` with non-empty `content` -> `Thinking`
/// - `type == "answer"` with `content_type != "thinking"` and non-empty
///   `content` -> `Answer`
/// - anything else -> `Ignored`
pub struct ReasoningClassifier;

impl EventClassifier for ReasoningClassifier {
    fn classify(&self, line: &str) -> UpstreamEvent {
        let envelope: ReasoningEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(_) => {
                return UpstreamEvent::Malformed {
                    raw: line.to_string(),
                }
            }
        };

        let content = envelope.content.unwrap_or_default();
        let is_thinking = envelope.content_type.as_deref() == Some("thinking");

        if is_thinking {
            if content.is_empty() {
                return UpstreamEvent::Ignored;
            }
            return UpstreamEvent::Thinking(content);
        }

        if envelope.kind.as_deref() == Some("answer") && !content.is_empty() {
            return UpstreamEvent::Answer(content);
        }

        UpstreamEvent::Ignored
    }
}

// ---------------------------------------------------------------------------
// Answering provider (OpenAI chat-completion chunks)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AnsweringChunk {
    #[serde(default)]
    choices: Vec<AnsweringChoice>,
}

#[derive(Debug, Deserialize)]
struct AnsweringChoice {
    #[serde(default)]
    delta: AnsweringDelta,
}

#[derive(Debug, Default, Deserialize)]
struct AnsweringDelta {
    content: Option<String>,
}

/// Classifier for the answering provider's OpenAI-style stream chunks.
/// Only `choices[0].delta.content` is extracted; role preambles, usage
/// frames, and finish markers are `Ignored`.
pub struct AnsweringClassifier;

impl EventClassifier for AnsweringClassifier {
    fn classify(&self, line: &str) -> UpstreamEvent {
        let chunk: AnsweringChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(_) => {
                return UpstreamEvent::Malformed {
                    raw: line.to_string(),
                }
            }
        };

        let content = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content);
        match content {
            Some(text) if !text.is_empty() => UpstreamEvent::Answer(text),
            _ => UpstreamEvent::Ignored,
        }
    }
}
