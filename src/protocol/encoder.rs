use crate::stream::composer::{OutboundChunk, THINKING_CLOSE_MARKER, THINKING_OPEN_MARKER};
use crate::util::{push_json_string_escaped, push_u64_decimal};

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Encode one [`OutboundChunk`] as an OpenAI chat-completion-chunk SSE frame.
///
/// Fixed envelope: `id`, `object`, `created`, `model`, one choice with the
/// delta and `finish_reason`. Built with push helpers rather than serde to
/// keep the hot streaming path allocation-light.
#[must_use]
pub fn encode_chunk_frame(chunk: &OutboundChunk, id: &str, model: &str, created: u64) -> String {
    let content_len = chunk.delta_content.as_deref().map_or(0, str::len);
    let mut out = String::with_capacity(144 + id.len() + model.len() + content_len);

    push_chunk_prefix(&mut out, id, model, created);
    out.push_str(",\"choices\":[{\"index\":0,\"delta\":{");
    let mut first_field = true;
    if let Some(role) = chunk.delta_role {
        out.push_str("\"role\":");
        push_json_string_escaped(&mut out, role);
        first_field = false;
    }
    if let Some(content) = chunk.delta_content.as_deref() {
        if !first_field {
            out.push(',');
        }
        out.push_str("\"content\":");
        push_json_string_escaped(&mut out, content);
    }
    out.push_str("},\"finish_reason\":");
    match chunk.finish_reason {
        Some(reason) => push_json_string_escaped(&mut out, reason),
        None => out.push_str("null"),
    }
    out.push_str("}]}\n\n");
    out
}

fn push_chunk_prefix(out: &mut String, id: &str, model: &str, created: u64) {
    out.push_str("data: {\"id\":");
    push_json_string_escaped(out, id);
    out.push_str(",\"object\":\"chat.completion.chunk\",\"created\":");
    push_u64_decimal(out, created);
    out.push_str(",\"model\":");
    push_json_string_escaped(out, model);
}

/// Encode a mid-stream failure as a named SSE error event.
///
/// Used only after streaming has started; before that, errors go out as a
/// plain HTTP error response.
#[must_use]
pub fn encode_error_frame(message: &str) -> String {
    let mut out = String::with_capacity(48 + message.len());
    out.push_str("event: error\ndata: {\"error\":{\"message\":");
    push_json_string_escaped(&mut out, message);
    out.push_str(",\"type\":\"server_error\"}}\n\n");
    out
}

/// Build the aggregate (non-streaming) chat-completion body.
///
/// The emitted `content` equals the concatenation of every streaming delta
/// for the same event sequence: when a thinking block was produced, the
/// reasoning text arrives wrapped in the same delimiter block the streaming
/// path brackets it with. Usage counters are character-length proxies, not a
/// tokenizer.
#[must_use]
pub fn encode_completion_body(
    id: &str,
    model: &str,
    created: u64,
    thinking: Option<&str>,
    answer: &str,
    prompt_chars: u64,
) -> serde_json::Value {
    let content = match thinking {
        Some(thinking) => {
            let mut content = String::with_capacity(
                THINKING_OPEN_MARKER.len() + thinking.len() + THINKING_CLOSE_MARKER.len() + answer.len(),
            );
            content.push_str(THINKING_OPEN_MARKER);
            content.push_str(thinking);
            content.push_str(THINKING_CLOSE_MARKER);
            content.push_str(answer);
            content
        }
        None => answer.to_string(),
    };

    let completion_chars = content.chars().count() as u64;
    serde_json::json!({
        "id": id,
        "object": "chat.completion",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": content,
            },
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": prompt_chars,
            "completion_tokens": completion_chars,
            "total_tokens": prompt_chars + completion_chars,
        },
    })
}
