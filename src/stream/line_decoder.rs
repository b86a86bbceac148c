use memchr::memchr_iter;

/// Incremental decoder for newline-delimited upstream event payloads.
///
/// Feed it raw byte buffers as delivered by the transport (arbitrary
/// boundaries, possibly splitting multi-byte UTF-8 sequences or JSON objects)
/// and it yields the payload of each complete `data:` line with the prefix and
/// newline stripped. Splitting is purely on the newline delimiter, independent
/// of JSON structure.
///
/// Lines that are empty after trimming, that lack the `data:` prefix, or that
/// carry the `[DONE]` sentinel are filtered out here so the classifier only
/// ever sees candidate JSON payloads. A final unterminated fragment at stream
/// end is discarded.
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed a byte buffer and return the payloads of any completed lines.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed a byte buffer, appending completed payloads into `out`.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        self.buffer.extend_from_slice(chunk);

        let mut consumed = 0usize;
        // Collect line boundaries first; the buffer is drained once at the end.
        for pos in memchr_iter(b'\n', &self.buffer) {
            let mut line = &self.buffer[consumed..pos];
            if line.last().copied() == Some(b'\r') {
                line = &line[..line.len() - 1];
            }
            if let Some(payload) = extract_data_payload(line) {
                out.push(payload);
            }
            consumed = pos + 1;
        }

        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
    }

    /// Number of buffered bytes awaiting a newline.
    ///
    /// Any bytes still held here when the upstream closes are dropped, never
    /// parsed as a trailing line.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_data_payload(line: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }

    let payload = trimmed.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload).trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    Some(payload.to_string())
}
