//! Incremental decoding of OpenAI-style `text/event-stream` bodies.
//!
//! Network chunks do not respect line boundaries (or UTF-8 boundaries), so
//! bytes are buffered until a full line is available.
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Content fragment from `choices[0].delta.content`.  Empty for
    /// role-only or finish deltas.
    Delta(String),
    /// `data: [DONE]`.
    Done,
    /// Blank line, comment or a field other than `data:`.
    Skip,
    /// A `data:` line that is not a usable completion chunk.
    Malformed(String),
}

pub fn parse_sse_line(line: &str) -> SseEvent {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return SseEvent::Skip;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseEvent::Done;
    }

    let chunk: Value = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(err) => return SseEvent::Malformed(err.to_string()),
    };
    let Some(delta) = chunk
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("delta"))
    else {
        return SseEvent::Malformed("missing choices[0].delta".to_string());
    };
    let content = delta
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    SseEvent::Delta(content.to_string())
}

/// Longest line kept while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 1 << 20;

#[derive(Debug)]
pub struct SseDecoder {
    pending: Vec<u8>,
    max_line_bytes: usize,
    /// Inside an oversized line; bytes are dropped until the next newline.
    discarding: bool,
    oversized: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_bytes,
            discarding: false,
            oversized: 0,
        }
    }

    /// Feed one network chunk; returns every line it completed.  Lines
    /// longer than the limit are dropped and counted instead.
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        while !chunk.is_empty() {
            let (head, rest, complete) = match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => (&chunk[..=pos], &chunk[pos + 1..], true),
                None => (chunk, &chunk[chunk.len()..], false),
            };
            chunk = rest;

            if self.discarding {
                self.discarding = !complete;
                continue;
            }
            if self.pending.len() + head.len() > self.max_line_bytes {
                self.pending.clear();
                self.oversized += 1;
                self.discarding = !complete;
                continue;
            }
            self.pending.extend_from_slice(head);
            if complete {
                let raw = std::mem::take(&mut self.pending);
                lines.push(decode_line(&raw));
            }
        }
        lines
    }

    /// Oversized lines dropped since the last call.
    pub fn take_oversized(&mut self) -> usize {
        std::mem::take(&mut self.oversized)
    }

    /// Whatever is left after the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        let line = decode_line(&raw);
        (!line.trim().is_empty()).then_some(line)
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(|c| c == '\r' || c == '\n')
        .to_string()
}
