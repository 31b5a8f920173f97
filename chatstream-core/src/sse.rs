//! Incremental decoder for `text/event-stream` bodies.
//!
//! Frames are separated by a blank line (`\n\n`). Inside a frame only the
//! `event:`, `data:` and `id:` fields are recognized; every other line is ignored.
//! Multiple `data:` lines in one frame are concatenated with no separator.
//! Frames without any `data:` line produce no record.

use serde::Serialize;

const FRAME_SEPARATOR: &str = "\n\n";

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl EventRecord {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
            id: None,
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
            id: None,
        }
    }
}

/// Buffers partial input across calls and emits complete records.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: String,
    /// Trailing bytes of an incomplete UTF-8 sequence from the last `feed_bytes`.
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` to the carry-over buffer and return every record whose
    /// frame is now complete. The trailing incomplete frame stays buffered.
    pub fn feed(&mut self, chunk: &str) -> Vec<EventRecord> {
        let prev_len = self.buf.len();
        self.buf.push_str(chunk);

        // A separator can straddle the old tail and the new chunk.
        let mut from = prev_len.saturating_sub(1);
        while !self.buf.is_char_boundary(from) {
            from -= 1;
        }

        let mut out = Vec::new();
        while let Some(pos) = self.buf[from..].find(FRAME_SEPARATOR) {
            let idx = from + pos;
            let frame: String = self.buf.drain(..idx + FRAME_SEPARATOR.len()).collect();
            if let Some(rec) = parse_frame(&frame[..idx]) {
                out.push(rec);
            }
            from = 0;
        }
        out
    }

    /// Byte-level variant of [`feed`](Self::feed). A multi-byte character split
    /// across chunks is held back until its remaining bytes arrive. Invalid
    /// sequences become U+FFFD, one per sequence, as `from_utf8_lossy` does.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<EventRecord> {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    text.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: keep it for the next chunk.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(n) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + n);
                        }
                    }
                }
            }
        }
        self.feed(&text)
    }

    /// Parse whatever is left at end-of-stream. The last frame may legitimately
    /// lack its closing blank line. Returns `None` for an empty or
    /// whitespace-only remainder.
    pub fn flush(&mut self) -> Option<EventRecord> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.buf.push_str(&String::from_utf8_lossy(&tail));
        }
        let rest = std::mem::take(&mut self.buf);
        if rest.trim().is_empty() {
            return None;
        }
        parse_frame(&rest)
    }

    /// Number of bytes currently carried over.
    pub fn buffered_len(&self) -> usize {
        self.buf.len() + self.pending.len()
    }
}

/// Parse a single frame (without its separator).
pub fn parse_frame(frame: &str) -> Option<EventRecord> {
    let mut event = None;
    let mut data: Option<String> = None;
    let mut id = None;

    for line in frame.split('\n') {
        if let Some(v) = line.strip_prefix("event:") {
            event = non_empty(v);
        } else if let Some(v) = line.strip_prefix("data:") {
            data.get_or_insert_with(String::new).push_str(v.trim());
        } else if let Some(v) = line.strip_prefix("id:") {
            id = non_empty(v);
        }
    }

    data.map(|data| EventRecord { event, data, id })
}

fn non_empty(v: &str) -> Option<String> {
    let v = v.trim();
    (!v.is_empty()).then(|| v.to_string())
}
