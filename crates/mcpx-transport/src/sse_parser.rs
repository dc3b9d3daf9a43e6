//! SSE (Server-Sent Events) parser
//!
//! Parses the SSE wire format into raw events. Payload decoding is left
//! to the caller since the `endpoint` event carries a plain URL.

use bytes::Bytes;
use tracing::trace;

/// One dispatched event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `message` when the stream did not name one
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Fields collected since the last blank line
#[derive(Debug, Default)]
struct PendingFrame {
    event: Option<String>,
    data: Option<String>,
}

impl PendingFrame {
    fn push_data(&mut self, value: &str) {
        match &mut self.data {
            Some(data) => {
                data.push('\n');
                data.push_str(value);
            }
            None => self.data = Some(value.to_string()),
        }
    }
}

/// Incremental parser; bytes may be split anywhere, including inside a
/// UTF-8 sequence
#[derive(Debug, Default)]
pub struct SseParser {
    partial_line: Vec<u8>,
    frame: PendingFrame,
    last_id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every event it completes
    pub fn feed(&mut self, bytes: Bytes) -> Vec<SseEvent> {
        self.partial_line.extend_from_slice(&bytes);

        let mut complete = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.partial_line[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + offset;
            let raw = &self.partial_line[consumed..end];
            let line = String::from_utf8_lossy(raw.strip_suffix(b"\r").unwrap_or(raw)).into_owned();
            consumed = end + 1;

            if let Some(event) = self.apply(&line) {
                complete.push(event);
            }
        }
        self.partial_line.drain(..consumed);

        complete
    }

    /// Last event id seen on the stream
    pub fn last_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    fn apply(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.finish_frame();
        }
        if line.starts_with(':') {
            trace!("SSE comment");
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);

        match field {
            "data" => self.frame.push_data(value),
            "event" => self.frame.event = Some(value.to_string()),
            "id" => self.last_id = Some(value.to_string()),
            other => trace!(field = other, "Ignoring SSE field"),
        }
        None
    }

    fn finish_frame(&mut self) -> Option<SseEvent> {
        let frame = std::mem::take(&mut self.frame);
        let data = frame.data.filter(|d| !d.is_empty())?;
        Some(SseEvent {
            event: frame
                .event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data,
            id: self.last_id.clone(),
        })
    }
}
