//! Incremental decoder for `text/event-stream` bodies.

use std::time::Duration;

/// Longest line the decoder will hold while waiting for its terminator.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// Events without an explicit type, or typed `message`, are the ones a
    /// browser `EventSource` delivers to `onmessage`.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
    retry: Option<Duration>,
    // Skipping the tail of an oversized line until the next newline
    discarding: bool,
    overflowed: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the body and return every event it completed.
    /// Partial lines are kept until the next chunk; a line longer than
    /// [`MAX_LINE_BYTES`] is dropped along with the event it belonged to.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let line_bytes = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if self.buffer.len() + line_bytes.len() > MAX_LINE_BYTES {
                self.drop_line();
                continue;
            }

            self.buffer.extend_from_slice(line_bytes);
            let mut line = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            if line.ends_with('\r') {
                line.pop();
            }
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        if !self.discarding {
            if self.buffer.len() + rest.len() > MAX_LINE_BYTES {
                self.drop_line();
                self.discarding = true;
            } else {
                self.buffer.extend_from_slice(rest);
            }
        }
        events
    }

    /// Whether a line was dropped for length since the last call.
    pub fn take_overflow(&mut self) -> bool {
        std::mem::take(&mut self.overflowed)
    }

    /// Reconnect delay most recently requested by the server, consumed on read.
    pub fn take_retry(&mut self) -> Option<Duration> {
        self.retry.take()
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    fn drop_line(&mut self) {
        self.buffer.clear();
        self.event = None;
        self.data.clear();
        self.overflowed = true;
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.last_id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event,
            data,
            id: self.last_id.clone(),
        })
    }
}
