//! Incremental Server-Sent-Events framing.
//!
//! Upstream chunk boundaries are arbitrary: a frame can be split across
//! chunks and a chunk can hold several frames. The framer buffers partial
//! lines, strips `data:` prefixes, and yields one payload string per
//! blank-line-terminated frame.

/// Stateful SSE frame accumulator.
#[derive(Default)]
pub struct SseFramer {
    line_buf: String,
    data_buf: String,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the payloads of every frame completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let mut frames = Vec::new();
        self.line_buf.push_str(chunk);

        while let Some(pos) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if let Some(tail) = line.strip_prefix("data:") {
                // Multi-line data joins with newlines per the SSE spec.
                if !self.data_buf.is_empty() {
                    self.data_buf.push('\n');
                }
                self.data_buf.push_str(tail.trim_start());
            } else if line.is_empty() {
                if !self.data_buf.is_empty() {
                    frames.push(std::mem::take(&mut self.data_buf));
                }
            }
            // event:/id:/retry: fields and comments are ignored.
        }

        frames
    }

    /// Flush a trailing frame the stream ended without terminating.
    pub fn finish(&mut self) -> Option<String> {
        if let Some(tail) = self.line_buf.strip_prefix("data:") {
            if !self.data_buf.is_empty() {
                self.data_buf.push('\n');
            }
            self.data_buf.push_str(tail.trim_start());
        }
        self.line_buf.clear();
        if self.data_buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data_buf))
        }
    }
}
