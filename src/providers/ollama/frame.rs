//! Newline framing for the chunked NDJSON response body.
//!
//! Network chunks can end anywhere, including inside a line or inside a
//! multi-byte UTF-8 sequence. [`LineDecoder`] keeps both kinds of remainder
//! between calls and only ever hands out complete, newline-terminated lines.

use crate::config;

#[derive(Debug)]
pub struct LineDecoder {
    /// Bytes of a character split across chunks.
    pending: Vec<u8>,
    /// Text of the line currently being assembled.
    buffer: String,
    max_line_len: usize,
    /// Set while skipping the remainder of an over-long line.
    discarding: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_line_len(config::MAX_FRAME_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            buffer: String::new(),
            max_line_len,
            discarding: false,
        }
    }

    /// Feed one chunk and return every line it completed, in order.
    /// Blank lines are skipped and a trailing `\r` is stripped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.decode(chunk);
        let mut lines = Vec::new();
        let mut rest = text.as_str();

        while let Some(pos) = rest.find('\n') {
            let head = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                self.discarding = false;
                self.buffer.clear();
                continue;
            }

            self.buffer.push_str(head);
            let line = std::mem::take(&mut self.buffer);
            if line.len() > self.max_line_len {
                tracing::warn!(
                    "Dropping {} byte frame (limit {})",
                    line.len(),
                    self.max_line_len
                );
                continue;
            }

            let line = line.trim_end_matches('\r');
            if !line.trim().is_empty() {
                lines.push(line.to_string());
            }
        }

        if !self.discarding {
            self.buffer.push_str(rest);
            if self.buffer.len() > self.max_line_len {
                tracing::warn!(
                    "Frame exceeds {} bytes, discarding until next newline",
                    self.max_line_len
                );
                self.buffer.clear();
                self.discarding = true;
            }
        }

        lines
    }

    /// End of input. Returns the unterminated remainder, if any, so the caller
    /// can log it; it is never a frame.
    pub fn finish(&mut self) -> Option<String> {
        let mut rest = std::mem::take(&mut self.buffer);
        if !self.pending.is_empty() {
            rest.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
        self.discarding = false;

        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Decode as much valid UTF-8 as possible, holding back an incomplete
    /// trailing sequence. Invalid sequences become U+FFFD.
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + len);
                        }
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }

        out
    }
}
