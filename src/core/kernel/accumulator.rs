//! Incremental buffering for textual frames.
//!
//! Chunks are appended to a buffer and scanned for a balanced top-level
//! object or array. Brackets inside string literals are ignored, including
//! strings that contain escaped quotes. Several frames arriving in one chunk
//! are all extracted; a trailing partial frame stays buffered.

use tracing::{debug, warn};

/// Default bound on a single buffered frame (64 KiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65_536;

#[derive(Debug, Clone, Copy, Default)]
struct ScanState {
    depth: usize,
    started: bool,
    in_string: bool,
    escaped: bool,
}

#[derive(Debug)]
pub struct TextFrameAccumulator {
    buffer: String,
    /// Bytes of `buffer` already scanned
    scanned: usize,
    state: ScanState,
    max_frame_size: usize,
}

impl Default for TextFrameAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl TextFrameAccumulator {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: String::new(),
            scanned: 0,
            state: ScanState::default(),
            max_frame_size,
        }
    }

    /// Append a chunk and return every frame it completed, in arrival order.
    /// Invalid candidates are dropped with a warning.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();

        while let Some(end) = self.scan() {
            let remainder = self.buffer.split_off(end);
            let candidate = std::mem::replace(&mut self.buffer, remainder);
            self.reset_scan();

            if candidate.len() > self.max_frame_size {
                warn!(
                    length = candidate.len(),
                    limit = self.max_frame_size,
                    "Text frame exceeds size limit, dropping"
                );
                continue;
            }

            match validate_frame(&candidate) {
                Some(frame) => frames.push(frame.to_string()),
                None => warn!(
                    length = candidate.len(),
                    "Dropping text that is not a JSON object or array"
                ),
            }
        }

        if self.buffer.len() > self.max_frame_size {
            warn!(
                length = self.buffer.len(),
                limit = self.max_frame_size,
                "Text frame exceeds size limit, clearing buffer"
            );
            self.clear();
        } else if !self.buffer.is_empty() {
            debug!(buffered = self.buffer.len(), "Incomplete frame, buffering");
        }

        frames
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.reset_scan();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn reset_scan(&mut self) {
        self.scanned = 0;
        self.state = ScanState::default();
    }

    /// Continue scanning from where the last call stopped. Returns the byte
    /// offset just past a completion point, if one was reached.
    fn scan(&mut self) -> Option<usize> {
        let bytes = self.buffer.as_bytes();
        let mut state = self.state;

        for (offset, &byte) in bytes.iter().enumerate().skip(self.scanned) {
            if state.in_string {
                if state.escaped {
                    state.escaped = false;
                } else if byte == b'\\' {
                    state.escaped = true;
                } else if byte == b'"' {
                    state.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => state.in_string = true,
                b'{' | b'[' => {
                    state.depth += 1;
                    state.started = true;
                }
                b'}' | b']' => {
                    if state.depth == 0 {
                        // Stray closer with nothing open: end of a garbage candidate
                        self.state = ScanState::default();
                        return Some(offset + 1);
                    }
                    state.depth -= 1;
                    if state.started && state.depth == 0 {
                        self.state = ScanState::default();
                        return Some(offset + 1);
                    }
                }
                _ => {}
            }
        }

        self.scanned = bytes.len();
        self.state = state;
        None
    }
}

/// Trimmed frame if it is delimited by matching `{}` or `[]`
fn validate_frame(candidate: &str) -> Option<&str> {
    let trimmed = candidate.trim();
    let valid = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    valid.then_some(trimmed)
}
