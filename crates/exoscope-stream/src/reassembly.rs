//! Cross-frame reassembly of logical JSON documents from payload lines.

use serde_json::Value;

/// Prefix marking a payload line inside a frame.
const PAYLOAD_MARKER: &str = "data:";

/// Size threshold for the accumulator safety valve. Exceeding it raises one
/// structured warning per episode; bytes are never dropped.
pub const MAX_PENDING_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

/// Concatenates payload lines across frames until the accumulator parses as
/// one JSON document.
#[derive(Debug)]
pub struct PayloadReassembler {
    pending: String,
    limit: usize,
    overflow_warned: bool,
}

impl Default for PayloadReassembler {
    fn default() -> Self {
        Self {
            pending: String::new(),
            limit: MAX_PENDING_PAYLOAD_BYTES,
            overflow_warned: false,
        }
    }
}

impl PayloadReassembler {
    #[cfg(test)]
    fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Extracts the payload lines of one frame, appends them to the
    /// accumulator, and attempts to parse the accumulator as a single JSON
    /// document. A parse failure means "not yet complete", never an error.
    pub fn push_frame(&mut self, frame: &str) -> Option<Value> {
        let mut appended = false;
        for line in frame.lines() {
            let trimmed = line.trim_start();
            if let Some(payload) = trimmed.strip_prefix(PAYLOAD_MARKER) {
                // Tolerate one optional space after the marker; anything
                // beyond that belongs to the payload.
                let payload = payload.strip_prefix(' ').unwrap_or(payload);
                self.pending.push_str(payload);
                appended = true;
            }
        }

        if !appended || self.pending.is_empty() {
            return None;
        }

        match serde_json::from_str::<Value>(&self.pending) {
            Ok(document) => {
                self.pending.clear();
                self.overflow_warned = false;
                Some(document)
            }
            Err(_) => {
                if self.pending.len() > self.limit && !self.overflow_warned {
                    self.overflow_warned = true;
                    tracing::warn!(
                        pending_bytes = self.pending.len(),
                        limit = self.limit,
                        "payload accumulator exceeded size threshold without parsing; possible malformed stream"
                    );
                }
                None
            }
        }
    }

    /// True when payload bytes were accumulated but never parsed.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Current accumulator size.
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }
}
