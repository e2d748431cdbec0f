//! Byte-to-frame stages of the ingestion pipeline: incremental UTF-8 decoding
//! and blank-line frame splitting.

use crate::error::StreamError;

/// Literal frame content that signals explicit protocol termination.
const STREAM_END_SENTINEL: &str = "end of stream";

/// Incremental UTF-8 decoder. Codepoints split across chunk boundaries are
/// held back and prepended to the next chunk instead of failing the decode.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    /// Decodes one network chunk, returning all complete codepoints. A
    /// definite invalid sequence (as opposed to an incomplete trailing one)
    /// is a fatal decode error.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<String, StreamError> {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let valid_up_to = match std::str::from_utf8(&bytes) {
            Ok(_) => bytes.len(),
            Err(error) => {
                if error.error_len().is_some() {
                    return Err(StreamError::InvalidUtf8(error.to_string()));
                }
                error.valid_up_to()
            }
        };

        self.carry = bytes.split_off(valid_up_to);
        String::from_utf8(bytes).map_err(|error| StreamError::InvalidUtf8(error.to_string()))
    }

    /// Returns true when no partial codepoint is pending.
    pub fn is_empty(&self) -> bool {
        self.carry.is_empty()
    }
}

/// Splits decoded text into blank-line-delimited frames, retaining the
/// incomplete tail for the next chunk.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buffer: String,
    terminated: bool,
}

impl FrameSplitter {
    /// Appends a decoded fragment and returns every frame it completes. The
    /// terminal sentinel frame is consumed, not returned.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        if self.terminated {
            return Vec::new();
        }

        // CRLF tolerance: valid JSON payload never carries a raw CR.
        if fragment.contains('\r') {
            self.buffer.push_str(&fragment.replace('\r', ""));
        } else {
            self.buffer.push_str(fragment);
        }

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let frame = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);

            if is_terminal_frame(&frame) {
                self.terminated = true;
                break;
            }
            if !frame.trim().is_empty() {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flushes the retained tail as a final frame at stream end. Never forces
    /// anything: an empty or sentinel tail yields `None`.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buffer);
        if self.terminated || tail.trim().is_empty() || is_terminal_frame(&tail) {
            return None;
        }
        Some(tail)
    }

    /// True once the sentinel frame was seen.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

fn is_terminal_frame(frame: &str) -> bool {
    frame.trim().eq_ignore_ascii_case(STREAM_END_SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::{FrameSplitter, Utf8Decoder};

    #[test]
    fn decoder_carries_codepoint_split_across_chunks() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "Validación".as_bytes();
        // Split inside the two-byte "ó".
        let first = decoder.decode(&bytes[..9]).expect("first chunk decodes");
        assert_eq!(first, "Validaci");
        assert!(!decoder.is_empty());

        let second = decoder.decode(&bytes[9..]).expect("second chunk decodes");
        assert_eq!(second, "ón");
        assert!(decoder.is_empty());
    }

    #[test]
    fn decoder_rejects_definitely_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        let error = decoder
            .decode(&[0x66, 0xFF, 0x66])
            .expect_err("lone 0xFF is never valid UTF-8");
        assert!(error.to_string().contains("invalid UTF-8"));
    }

    #[test]
    fn splitter_emits_frames_and_retains_tail() {
        let mut splitter = FrameSplitter::default();
        let frames = splitter.push("data: one\n\ndata: tw");
        assert_eq!(frames, vec!["data: one".to_string()]);

        let frames = splitter.push("o\n\n");
        assert_eq!(frames, vec!["data: two".to_string()]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn splitter_normalizes_crlf_delimiters() {
        let mut splitter = FrameSplitter::default();
        let frames = splitter.push("data: one\r\n\r\ndata: two\r\n\r\n");
        assert_eq!(frames, vec!["data: one".to_string(), "data: two".to_string()]);
    }

    #[test]
    fn splitter_consumes_sentinel_and_ignores_later_input() {
        let mut splitter = FrameSplitter::default();
        let frames = splitter.push("data: one\n\nEnd of stream\n\ndata: late\n\n");
        assert_eq!(frames, vec!["data: one".to_string()]);
        assert!(splitter.is_terminated());
        assert!(splitter.push("data: more\n\n").is_empty());
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn finish_flushes_undelimited_tail() {
        let mut splitter = FrameSplitter::default();
        assert!(splitter.push("data: only").is_empty());
        assert_eq!(splitter.finish(), Some("data: only".to_string()));
    }
}
