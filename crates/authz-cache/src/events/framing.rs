//! Text event-stream framing
//!
//! Bytes arrive in arbitrary chunks. [`LineBuffer`] reassembles them into
//! lines (`\n`, `\r\n` or `\r` terminated) and [`FrameParser`] folds lines into
//! frames:
//!
//! - `:comment` lines are keepalives and ignored
//! - `event: x` sets the pending event type
//! - `data: x` appends to the pending data, joined with `\n`
//! - any other field is ignored
//! - a blank line ends the frame; it is emitted only if data was buffered
//!
//! Both stages are bounded. A line longer than its limit, or a frame whose
//! data outgrows its limit, is reported once as [`CacheError::MalformedEvent`]
//! and skipped up to its terminator.

use crate::error::{CacheError, Result};

/// Longest line accepted before the rest of it is discarded
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Largest `data:` payload accepted for one frame
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Reassembles chunked bytes into complete lines
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Last chunk ended in `\r`; a leading `\n` in the next chunk belongs to it
    skip_lf: bool,
    /// Dropping the tail of an overlong line until its terminator
    discarding: bool,
    max_line_bytes: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    /// Create an empty buffer with the default line limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer that rejects lines over `max_line_bytes`
    pub fn with_limit(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            skip_lf: false,
            discarding: false,
            max_line_bytes,
        }
    }

    /// Feed a chunk and return every line it completes, without terminators
    ///
    /// An overlong line yields one `MalformedEvent` in its place.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<String>> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if self.skip_lf {
                self.skip_lf = false;
                if byte == b'\n' {
                    continue;
                }
            }
            match byte {
                b'\n' => self.end_line(&mut lines),
                b'\r' => {
                    self.end_line(&mut lines);
                    self.skip_lf = true;
                }
                _ if self.discarding => {}
                _ if self.pending.len() >= self.max_line_bytes => {
                    self.pending.clear();
                    self.discarding = true;
                    lines.push(Err(CacheError::malformed_event(format!(
                        "line exceeds {} bytes",
                        self.max_line_bytes
                    ))));
                }
                _ => self.pending.push(byte),
            }
        }
        lines
    }

    fn end_line(&mut self, lines: &mut Vec<Result<String>>) {
        if self.discarding {
            self.discarding = false;
        } else {
            lines.push(Ok(self.take_line()));
        }
    }

    /// Bytes received after the last terminator
    pub fn remainder(&self) -> &[u8] {
        &self.pending
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

/// One complete frame before JSON parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Value of the `event:` field, if any
    pub event_type: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

/// Folds lines into frames
#[derive(Debug)]
pub struct FrameParser {
    event_type: Option<String>,
    data_lines: Vec<String>,
    data_bytes: usize,
    /// Skipping the rest of an oversized frame until its blank line
    discarding: bool,
    max_frame_bytes: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

impl FrameParser {
    /// Create a parser with no pending frame and the default frame limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser that rejects frames with more than `max_frame_bytes`
    /// of data
    pub fn with_limit(max_frame_bytes: usize) -> Self {
        Self {
            event_type: None,
            data_lines: Vec::new(),
            data_bytes: 0,
            discarding: false,
            max_frame_bytes,
        }
    }

    /// Consume one line; returns a frame when the line completes one
    ///
    /// A frame that outgrows the limit yields one `MalformedEvent` and the
    /// remainder of that frame is ignored.
    pub fn feed_line(&mut self, line: &str) -> Option<Result<RawFrame>> {
        if line.is_empty() {
            let event_type = self.event_type.take();
            self.data_bytes = 0;
            if std::mem::take(&mut self.discarding) || self.data_lines.is_empty() {
                return None;
            }
            let data = std::mem::take(&mut self.data_lines).join("\n");
            return Some(Ok(RawFrame { event_type, data }));
        }

        if self.discarding {
            return None;
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => {
                self.data_bytes += value.len() + 1;
                if self.data_bytes > self.max_frame_bytes {
                    self.reset();
                    self.discarding = true;
                    return Some(Err(CacheError::malformed_event(format!(
                        "frame data exceeds {} bytes",
                        self.max_frame_bytes
                    ))));
                }
                self.data_lines.push(value.to_string());
            }
            _ => {}
        }
        None
    }

    /// Drop any partially assembled frame
    pub fn reset(&mut self) {
        self.event_type = None;
        self.data_lines.clear();
        self.data_bytes = 0;
        self.discarding = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(lines: Vec<Result<String>>) -> Vec<String> {
        lines.into_iter().map(|line| line.unwrap()).collect()
    }

    fn frames(input: &str) -> Vec<RawFrame> {
        let mut lines = LineBuffer::new();
        let mut parser = FrameParser::new();
        text(lines.push(input.as_bytes()))
            .iter()
            .filter_map(|line| parser.feed_line(line))
            .map(|frame| frame.unwrap())
            .collect()
    }

    #[test]
    fn lines_split_across_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        assert_eq!(buffer.remainder(), b"data: {\"a\"");
        assert_eq!(text(buffer.push(b":1}\n\n")), vec!["data: {\"a\":1}", ""]);
        assert!(buffer.remainder().is_empty());
    }

    #[test]
    fn crlf_split_between_chunks_is_one_terminator() {
        let mut buffer = LineBuffer::new();
        assert_eq!(text(buffer.push(b"event: x\r")), vec!["event: x"]);
        assert_eq!(text(buffer.push(b"\ndata: 1\r\n\r\n")), vec!["data: 1", ""]);
    }

    #[test]
    fn bare_cr_terminates_lines() {
        let mut buffer = LineBuffer::new();
        assert_eq!(text(buffer.push(b"a\rb\r\r")), vec!["a", "b", ""]);
    }

    #[test]
    fn single_frame_with_event_type() {
        let parsed = frames("event: policy_updated\ndata: {\"app_id\":1}\n\n");
        assert_eq!(
            parsed,
            vec![RawFrame {
                event_type: Some("policy_updated".into()),
                data: "{\"app_id\":1}".into(),
            }]
        );
    }

    #[test]
    fn multi_line_data_is_joined_with_newline() {
        let parsed = frames("data: {\"app_id\":\ndata: 2}\n\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].data, "{\"app_id\":\n2}");
        assert_eq!(parsed[0].event_type, None);
    }

    #[test]
    fn comments_and_unknown_fields_are_ignored() {
        let parsed = frames(": keepalive\nid: 7\nretry: 100\ndata: {}\n\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].data, "{}");
    }

    #[test]
    fn blank_line_without_data_emits_nothing_and_resets_type() {
        let parsed = frames("event: stale\n\ndata: {}\n\n");
        assert_eq!(
            parsed,
            vec![RawFrame {
                event_type: None,
                data: "{}".into(),
            }]
        );
    }

    #[test]
    fn only_one_leading_space_is_stripped() {
        let parsed = frames("data:  padded\ndata:tight\n\n");
        assert_eq!(parsed[0].data, " padded\ntight");
    }

    #[test]
    fn unterminated_frame_is_not_emitted() {
        assert!(frames("data: {}\n").is_empty());
    }

    #[test]
    fn overlong_line_is_reported_once_and_skipped() {
        let mut buffer = LineBuffer::with_limit(8);
        let lines = buffer.push(b"data: 0123456789");
        assert_eq!(lines.len(), 1);
        assert!(matches!(lines[0], Err(CacheError::MalformedEvent { .. })));
        assert!(buffer.remainder().is_empty());

        assert!(buffer.push(b"abcdef").is_empty());
        assert_eq!(text(buffer.push(b"\ndata: ok\n")), vec!["data: ok"]);
    }

    #[test]
    fn oversized_frame_is_reported_and_dropped_up_to_blank_line() {
        let mut parser = FrameParser::with_limit(16);
        assert!(parser.feed_line("event: policy_updated").is_none());
        assert!(parser.feed_line("data: 0123456789").is_none());
        assert!(matches!(
            parser.feed_line("data: 0123456789"),
            Some(Err(CacheError::MalformedEvent { .. }))
        ));
        assert!(parser.feed_line("data: ignored").is_none());
        assert!(parser.feed_line("").is_none());

        assert!(parser.feed_line("data: {}").is_none());
        let frame = parser.feed_line("").unwrap().unwrap();
        assert_eq!(
            frame,
            RawFrame {
                event_type: None,
                data: "{}".into(),
            }
        );
    }

    #[test]
    fn reset_drops_partial_frame() {
        let mut parser = FrameParser::new();
        assert!(parser.feed_line("event: x").is_none());
        assert!(parser.feed_line("data: 1").is_none());
        parser.reset();
        assert!(parser.feed_line("").is_none());
    }
}
