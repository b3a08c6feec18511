//! Event-stream framing: bytes in, `event:`/`data:` records out.
//!
//! Frames are separated by a blank line. Within a frame only the `event:` and
//! `data:` fields are read; anything else is ignored. The reader never fails:
//! a frame without `data:` simply carries empty data.

use tracing::debug;

use crate::decoder::Utf8Decoder;

/// Separator between two frames.
const FRAME_DELIMITER: &str = "\n\n";

/// Event type assumed when a frame has no `event:` line.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// One parsed frame. Lives only for a single interpreter step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub event_type: String,
    pub data: String,
}

impl RawFrame {
    /// Parse one line group. Returns `None` for blank groups.
    pub fn parse(block: &str) -> Option<Self> {
        if block.trim().is_empty() {
            return None;
        }

        let mut event_type: Option<String> = None;
        let mut data_lines: Vec<&str> = Vec::new();

        for line in block.lines() {
            let line = line.trim_start();
            if let Some(rest) = line.strip_prefix("event:") {
                event_type = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.trim());
            }
        }

        Some(Self {
            event_type: event_type
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            data: data_lines.join("\n"),
        })
    }
}

/// Incremental frame splitter owning the trailing, not-yet-framed text.
#[derive(Debug, Default)]
pub struct FrameReader {
    decoder: Utf8Decoder,
    buffer: String,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk and return every frame it completed.
    ///
    /// Carriage returns are dropped so CRLF-framed streams split the same way.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        let mut text = String::new();
        self.decoder.decode(chunk, &mut text);
        self.buffer.extend(text.chars().filter(|&c| c != '\r'));
        self.drain_frames()
    }

    /// End of stream: flush any bytes the decoder is still holding.
    pub fn finish(&mut self) {
        let pending = self.decoder.pending_len();
        if pending > 0 {
            debug!(bytes = pending, "stream ended inside a UTF-8 sequence");
        }
        let mut text = String::new();
        self.decoder.finish(&mut text);
        self.buffer.push_str(&text);
    }

    /// Unframed trailing text.
    pub fn remaining(&self) -> &str {
        &self.buffer
    }

    fn drain_frames(&mut self) -> Vec<RawFrame> {
        let mut frames = Vec::new();
        let mut consumed = 0;

        while let Some(pos) = self.buffer[consumed..].find(FRAME_DELIMITER) {
            let block = &self.buffer[consumed..consumed + pos];
            if let Some(frame) = RawFrame::parse(block) {
                frames.push(frame);
            }
            consumed += pos + FRAME_DELIMITER.len();
        }

        self.buffer.drain(..consumed);
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_event_and_data() {
        let frame = RawFrame::parse("event: conversation.message.delta\ndata: {\"a\":1}").unwrap();
        assert_eq!(frame.event_type, "conversation.message.delta");
        assert_eq!(frame.data, "{\"a\":1}");
    }

    #[test]
    fn parse_defaults_event_type() {
        let frame = RawFrame::parse("data: {}").unwrap();
        assert_eq!(frame.event_type, DEFAULT_EVENT_TYPE);
    }

    #[test]
    fn parse_without_data_yields_empty_data() {
        let frame = RawFrame::parse("event: ping\nid: 4").unwrap();
        assert_eq!(frame.event_type, "ping");
        assert_eq!(frame.data, "");
    }

    #[test]
    fn parse_blank_block_is_discarded() {
        assert!(RawFrame::parse("  \n ").is_none());
    }

    #[test]
    fn parse_joins_multiple_data_lines() {
        let frame = RawFrame::parse("data: first\ndata: second").unwrap();
        assert_eq!(frame.data, "first\nsecond");
    }

    #[test]
    fn reader_emits_complete_frames_only() {
        let mut reader = FrameReader::new();
        let frames = reader.push(b"event: ping\ndata: {}\n\nevent: done\nda");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_type, "ping");
        assert_eq!(reader.remaining(), "event: done\nda");

        let frames = reader.push(b"ta: {}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_type, "done");
        assert_eq!(reader.remaining(), "");
    }

    #[test]
    fn reader_handles_crlf_frames() {
        let mut reader = FrameReader::new();
        let frames = reader.push(b"event: ping\r\ndata: {}\r\n\r\nevent: done\r\ndata: {}\r\n\r\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].event_type, "done");
    }

    #[test]
    fn reader_skips_empty_groups() {
        let mut reader = FrameReader::new();
        let frames = reader.push(b"\n\n\n\ndata: x\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn reader_resumes_multibyte_across_chunks() {
        let text = "data: 旅行推荐\n\n";
        let bytes = text.as_bytes();
        let mut reader = FrameReader::new();
        assert!(reader.push(&bytes[..8]).is_empty());
        let frames = reader.push(&bytes[8..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "旅行推荐");
    }

    #[test]
    fn finish_keeps_trailing_text_for_recovery() {
        let mut reader = FrameReader::new();
        reader.push(b"data: {\"content\":\"tail\"}");
        reader.finish();
        assert_eq!(reader.remaining(), "data: {\"content\":\"tail\"}");
    }
}
