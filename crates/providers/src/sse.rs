//! Minimal server-sent-events parser for chat-completion streams.
//!
//! Network chunks do not align with event boundaries, so the parser buffers
//! partial input and emits only the `data:` payloads of complete events.

pub(crate) struct SseParser {
    /// Bytes held back because they end mid-way through a UTF-8 sequence.
    pending: Vec<u8>,
    buffer: String,
}

impl SseParser {
    pub(crate) fn new() -> Self {
        Self {
            pending: Vec::new(),
            buffer: String::new(),
        }
    }

    /// Feed one raw network chunk. Chunk boundaries fall anywhere, including
    /// inside a multi-byte UTF-8 sequence; incomplete trailing bytes are held
    /// back until the next chunk completes them.
    pub(crate) fn push_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let valid_up_to = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // A truncated trailing sequence waits for more bytes; a sequence
            // that can never become valid gets replaced rather than stalling
            // the stream.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                return self.push(&text);
            }
        };
        let text = String::from_utf8_lossy(&self.pending[..valid_up_to]).into_owned();
        self.pending.drain(..valid_up_to);
        self.push(&text)
    }

    /// Feed one decoded chunk, returning the data payloads of every event
    /// completed by it.
    pub(crate) fn push(&mut self, chunk: &str) -> Vec<String> {
        // Normalize CRLF up front; a \r\n pair may straddle two chunks, and
        // carriage returns never appear inside the JSON payloads we care
        // about.
        if chunk.contains('\r') {
            self.buffer.push_str(&chunk.replace('\r', ""));
        } else {
            self.buffer.push_str(chunk);
        }

        let mut payloads = Vec::new();
        // An event ends at a blank line.
        while let Some(pos) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..pos + 2).collect();
            if let Some(data) = Self::data_of(&event) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Join the `data:` lines of one raw event; `None` if it has none
    /// (comments, heartbeats).
    fn data_of(event: &str) -> Option<String> {
        let lines: Vec<&str> = event
            .lines()
            .filter_map(|line| {
                line.strip_prefix("data:")
                    .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
            })
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push("data: {\"cho").is_empty());
        let events = parser.push("ices\":[]}\n\n");
        assert_eq!(events, vec!["{\"choices\":[]}"]);
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut parser = SseParser::new();
        let events = parser.push("data: one\n\ndata: two\n\ndata: [DONE]\n\n");
        assert_eq!(events, vec!["one", "two", "[DONE]"]);
    }

    #[test]
    fn comments_and_heartbeats_are_skipped() {
        let mut parser = SseParser::new();
        let events = parser.push(": keep-alive\n\ndata: payload\n\n");
        assert_eq!(events, vec!["payload"]);
    }

    #[test]
    fn crlf_line_endings() {
        let mut parser = SseParser::new();
        let events = parser.push("data: payload\r\n\r\ndata: second\r\n\r\n");
        assert_eq!(events, vec!["payload", "second"]);
    }

    #[test]
    fn multiline_data_joined() {
        let mut parser = SseParser::new();
        let events = parser.push("data: first\ndata: second\n\n");
        assert_eq!(events, vec!["first\nsecond"]);
    }

    #[test]
    fn multibyte_char_split_across_chunks_stays_intact() {
        let mut parser = SseParser::new();
        let bytes = "data: café au lait\n\n".as_bytes();
        // Split inside the two-byte encoding of 'é'.
        let mid = bytes.iter().position(|b| *b == 0xc3).unwrap() + 1;
        assert!(parser.push_bytes(&bytes[..mid]).is_empty());
        let events = parser.push_bytes(&bytes[mid..]);
        assert_eq!(events, vec!["café au lait"]);
    }

    #[test]
    fn invalid_byte_sequence_does_not_stall() {
        let mut parser = SseParser::new();
        // 0xff can never start a UTF-8 sequence; the payload still flows.
        let mut bytes = b"data: a".to_vec();
        bytes.push(0xff);
        bytes.extend_from_slice(b"b\n\n");
        let events = parser.push_bytes(&bytes);
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with('a') && events[0].ends_with('b'));
    }
}
