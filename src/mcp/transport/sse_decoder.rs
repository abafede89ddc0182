// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Incremental `text/event-stream` decoder.
//!
//! Works on raw bytes so a multi-byte character split across two network
//! chunks is never mangled; text is only decoded once a whole record (ended
//! by a blank line) is buffered.

/// One dispatched SSE record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; `None` means the default `message` type.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// Whether this record carries a JSON-RPC payload.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

/// Buffers partial records across chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every record it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = find_record_end(&self.buf) {
            let record: Vec<u8> = self.buf.drain(..end + 2).collect();
            if let Some(event) = parse_record(&record[..end]) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing record that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buf);
        parse_record(&rest)
    }

    /// Bytes buffered but not yet dispatched.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn find_record_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_record(bytes: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(bytes);
    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event.event = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() && event.event.is_none() {
        // Comment-only keep-alive.
        return None;
    }
    event.data = data_lines.join("\n");
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_record() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert!(events[0].is_message());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_record_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: mess").is_empty());
        assert!(decoder.push(b"age\ndata: {\"x\"").is_empty());
        assert!(decoder.push(b":2}\n").is_empty());
        let events = decoder.push(b"\ndata: next\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data, "{\"x\":2}");
        assert_eq!(events[1].data, "next");
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let payload = "data: héllo\n\n".as_bytes();
        let split = payload.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&payload[..split]).is_empty());
        let events = decoder.push(&payload[split..]);
        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn test_crlf_comments_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\r\n\r\nid: 7\r\ndata: line1\r\ndata: line2\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn test_endpoint_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: endpoint\ndata: /messages?session=abc\n\n");
        assert!(!events[0].is_message());
        assert_eq!(events[0].data, "/messages?session=abc");
    }

    #[test]
    fn test_finish_flushes_unterminated_record() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish().unwrap().data, "tail");
        assert!(decoder.finish().is_none());
    }
}
