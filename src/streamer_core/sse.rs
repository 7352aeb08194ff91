//! Server-Sent Events client over `reqwest`
//!
//! Lines end in `\n` (a trailing `\r` is dropped). `data:` lines accumulate
//! and an event is dispatched on the blank line that follows. Chunk
//! boundaries can split lines, including inside a UTF-8 sequence, so raw
//! bytes are buffered until a full line is available. Lines and events are
//! capped so a server that never terminates one cannot grow the buffers
//! without bound.

use super::source::{EventSource, IngestError, MessageStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::collections::VecDeque;
use std::time::Duration;

pub const MAX_LINE_BYTES: usize = 1024 * 1024;
pub const MAX_EVENT_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
    data_bytes: usize,
    max_line: usize,
    max_event: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limits(MAX_LINE_BYTES, MAX_EVENT_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_line: usize, max_event: usize) -> Self {
        Self {
            pending: Vec::new(),
            data: Vec::new(),
            data_bytes: 0,
            max_line,
            max_event,
        }
    }

    /// Feed one network chunk; returns the data of every event it completed.
    /// Exceeding a size cap is a stream error: the connection is not worth
    /// keeping.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, IngestError> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            if pos > self.max_line {
                return Err(self.line_too_long(pos));
            }
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.handle_line(&line)? {
                events.push(event);
            }
        }

        if self.pending.len() > self.max_line {
            return Err(self.line_too_long(self.pending.len()));
        }
        Ok(events)
    }

    fn line_too_long(&self, len: usize) -> IngestError {
        IngestError::Stream(format!("SSE line of {} bytes exceeds {} byte limit", len, self.max_line))
    }

    fn handle_line(&mut self, line: &str) -> Result<Option<String>, IngestError> {
        if line.is_empty() {
            if self.data.is_empty() {
                return Ok(None);
            }
            let data = self.data.join("\n");
            self.data.clear();
            self.data_bytes = 0;
            return Ok(if data.is_empty() { None } else { Some(data) });
        }

        if line.starts_with(':') {
            return Ok(None);
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        if field == "data" {
            self.data_bytes += value.len() + 1;
            if self.data_bytes > self.max_event {
                return Err(IngestError::Stream(format!(
                    "SSE event exceeds {} byte limit",
                    self.max_event
                )));
            }
            self.data.push(value.to_string());
        }
        Ok(None)
    }
}

pub struct SseSource {
    client: reqwest::Client,
    url: String,
}

impl SseSource {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("wikiflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::Connect(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EventSource for SseSource {
    async fn connect(&self) -> Result<MessageStream, IngestError> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| IngestError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Connect(format!("HTTP {} from {}", status, self.url)));
        }

        let bytes = response.bytes_stream().boxed();
        let state = (Some(bytes), SseDecoder::new(), VecDeque::<String>::new());

        // the first error ends the stream
        let stream = futures_util::stream::unfold(state, |(bytes, mut decoder, mut ready)| async move {
            let mut bytes = bytes?;
            loop {
                if let Some(event) = ready.pop_front() {
                    return Some((Ok(event), (Some(bytes), decoder, ready)));
                }
                let failure = match bytes.next().await {
                    Some(Ok(chunk)) => match decoder.push(&chunk) {
                        Ok(events) => {
                            ready.extend(events);
                            continue;
                        }
                        Err(e) => e,
                    },
                    Some(Err(e)) => IngestError::Stream(e.to_string()),
                    None => return None,
                };
                return Some((Err(failure), (None, decoder, ready)));
            }
        });

        Ok(stream.boxed())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_dispatches_on_blank_line() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: message\nid: [{\"offset\":1}]\ndata: {\"a\":1}\n\n").unwrap();
        assert_eq!(events, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn test_decoder_handles_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"dom").unwrap().is_empty());
        assert!(decoder.push(b"ain\":\"x\"}\r\n").unwrap().is_empty());
        let events = decoder.push(b"\r\n").unwrap();
        assert_eq!(events, vec!["{\"domain\":\"x\"}".to_string()]);
    }

    #[test]
    fn test_decoder_joins_multiline_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: line1\ndata:line2\n\n").unwrap();
        assert_eq!(events, vec!["line1\nline2".to_string()]);
    }

    #[test]
    fn test_decoder_ignores_comments_and_empty_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keepalive\n\nevent: ping\n\ndata:\n\ndata: ok\n\n").unwrap();
        assert_eq!(events, vec!["ok".to_string()]);
    }

    #[test]
    fn test_decoder_utf8_split_across_chunks() {
        let payload = "data: {\"title\":\"Zürich\"}\n\n".as_bytes();
        let split = payload.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&payload[..split]).unwrap().is_empty());
        let events = decoder.push(&payload[split..]).unwrap();
        assert_eq!(events, vec!["{\"title\":\"Zürich\"}".to_string()]);
    }

    #[test]
    fn test_decoder_rejects_unterminated_line() {
        let mut decoder = SseDecoder::with_limits(16, 64);
        assert!(decoder.push(b"data: 0123456").unwrap().is_empty());

        let err = decoder.push(b"789abcdef").unwrap_err();
        assert!(matches!(err, IngestError::Stream(_)));
    }

    #[test]
    fn test_decoder_rejects_oversized_event() {
        let mut decoder = SseDecoder::with_limits(16, 20);
        assert!(decoder.push(b"data: 0123456789\n").unwrap().is_empty());

        // second data line pushes the pending event past the cap, no blank line needed
        assert!(decoder.push(b"data: 0123456789\n").is_err());
    }

    #[test]
    fn test_decoder_limit_resets_per_event() {
        let mut decoder = SseDecoder::with_limits(16, 20);
        for _ in 0..5 {
            let events = decoder.push(b"data: 0123456789\n\n").unwrap();
            assert_eq!(events, vec!["0123456789".to_string()]);
        }
    }
}
