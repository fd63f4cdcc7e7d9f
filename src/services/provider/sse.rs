//! Incremental parser for upstream Server-Sent Events.

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::core::error::ProviderError;

/// A parsed SSE event. Only the fields providers actually send are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: Option<String>,
}

/// Buffers raw bytes and yields complete events.
///
/// Bytes are buffered before decoding so a UTF-8 sequence split across
/// network chunks is never lost.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it.
    pub fn parse(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer
            .extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let block = String::from_utf8_lossy(&block[..pos]);
            if let Some(event) = parse_block(&block) {
                events.push(event);
            }
        }
        events
    }

    /// Parse whatever is left once the upstream closes without a final blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let block = String::from_utf8_lossy(&rest);
        parse_block(block.trim_end_matches('\n'))
    }
}

fn find_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event.event = Some(value.to_string()),
            "data" => match event.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => event.data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    (event.data.is_some() || event.event.is_some()).then_some(event)
}

/// Turn a provider byte stream into the `data` payloads of its SSE events.
pub fn sse_data_events<S>(bytes: S) -> BoxStream<'static, Result<String, ProviderError>>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let stream = async_stream::try_stream! {
        let mut parser = SseParser::new();
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(ProviderError::from)?;
            for event in parser.parse(&chunk) {
                if let Some(data) = event.data {
                    yield data;
                }
            }
        }

        if let Some(data) = parser.finish().and_then(|event| event.data) {
            yield data;
        }
    };
    stream.boxed()
}
