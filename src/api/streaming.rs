//! Streaming response support.
//!
//! A provider's text stream is adapted into [`StreamEvent`]s and encoded as
//! the line-oriented data-stream protocol browser clients consume:
//!
//! ```text
//! 0:"Hel"
//! 0:"lo"
//! 2:[{"requestId":"…","provider":"groq","model":"llama3-70b-8192"}]
//! d:{"finishReason":"stop"}
//! ```

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue};
use axum::response::Response;
use futures::stream::{BoxStream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Instant;

use crate::api::disconnect::DisconnectStream;
use crate::core::cancel::StreamCancelHandle;
use crate::core::config::ProviderKind;
use crate::core::metrics::get_metrics;
use crate::services::provider::TextStream;

const TOKEN_PREFIX: &str = "0:";
const DATA_PREFIX: &str = "2:";
const DONE_PREFIX: &str = "d:";

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Error => "error",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "stop" => Some(FinishReason::Stop),
            "error" => Some(FinishReason::Error),
            _ => None,
        }
    }
}

/// One unit of the outbound stream. Exactly one `Done` ends every stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token(String),
    SideData(Value),
    Done(FinishReason),
}

/// Routing metadata sent as side data before the terminal marker.
#[derive(Debug, Clone)]
pub struct RoutingMetadata {
    pub request_id: String,
    pub provider: ProviderKind,
    pub model: String,
}

impl RoutingMetadata {
    pub fn to_value(&self) -> Value {
        json!({
            "requestId": self.request_id,
            "provider": self.provider.as_str(),
            "model": self.model,
        })
    }
}

/// Per-stream details for logs and metrics.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub request_id: String,
    pub provider: ProviderKind,
    pub model: String,
    pub started: Instant,
}

/// Encode one event as a protocol line.
pub fn encode_event(event: &StreamEvent) -> Bytes {
    let line = match event {
        StreamEvent::Token(text) => format!("{}{}\n", TOKEN_PREFIX, Value::from(text.as_str())),
        StreamEvent::SideData(data) => {
            format!("{}{}\n", DATA_PREFIX, Value::Array(vec![data.clone()]))
        }
        StreamEvent::Done(reason) => format!(
            "{}{}\n",
            DONE_PREFIX,
            json!({ "finishReason": reason.as_str() })
        ),
    };
    Bytes::from(line)
}

/// Decode one protocol line (without its trailing newline).
pub fn decode_event_line(line: &str) -> Option<StreamEvent> {
    if let Some(payload) = line.strip_prefix(TOKEN_PREFIX) {
        let text: String = serde_json::from_str(payload).ok()?;
        return Some(StreamEvent::Token(text));
    }
    if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
        let mut items: Vec<Value> = serde_json::from_str(payload).ok()?;
        return (items.len() == 1).then(|| StreamEvent::SideData(items.remove(0)));
    }
    if let Some(payload) = line.strip_prefix(DONE_PREFIX) {
        let done: Value = serde_json::from_str(payload).ok()?;
        let reason = FinishReason::parse(done.get("finishReason")?.as_str()?)?;
        return Some(StreamEvent::Done(reason));
    }
    None
}

/// Relay provider chunks as events.
///
/// Empty chunks are skipped. A provider error ends the stream with
/// `Done(Error)` and no side data. If the client goes away the body drops
/// this stream, and the provider stream with it.
pub fn adapt(
    mut upstream: TextStream,
    side_data: Option<Value>,
    cancel: StreamCancelHandle,
    ctx: StreamContext,
) -> BoxStream<'static, StreamEvent> {
    let stream = async_stream::stream! {
        let metrics = get_metrics();
        let provider = ctx.provider.as_str();
        let mut chunks: u64 = 0;

        loop {
            match upstream.next().await {
                Some(Ok(text)) => {
                    if text.is_empty() {
                        continue;
                    }
                    if chunks == 0 {
                        metrics
                            .ttft
                            .with_label_values(&[provider, ctx.model.as_str()])
                            .observe(ctx.started.elapsed().as_secs_f64());
                    }
                    chunks += 1;
                    metrics.stream_chunks.with_label_values(&[provider]).inc();
                    yield StreamEvent::Token(text);
                }
                Some(Err(e)) => {
                    tracing::error!(
                        request_id = %ctx.request_id,
                        provider = provider,
                        model = %ctx.model,
                        chunks = chunks,
                        error = %e,
                        "Provider stream failed"
                    );
                    metrics
                        .stream_outcomes
                        .with_label_values(&[provider, "error"])
                        .inc();
                    cancel.mark_completed();
                    yield StreamEvent::Done(FinishReason::Error);
                    return;
                }
                None => break,
            }
        }

        if let Some(data) = side_data {
            yield StreamEvent::SideData(data);
        }

        tracing::info!(
            request_id = %ctx.request_id,
            provider = provider,
            model = %ctx.model,
            chunks = chunks,
            duration_ms = ctx.started.elapsed().as_millis() as u64,
            "Completion stream finished"
        );
        metrics
            .stream_outcomes
            .with_label_values(&[provider, "completed"])
            .inc();
        cancel.mark_completed();
        yield StreamEvent::Done(FinishReason::Stop);
    };
    stream.boxed()
}

/// Build the streaming HTTP response for an event stream.
pub fn stream_response(
    events: BoxStream<'static, StreamEvent>,
    cancel: StreamCancelHandle,
    provider: ProviderKind,
) -> Response {
    let bytes = events.map(|event| Ok::<_, Infallible>(encode_event(&event)));
    let body = Body::from_stream(DisconnectStream {
        stream: bytes,
        cancel_handle: cancel,
        provider: provider.as_str(),
    });

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        "x-experimental-stream-data",
        HeaderValue::from_static("true"),
    );
    response
}
