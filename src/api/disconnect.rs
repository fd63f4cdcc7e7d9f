use crate::core::cancel::StreamCancelHandle;
use crate::core::metrics::get_metrics;
use axum::body::Bytes;
use futures::stream::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A stream wrapper that triggers a cancellation handle when dropped.
///
/// Axum drops the response body when the client goes away, so a drop
/// before the stream marked itself completed means the caller disconnected.
pub struct DisconnectStream<S> {
    pub stream: S,
    pub cancel_handle: StreamCancelHandle,
    pub provider: &'static str,
}

impl<S, E> Stream for DisconnectStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

impl<S> Drop for DisconnectStream<S> {
    fn drop(&mut self) {
        if !self.cancel_handle.is_completed() {
            tracing::info!(provider = self.provider, "Client disconnected mid-stream");
            get_metrics()
                .stream_outcomes
                .with_label_values(&[self.provider, "disconnected"])
                .inc();
        }
        self.cancel_handle.cancel();
    }
}
