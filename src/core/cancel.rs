use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared between the stream adapter and the response body that carries it.
///
/// The adapter marks the handle completed once it has emitted its terminal
/// marker. The body wrapper cancels it when dropped; a cancel that arrives
/// after completion is ignored, so `is_cancelled` means the client left
/// before the stream finished.
#[derive(Clone, Default)]
pub struct StreamCancelHandle {
    cancelled: Arc<AtomicBool>,
    completed: Arc<AtomicBool>,
}

impl StreamCancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the stream as finished normally.
    pub fn mark_completed(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Record that the stream was abandoned. No-op once completed.
    pub fn cancel(&self) {
        if !self.is_completed() {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
