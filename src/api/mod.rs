//! API layer for the completion gateway.
//!
//! This module contains the HTTP handlers, request/response models,
//! client identity resolution and streaming support for the endpoints.

pub mod client_identity;
pub mod disconnect;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod streaming;

// Re-export commonly used types
pub use client_identity::resolve_client_key;
pub use handlers::{
    advisory_completion, alt_model_completion, default_completion, health, metrics_handler,
    provider_b_completion, AppState, CompletionCall,
};
pub use models::{CompletionRequest, HealthResponse};
pub use routes::build_router;
pub use streaming::{decode_event_line, encode_event, FinishReason, StreamEvent};
