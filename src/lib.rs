//! Completion Gateway - a streaming front door for hosted LLM completions
//!
//! This library provides an HTTP service that turns a browser's prompt into a
//! streamed model completion, with features including:
//!
//! - **Sliding-window rate limiting**: per-client quotas backed by Upstash Redis
//!   or an in-process store
//! - **Length-based model routing**: long requests go to larger-context models
//! - **Streaming support**: provider SSE streams relayed as a line-oriented
//!   data stream with a guaranteed terminal marker
//! - **Metrics & monitoring**: Prometheus metrics for observability
//!
//! # Architecture
//!
//! The codebase is organized into three main layers:
//!
//! - [`core`]: Core functionality (config, errors, rate limiting, metrics, middleware)
//! - [`api`]: HTTP handlers, client identity, streaming and request models
//! - [`services`]: Prompt assembly, model routing and provider clients
//!
//! # Configuration
//!
//! Settings are read from the environment (and an optional `.env` file):
//! - `OPENAI_API_KEY`: Groq API key
//! - `GOOGLE_API_KEY`: Gemini API key
//! - `KV_REST_API_URL` / `KV_REST_API_TOKEN`: Upstash store (rate limiting is
//!   disabled when absent, unless `RATE_LIMIT_BACKEND=memory`)
//! - `HOST`: Server bind address (default: 0.0.0.0)
//! - `PORT`: Server port (default: 18000)
//! - `VERIFY_SSL`: Verify SSL certificates for upstream (default: true)
//! - `REQUEST_TIMEOUT_SECS`: Request timeout in seconds (default: 300)

pub mod api;
pub mod core;
pub mod services;

// Re-export commonly used types for convenience
pub use api::{build_router, AppState, CompletionRequest, StreamEvent};
pub use core::{AppConfig, AppError, EndpointFamily, ProviderKind, Result};
pub use services::{CompletionProvider, ModelRouter, ProviderRegistry};
