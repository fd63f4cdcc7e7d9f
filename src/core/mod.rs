//! Core functionality for the completion gateway.
//!
//! This module contains fundamental components used throughout the application:
//! - Configuration management
//! - Error handling
//! - Rate limiting
//! - Metrics collection and request-context logging
//! - HTTP middleware

pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod rate_limiter;

// Re-export commonly used types
pub use cancel::StreamCancelHandle;
pub use config::{AppConfig, EndpointFamily, ProviderKind, ServerConfig};
pub use error::{AppError, ProviderError, RateLimitError, Result};
pub use logging::{get_provider_context, get_request_id, PROVIDER_CONTEXT, REQUEST_ID};
pub use metrics::{get_metrics, init_metrics, Metrics};
pub use middleware::{api_cors_middleware, request_id_middleware, MetricsMiddleware};
pub use rate_limiter::{store_from_config, InMemoryStore, RateDecision, RateLimitStore, RateLimiter, UpstashStore};
