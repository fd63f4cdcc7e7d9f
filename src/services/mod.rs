//! Business logic services for the completion gateway.
//!
//! Prompt assembly and model routing are pure functions of the request;
//! the provider clients are the only components that talk to upstream
//! generation APIs.

pub mod prompt;
pub mod provider;
pub mod router;

// Re-export commonly used types
pub use prompt::{assemble, AssembledPrompt, ADVISORY_POLICY};
pub use provider::{CompletionProvider, ProviderRegistry, TextStream};
pub use router::{ModelRouter, RoutingDecision};
