//! Text-generation provider clients.
//!
//! Every provider turns a system text, user text and model name into a
//! stream of text chunks. The rest of the gateway only sees
//! [`CompletionProvider`], so tests can substitute scripted providers.

pub mod gemini;
pub mod groq;
pub mod sse;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

use crate::core::config::{AppConfig, ProviderKind};
use crate::core::error::ProviderError;

pub use gemini::GeminiProvider;
pub use groq::GroqProvider;

/// Lazily produced text chunks. An `Err` item means the stream broke.
pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Start a streaming generation.
    ///
    /// Returns once the provider has accepted the call. Errors returned here
    /// happen before any output; errors inside the stream happen mid-way.
    async fn generate(
        &self,
        system_text: &str,
        user_text: &str,
        model: &str,
    ) -> Result<TextStream, ProviderError>;
}

/// One client per provider kind.
#[derive(Clone)]
pub struct ProviderRegistry {
    groq: Arc<dyn CompletionProvider>,
    gemini: Arc<dyn CompletionProvider>,
}

impl ProviderRegistry {
    pub fn new(groq: Arc<dyn CompletionProvider>, gemini: Arc<dyn CompletionProvider>) -> Self {
        Self { groq, gemini }
    }

    /// Real HTTP clients sharing one connection pool.
    pub fn from_config(config: &AppConfig, http_client: reqwest::Client) -> Self {
        Self::new(
            Arc::new(GroqProvider::new(http_client.clone(), &config.groq)),
            Arc::new(GeminiProvider::new(http_client, &config.gemini)),
        )
    }

    pub fn get(&self, kind: ProviderKind) -> Arc<dyn CompletionProvider> {
        match kind {
            ProviderKind::Groq => self.groq.clone(),
            ProviderKind::Gemini => self.gemini.clone(),
        }
    }
}

/// Read an error body without letting a second failure mask the first.
pub(crate) async fn upstream_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ProviderError::Upstream { status, body }
}
