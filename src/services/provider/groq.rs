//! Groq client (OpenAI-compatible chat completions).

use async_trait::async_trait;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};

use super::sse::sse_data_events;
use super::{upstream_error, CompletionProvider, TextStream};
use crate::core::config::{ProviderKind, ProviderSettings};
use crate::core::error::ProviderError;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Build the request body. An empty system text sends no system message.
fn chat_request<'a>(system_text: &'a str, user_text: &'a str, model: &'a str) -> ChatRequest<'a> {
    let mut messages = Vec::with_capacity(2);
    if !system_text.is_empty() {
        messages.push(ChatMessage {
            role: "system",
            content: system_text,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: user_text,
    });

    ChatRequest {
        model,
        stream: true,
        messages,
    }
}

/// Text carried by one `data:` payload; `None` for role-only or final chunks.
fn chunk_text(data: &str) -> Result<Option<String>, ProviderError> {
    let chunk: ChatChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::Decode(format!("{}: {}", e, data)))?;
    Ok(chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .reduce(|mut acc, next| {
            acc.push_str(&next);
            acc
        }))
}

pub struct GroqProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl GroqProvider {
    pub fn new(client: reqwest::Client, settings: &ProviderSettings) -> Self {
        Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        }
    }
}

#[async_trait]
impl CompletionProvider for GroqProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Groq
    }

    async fn generate(
        &self,
        system_text: &str,
        user_text: &str,
        model: &str,
    ) -> Result<TextStream, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingApiKey(ProviderKind::Groq))?;

        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&chat_request(system_text, user_text, model))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        tracing::debug!(model = %model, "Groq stream opened");

        let mut data = sse_data_events(response.bytes_stream());
        let stream = async_stream::try_stream! {
            while let Some(payload) = data.next().await {
                let payload = payload?;
                if payload.trim() == "[DONE]" {
                    break;
                }
                if let Some(text) = chunk_text(&payload)? {
                    yield text;
                }
            }
        };
        Ok(stream.boxed())
    }
}
