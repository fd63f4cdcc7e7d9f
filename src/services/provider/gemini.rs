//! Google Gemini client (`streamGenerateContent` over SSE).

use async_trait::async_trait;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};

use super::sse::sse_data_events;
use super::{upstream_error, CompletionProvider, TextStream};
use crate::core::config::{ProviderKind, ProviderSettings};
use crate::core::error::ProviderError;

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Build the request body.
///
/// The system text travels as a leading part of the single user turn, which
/// every Gemini model accepts.
fn generate_request<'a>(system_text: &'a str, user_text: &'a str) -> GenerateRequest<'a> {
    let mut parts = Vec::with_capacity(2);
    if !system_text.is_empty() {
        parts.push(Part { text: system_text });
    }
    parts.push(Part { text: user_text });

    GenerateRequest {
        contents: vec![Content {
            role: "user",
            parts,
        }],
    }
}

fn chunk_text(data: &str) -> Result<Option<String>, ProviderError> {
    let chunk: GenerateChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::Decode(format!("{}: {}", e, data)))?;

    if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderError::Decode(format!("prompt blocked: {}", reason)));
    }

    let text: String = chunk
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .filter_map(|part| part.text)
        .collect();

    Ok((!text.is_empty()).then_some(text))
}

pub struct GeminiProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl GeminiProvider {
    pub fn new(client: reqwest::Client, settings: &ProviderSettings) -> Self {
        Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        }
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.api_base, model
        )
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
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
            .ok_or(ProviderError::MissingApiKey(ProviderKind::Gemini))?;

        let response = self
            .client
            .post(self.stream_url(model))
            .header("x-goog-api-key", api_key)
            .json(&generate_request(system_text, user_text))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        tracing::debug!(model = %model, "Gemini stream opened");

        let mut data = sse_data_events(response.bytes_stream());
        let stream = async_stream::try_stream! {
            while let Some(payload) = data.next().await {
                let payload = payload?;
                if let Some(text) = chunk_text(&payload)? {
                    yield text;
                }
            }
        };
        Ok(stream.boxed())
    }
}
