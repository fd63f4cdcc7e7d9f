//! Request and response models for the completion API.

use axum::body::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::error::AppError;

/// Body accepted by every completion endpoint.
///
/// Endpoints that do not honour caller instructions ignore `system_prompt`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(
        default,
        rename = "systemPrompt",
        skip_serializing_if = "Option::is_none"
    )]
    pub system_prompt: Option<String>,
}

impl CompletionRequest {
    /// Parse a raw request body.
    ///
    /// Invalid JSON, a missing `prompt` and an empty `prompt` are all bad
    /// requests.
    pub fn from_body(body: &Bytes) -> Result<Self, AppError> {
        let request: CompletionRequest = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("invalid request body: {}", e)))?;

        if request.prompt.is_empty() {
            return Err(AppError::BadRequest("prompt must not be empty".to_string()));
        }
        Ok(request)
    }
}

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub rate_limit: String,
    pub endpoints: Vec<EndpointSummary>,
}

/// Public view of one endpoint policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSummary {
    pub family: String,
    pub requests: u32,
    pub window_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_full_request() {
        let body = Bytes::from(
            r#"{"prompt":"Summarize","context":"Long text","systemPrompt":"Use French"}"#,
        );
        let request = CompletionRequest::from_body(&body).unwrap();
        assert_eq!(request.prompt, "Summarize");
        assert_eq!(request.context.as_deref(), Some("Long text"));
        assert_eq!(request.system_prompt.as_deref(), Some("Use French"));
    }

    #[test]
    fn test_parse_prompt_only_and_unknown_fields() {
        let body = Bytes::from(r#"{"prompt":"Explain gravity","stream":true}"#);
        let request = CompletionRequest::from_body(&body).unwrap();
        assert_eq!(request.context, None);
        assert_eq!(request.system_prompt, None);
    }

    #[test]
    fn test_reject_malformed_bodies() {
        for body in [
            "",
            "not json",
            r#"{"context":"c"}"#,
            r#"{"prompt":""}"#,
            r#"{"prompt":42}"#,
            r#"[]"#,
        ] {
            assert_matches!(
                CompletionRequest::from_body(&Bytes::from(body)),
                Err(AppError::BadRequest(_)),
                "body {:?} should be rejected",
                body
            );
        }
    }

    #[test]
    fn test_null_context_is_absent() {
        let body = Bytes::from(r#"{"prompt":"p","context":null}"#);
        let request = CompletionRequest::from_body(&body).unwrap();
        assert_eq!(request.context, None);
    }
}
