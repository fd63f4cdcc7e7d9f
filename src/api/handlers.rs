//! HTTP request handlers for the completion API.
//!
//! Every completion endpoint runs the same pipeline with its own policy:
//! client identity, rate check, body parsing, prompt assembly, routing,
//! provider call and stream relay.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, FromRequest, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use prometheus::{Encoder, TextEncoder};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::api::client_identity::resolve_client_key;
use crate::api::models::{CompletionRequest, EndpointSummary, HealthResponse};
use crate::api::streaming::{adapt, stream_response, RoutingMetadata, StreamContext};
use crate::core::cancel::StreamCancelHandle;
use crate::core::config::{AppConfig, EndpointFamily};
use crate::core::error::{AppError, Result};
use crate::core::logging::{client_digest, generate_request_id, PROVIDER_CONTEXT};
use crate::core::metrics::get_metrics;
use crate::core::middleware::{FamilyName, ProviderName, RequestId};
use crate::core::rate_limiter::{RateLimitStore, RateLimiter};
use crate::services::prompt::assemble;
use crate::services::provider::ProviderRegistry;
use crate::services::router::ModelRouter;
use crate::with_request_context;

/// Shared application state.
pub struct AppState {
    pub config: AppConfig,
    pub providers: ProviderRegistry,
    pub router: ModelRouter,
    limiters: HashMap<EndpointFamily, RateLimiter>,
}

impl AppState {
    /// Build state with one limiter per endpoint family over a shared store.
    ///
    /// `store` is `None` when rate limiting is disabled.
    pub fn new(
        config: AppConfig,
        providers: ProviderRegistry,
        store: Option<Arc<dyn RateLimitStore>>,
    ) -> Self {
        let limiters = config
            .endpoints
            .iter()
            .map(|policy| {
                (
                    policy.family,
                    RateLimiter::new(store.clone(), policy.rate_limit),
                )
            })
            .collect();
        let router = ModelRouter::new(&config.endpoints);

        Self {
            config,
            providers,
            router,
            limiters,
        }
    }

    pub fn limiter(&self, family: EndpointFamily) -> &RateLimiter {
        // `new` builds a limiter for every family.
        &self.limiters[&family]
    }
}

/// The parts of a completion request the pipeline needs.
///
/// The body is left unread so the rate check runs before it is buffered.
pub struct CompletionCall {
    pub headers: HeaderMap,
    pub remote: Option<SocketAddr>,
    pub request_id: String,
    request: Request,
}

impl CompletionCall {
    /// Buffer the body, honouring the router's body limit.
    pub async fn read_body(self) -> Result<Bytes> {
        Bytes::from_request(self.request, &())
            .await
            .map_err(|rejection| match rejection.status() {
                StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge,
                _ => AppError::BadRequest(rejection.body_text()),
            })
    }
}

#[axum::async_trait]
impl<S> FromRequest<S> for CompletionCall
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(request: Request, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        let remote = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_else(generate_request_id);
        let headers = request.headers().clone();

        Ok(Self {
            headers,
            remote,
            request_id,
            request,
        })
    }
}

/// Run the completion pipeline for one endpoint family.
#[tracing::instrument(
    name = "completion",
    skip(state, call),
    fields(family = %family, request_id = %call.request_id)
)]
pub async fn handle_completion(
    state: Arc<AppState>,
    family: EndpointFamily,
    call: CompletionCall,
) -> Response {
    let request_id = call.request_id.clone();
    let result = with_request_context!(request_id, process_completion(&state, family, call));

    let mut response = result.unwrap_or_else(|e| e.into_response());
    response.extensions_mut().insert(FamilyName(family.as_str()));
    response
}

async fn process_completion(
    state: &AppState,
    family: EndpointFamily,
    call: CompletionCall,
) -> Result<Response> {
    let policy = state.config.endpoints.get(family);
    let metrics = get_metrics();

    let limiter = state.limiter(family);
    if limiter.is_enabled() {
        let key = resolve_client_key(
            policy.identity,
            &call.headers,
            call.remote,
            &policy.key_suffix,
        );

        let decision = match limiter.limit(&key).await {
            Ok(decision) => decision,
            Err(e) => {
                metrics
                    .rate_limit_decisions
                    .with_label_values(&[family.as_str(), "error"])
                    .inc();
                return Err(e.into());
            }
        };

        let outcome = if decision.allowed { "allowed" } else { "denied" };
        metrics
            .rate_limit_decisions
            .with_label_values(&[family.as_str(), outcome])
            .inc();

        if !decision.allowed {
            tracing::info!(
                client = %client_digest(&key),
                limit = decision.limit,
                "Completion request rejected by rate limit"
            );
            return Err(AppError::RateLimitExceeded(decision));
        }
    }

    let request_id = call.request_id.clone();
    let body = call.read_body().await?;
    let request = CompletionRequest::from_body(&body)?;

    let system_prompt = if policy.accepts_system_prompt {
        request.system_prompt.as_deref()
    } else {
        None
    };
    let assembled = assemble(
        &request.prompt,
        request.context.as_deref(),
        system_prompt,
        policy.preamble.as_deref(),
    );
    let combined_len = assembled.combined_len;
    let decision = state.router.route(family, assembled);

    tracing::info!(
        provider = %decision.provider,
        model = %decision.model,
        combined_len = combined_len,
        "Routing completion request"
    );

    let provider = state.providers.get(decision.provider);
    let provider_label = decision.provider.as_str();
    let started = Instant::now();

    let upstream = PROVIDER_CONTEXT
        .scope(
            provider_label.to_string(),
            provider.generate(&decision.system_text, &decision.user_text, &decision.model),
        )
        .await;

    metrics
        .provider_latency
        .with_label_values(&[provider_label])
        .observe(started.elapsed().as_secs_f64());
    let outcome = if upstream.is_ok() { "ok" } else { "error" };
    metrics
        .provider_requests
        .with_label_values(&[provider_label, decision.model.as_str(), outcome])
        .inc();

    let upstream = upstream?;

    let side_data = policy.side_data.then(|| {
        RoutingMetadata {
            request_id: request_id.clone(),
            provider: decision.provider,
            model: decision.model.clone(),
        }
        .to_value()
    });

    let cancel = StreamCancelHandle::new();
    let events = adapt(
        upstream,
        side_data,
        cancel.clone(),
        StreamContext {
            request_id,
            provider: decision.provider,
            model: decision.model,
            started,
        },
    );

    let mut response = stream_response(events, cancel, decision.provider);
    response
        .extensions_mut()
        .insert(ProviderName(provider_label));
    Ok(response)
}

/// `POST /api/completion/default`: fixed model, no caller instructions.
pub async fn default_completion(
    State(state): State<Arc<AppState>>,
    call: CompletionCall,
) -> Response {
    handle_completion(state, EndpointFamily::Default, call).await
}

/// `POST /api/completion/alt-model`: length-routed, accepts `systemPrompt`.
pub async fn alt_model_completion(
    State(state): State<Arc<AppState>>,
    call: CompletionCall,
) -> Response {
    handle_completion(state, EndpointFamily::AltModel, call).await
}

/// `POST /api/completion/provider-b`
pub async fn provider_b_completion(
    State(state): State<Arc<AppState>>,
    call: CompletionCall,
) -> Response {
    handle_completion(state, EndpointFamily::ProviderB, call).await
}

/// `POST /api/completion/advisory`: fixed policy, identity from the referring site.
pub async fn advisory_completion(
    State(state): State<Arc<AppState>>,
    call: CompletionCall,
) -> Response {
    handle_completion(state, EndpointFamily::Advisory, call).await
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let endpoints = state
        .config
        .endpoints
        .iter()
        .map(|policy| EndpointSummary {
            family: policy.family.as_str().to_string(),
            requests: policy.rate_limit.requests,
            window_secs: policy.rate_limit.window_secs,
        })
        .collect();

    Json(HealthResponse {
        status: "ok".to_string(),
        rate_limit: state.config.rate_limit_store.label().to_string(),
        endpoints,
    })
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler() -> Result<Response> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RateLimitWindow;
    use crate::core::rate_limiter::InMemoryStore;

    #[test]
    fn test_state_builds_limiter_per_family() {
        let config = AppConfig::default();
        let providers = ProviderRegistry::from_config(&config, reqwest::Client::new());

        let disabled = AppState::new(config.clone(), providers.clone(), None);
        for family in EndpointFamily::ALL {
            assert!(!disabled.limiter(family).is_enabled());
        }

        let store: Arc<dyn RateLimitStore> = Arc::new(InMemoryStore::new());
        let enabled = AppState::new(config, providers, Some(store));
        match enabled.limiter(EndpointFamily::Advisory) {
            RateLimiter::Enabled { window, .. } => {
                assert_eq!(*window, RateLimitWindow::new(50, 300))
            }
            RateLimiter::Disabled => panic!("advisory limiter should be enabled"),
        }
    }

    #[tokio::test]
    async fn test_health_reports_rate_limit_mode() {
        let config = AppConfig::default();
        let providers = ProviderRegistry::from_config(&config, reqwest::Client::new());
        let state = Arc::new(AppState::new(config, providers, None));

        let Json(body) = health(State(state)).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.rate_limit, "disabled");
        assert_eq!(body.endpoints.len(), 4);
    }
}
