//! HTTP middleware for request ids, CORS on the API surface, and metrics.

use crate::core::logging::generate_request_id;
use crate::core::metrics::get_metrics;
use axum::{
    extract::{MatchedPath, Request},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request extension carrying the request id.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Extension type for storing the endpoint family in the response
#[derive(Clone, Debug)]
pub struct FamilyName(pub &'static str);

/// Extension type for storing provider name in response
#[derive(Clone, Debug)]
pub struct ProviderName(pub &'static str);

/// Holds one unit of the in-flight gauge.
///
/// Released on drop, so a request abandoned by its client before the
/// response head is ready still leaves the gauge.
struct ActiveRequestGuard {
    gauge: prometheus::Gauge,
}

impl ActiveRequestGuard {
    fn enter(endpoint: &str) -> Self {
        let gauge = get_metrics()
            .active_requests
            .with_label_values(&[endpoint]);
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Assign a request id, honouring a sane incoming `x-request-id`.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Permissive CORS for `/api/*`.
///
/// Preflight requests are answered directly; every other API response gets
/// `Access-Control-Allow-Origin: *`.
pub async fn api_cors_middleware(request: Request, next: Next) -> Response {
    if !request.uri().path().starts_with("/api") {
        return next.run(request).await;
    }

    if request.method() == Method::OPTIONS {
        return (
            StatusCode::OK,
            [
                (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
            ],
        )
            .into_response();
    }

    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

/// Middleware for tracking request metrics.
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    /// Track metrics for incoming requests.
    ///
    /// Duration covers time to the response head; streamed bodies keep
    /// flowing after this returns.
    pub async fn track_metrics(request: Request, next: Next) -> Response {
        let endpoint = request
            .extensions()
            .get::<MatchedPath>()
            .map(|path| path.as_str().to_string())
            .unwrap_or_else(|| "unmatched".to_string());
        let method = request.method().to_string();

        // Skip metrics endpoint itself to avoid recursion
        if endpoint == "/metrics" {
            return next.run(request).await;
        }

        let metrics = get_metrics();
        let _active = ActiveRequestGuard::enter(&endpoint);

        let start = Instant::now();
        let response = next.run(request).await;
        let duration = start.elapsed().as_secs_f64();
        let status_code = response.status().as_u16().to_string();

        let family = response
            .extensions()
            .get::<FamilyName>()
            .map(|f| f.0)
            .unwrap_or("none");
        let provider = response
            .extensions()
            .get::<ProviderName>()
            .map(|p| p.0)
            .unwrap_or("none");

        metrics
            .request_count
            .with_label_values(&[&method, &endpoint, family, provider, &status_code])
            .inc();
        metrics
            .request_duration
            .with_label_values(&[&method, &endpoint, family])
            .observe(duration);
        tracing::debug!(
            method = %method,
            endpoint = %endpoint,
            family = family,
            provider = provider,
            status = %status_code,
            duration_ms = (duration * 1000.0) as u64,
            "Request handled"
        );

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metrics::init_metrics;
    use axum::{body::Body, http::Request as HttpRequest, middleware, routing::get, Router};
    use tower::ServiceExt;

    async fn echo_request_id(request: Request) -> String {
        request
            .extensions()
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_request_id_is_generated() {
        let app = Router::new()
            .route("/id", get(echo_request_id))
            .layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(HttpRequest::builder().uri("/id").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response.headers()[REQUEST_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(header.len(), 36);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, header.as_bytes());
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let app = Router::new()
            .route("/id", get(echo_request_id))
            .layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/id")
                    .header(REQUEST_ID_HEADER, "caller-chosen-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "caller-chosen-id");
    }

    #[tokio::test]
    async fn test_cors_preflight_and_simple_responses() {
        let app = Router::new()
            .route("/api/thing", get(|| async { "ok" }))
            .route("/health", get(|| async { "ok" }))
            .layer(middleware::from_fn(api_cors_middleware));

        let preflight = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/thing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(preflight.status(), StatusCode::OK);
        assert_eq!(
            preflight.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET, OPTIONS"
        );
        assert_eq!(preflight.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS], "*");

        let api = app
            .clone()
            .oneshot(HttpRequest::builder().uri("/api/thing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(api.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let health = app
            .oneshot(HttpRequest::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(health
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_metrics_middleware_records_family() {
        init_metrics();

        async fn handler() -> Response {
            let mut response = "ok".into_response();
            response
                .extensions_mut()
                .insert(FamilyName("middleware-test"));
            response.extensions_mut().insert(ProviderName("groq"));
            response
        }

        let app = Router::new()
            .route("/tracked", get(handler))
            .layer(middleware::from_fn(MetricsMiddleware::track_metrics));

        let response = app
            .oneshot(HttpRequest::builder().uri("/tracked").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let count = get_metrics()
            .request_count
            .with_label_values(&["GET", "/tracked", "middleware-test", "groq", "200"])
            .get();
        assert_eq!(count, 1);
        assert_eq!(
            get_metrics()
                .active_requests
                .with_label_values(&["/tracked"])
                .get(),
            0.0
        );
    }

    #[tokio::test]
    async fn test_abandoned_request_leaves_active_gauge() {
        init_metrics();

        let app = Router::new()
            .route(
                "/stalled",
                get(|| async {
                    std::future::pending::<()>().await;
                    "unreachable"
                }),
            )
            .layer(middleware::from_fn(MetricsMiddleware::track_metrics));

        let in_flight = app.oneshot(HttpRequest::builder().uri("/stalled").body(Body::empty()).unwrap());
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(50), in_flight).await;
        assert!(timed_out.is_err());

        assert_eq!(
            get_metrics()
                .active_requests
                .with_label_values(&["/stalled"])
                .get(),
            0.0
        );
    }
}
