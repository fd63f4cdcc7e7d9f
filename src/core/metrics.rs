//! Prometheus metrics for monitoring the completion gateway.
//!
//! This module provides a centralized metrics registry tracking requests,
//! rate-limit decisions, provider calls and stream outcomes.

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, GaugeVec, HistogramVec,
    IntCounterVec,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of requests by method, endpoint, family, provider, and status
    pub request_count: IntCounterVec,

    /// Request duration histogram in seconds (time to first byte for streams)
    pub request_duration: HistogramVec,

    /// Number of currently active requests by endpoint
    pub active_requests: GaugeVec,

    /// Rate limit checks by endpoint family and outcome (allowed, denied, error)
    pub rate_limit_decisions: IntCounterVec,

    /// Provider calls by provider, model, and outcome (ok, error)
    pub provider_requests: IntCounterVec,

    /// Time until the provider accepted the call, in seconds
    pub provider_latency: HistogramVec,

    /// Time to first token (TTFT) histogram in seconds
    pub ttft: HistogramVec,

    /// Text chunks relayed to callers by provider
    pub stream_chunks: IntCounterVec,

    /// Finished streams by provider and outcome (completed, error, disconnected)
    pub stream_outcomes: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// Subsequent calls return the same instance.
///
/// # Examples
///
/// ```no_run
/// use completion_gateway::core::metrics::init_metrics;
///
/// let metrics = init_metrics();
/// metrics.rate_limit_decisions.with_label_values(&["advisory", "allowed"]).inc();
/// ```
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "completion_gateway_requests_total",
            "Total number of requests",
            &["method", "endpoint", "family", "provider", "status_code"]
        )
        .expect("Failed to register request_count metric");

        let request_duration = register_histogram_vec!(
            "completion_gateway_request_duration_seconds",
            "Request duration in seconds",
            &["method", "endpoint", "family"],
            vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
        )
        .expect("Failed to register request_duration metric");

        let active_requests = register_gauge_vec!(
            "completion_gateway_active_requests",
            "Number of active requests",
            &["endpoint"]
        )
        .expect("Failed to register active_requests metric");

        let rate_limit_decisions = register_int_counter_vec!(
            "completion_gateway_rate_limit_decisions_total",
            "Rate limit decisions by endpoint family and outcome",
            &["family", "outcome"]
        )
        .expect("Failed to register rate_limit_decisions metric");

        let provider_requests = register_int_counter_vec!(
            "completion_gateway_provider_requests_total",
            "Provider calls by provider, model and outcome",
            &["provider", "model", "outcome"]
        )
        .expect("Failed to register provider_requests metric");

        let provider_latency = register_histogram_vec!(
            "completion_gateway_provider_latency_seconds",
            "Time until the provider accepted the call, in seconds",
            &["provider"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]
        )
        .expect("Failed to register provider_latency metric");

        let ttft = register_histogram_vec!(
            "completion_gateway_ttft_seconds",
            "Time to first token in seconds",
            &["provider", "model"],
            vec![0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0]
        )
        .expect("Failed to register ttft metric");

        let stream_chunks = register_int_counter_vec!(
            "completion_gateway_stream_chunks_total",
            "Text chunks relayed to callers",
            &["provider"]
        )
        .expect("Failed to register stream_chunks metric");

        let stream_outcomes = register_int_counter_vec!(
            "completion_gateway_stream_outcomes_total",
            "Finished streams by provider and outcome",
            &["provider", "outcome"]
        )
        .expect("Failed to register stream_outcomes metric");

        Metrics {
            request_count,
            request_duration,
            active_requests,
            rate_limit_decisions,
            provider_requests,
            provider_latency,
            ttft,
            stream_chunks,
            stream_outcomes,
        }
    })
}

/// Get the global metrics instance, initializing it on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}
