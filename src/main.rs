//! Completion Gateway - Main entry point
//!
//! This binary loads configuration from the environment, creates the HTTP
//! server with all routes and middleware, and runs it until Ctrl+C.

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use completion_gateway::{
    api::{build_router, AppState},
    core::{
        config::RateLimitStoreConfig, init_metrics, rate_limiter::store_from_config, AppConfig,
        InMemoryStore, RateLimitStore,
    },
    services::ProviderRegistry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often idle in-memory rate limit keys are swept.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Custom time formatter that uses local timezone (respects TZ environment variable)
struct LocalTime;

impl tracing_subscriber::fmt::time::FormatTime for LocalTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S"))
    }
}

fn init_tracing() {
    let no_color = std::env::var("NO_COLOR").is_ok();
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // Noise filters are appended so a bare RUST_LOG=trace still hides them.
    let base_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,completion_gateway=debug".to_string());
    let filter = tracing_subscriber::EnvFilter::new(format!(
        "{},hyper=warn,hyper::proto=warn,h2=warn,reqwest=warn",
        base_filter
    ));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_timer(LocalTime))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_timer(LocalTime)
                    .with_ansi(!no_color),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    init_tracing();
    init_metrics();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let http_client = create_http_client(&config)?;

    if config.groq.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; Groq-routed requests will fail");
    }
    if config.gemini.api_key.is_none() {
        tracing::warn!("GOOGLE_API_KEY is not set; Gemini-routed requests will fail");
    }

    let store = build_store(&config, http_client.clone());
    match &config.rate_limit_store {
        RateLimitStoreConfig::Disabled => {
            tracing::warn!("No rate limit store configured; rate limiting is disabled")
        }
        other => tracing::info!("Rate limiting backed by {} store", other.label()),
    }

    let providers = ProviderRegistry::from_config(&config, http_client);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid HOST/PORT")?;

    let state = Arc::new(AppState::new(config, providers, store));
    let app = build_router(state);

    tracing::info!("Starting completion gateway on {}", addr);
    tracing::info!("Completion API: /api/completion/{{default,alt-model,provider-b,advisory}}");
    tracing::info!("Metrics endpoint: /metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Build the rate limit store, starting the idle sweep for the in-memory one.
fn build_store(
    config: &AppConfig,
    http_client: reqwest::Client,
) -> Option<Arc<dyn RateLimitStore>> {
    if let RateLimitStoreConfig::InMemory = config.rate_limit_store {
        let store = Arc::new(InMemoryStore::new());
        let max_window = config
            .endpoints
            .iter()
            .map(|policy| policy.rate_limit.window())
            .max()
            .unwrap_or_default();

        let sweeper = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            loop {
                interval.tick().await;
                let purged = sweeper.purge_idle(max_window, Utc::now());
                if purged > 0 {
                    tracing::debug!(purged, remaining = sweeper.len(), "Purged idle rate limit keys");
                }
            }
        });
        return Some(store as Arc<dyn RateLimitStore>);
    }

    store_from_config(&config.rate_limit_store, http_client)
}

/// Create HTTP client with connection pooling
fn create_http_client(config: &AppConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(!config.verify_ssl)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .context("Failed to build HTTP client")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
