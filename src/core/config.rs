//! Configuration management for the completion gateway.
//!
//! All settings are read once from the environment at startup (after the
//! optional `.env` file has been loaded) and handed to each component
//! explicitly. Request handling never reads the environment.

use anyhow::{Context, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Fixed formatting instructions for the advisory endpoint family.
pub const ADVISORY_POLICY: &str = "You are a professional school guide. \
Answer the prompt in well-styled markdown. \
Wrap all LaTeX code with double dollar signs $$...$$. \
For TikZ, use $$continuous TikZ code$$ or ```tikz\n$$TikZ code$$``` for multiline code. \
Rewrite all rows if tabular data is given. \
For images, use <img src='link' height='100px' width='100px'/>. \
If asked to watermark with an imageLink, wrap the response in \
<div style='background-image:url(imageLink);background-size:contain;background-position:center;\
background-repeat:no-repeat;height:100vh;width:100vw;position:absolute;top:0;left:0;z-index:-1;\
opacity:0.5;'>markdown content here</div>. \
Do not include the prompt or otherwise preface your response.";

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server configuration (host, port)
    pub server: ServerConfig,

    /// Whether to verify SSL certificates for upstream requests
    pub verify_ssl: bool,

    /// Request timeout in seconds for upstream providers and the rate-limit store
    pub request_timeout_secs: u64,

    /// Groq (OpenAI-compatible) provider settings
    pub groq: ProviderSettings,

    /// Google Gemini provider settings
    pub gemini: ProviderSettings,

    /// Backing store for rate limiting
    pub rate_limit_store: RateLimitStoreConfig,

    /// Per-endpoint routing, rate limit and identity policies
    pub endpoints: EndpointPolicies,
}

/// Server-specific configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 18000,
        }
    }
}

/// Connection settings for one text-generation provider.
#[derive(Clone)]
pub struct ProviderSettings {
    /// API key; a missing key only fails at call time
    pub api_key: Option<String>,

    /// Base URL for the provider's API
    pub api_base: String,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Which store backs the rate limiter.
#[derive(Clone)]
pub enum RateLimitStoreConfig {
    /// No store credentials: rate limiting is bypassed (fail-open)
    Disabled,
    /// Process-local sliding window
    InMemory,
    /// Upstash Redis over its REST API
    Upstash {
        url: String,
        token: String,
    },
}

impl fmt::Debug for RateLimitStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("Disabled"),
            Self::InMemory => f.write_str("InMemory"),
            Self::Upstash { url, .. } => f
                .debug_struct("Upstash")
                .field("url", url)
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

impl RateLimitStoreConfig {
    /// Short label used in logs and the health endpoint.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::InMemory => "memory",
            Self::Upstash { .. } => "upstash",
        }
    }
}

/// The two provider integrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Groq's OpenAI-compatible chat completions API
    Groq,
    /// Google Gemini generative language API
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider plus the model name to request from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTarget {
    pub provider: ProviderKind,
    pub model: String,
}

impl ModelTarget {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

/// How an endpoint picks its model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// Always the same model
    Fixed { target: ModelTarget },
    /// `heavy` when the combined length is strictly greater than `threshold`
    Threshold {
        threshold: usize,
        light: ModelTarget,
        heavy: ModelTarget,
    },
}

/// How the caller's identity is derived from request headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStrategy {
    /// x-forwarded-for, host, socket address, x-real-ip
    ForwardedFor,
    /// Hostname of referer/origin, then x-real-ip
    Referer,
}

/// Sliding window quota: at most `requests` per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub requests: u32,
    pub window_secs: u64,
}

impl RateLimitWindow {
    pub fn new(requests: u32, window_secs: u64) -> Self {
        Self {
            requests,
            window_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Endpoint families exposed over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointFamily {
    Default,
    AltModel,
    ProviderB,
    Advisory,
}

impl EndpointFamily {
    pub const ALL: [EndpointFamily; 4] = [
        EndpointFamily::Default,
        EndpointFamily::AltModel,
        EndpointFamily::ProviderB,
        EndpointFamily::Advisory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AltModel => "alt-model",
            Self::ProviderB => "provider-b",
            Self::Advisory => "advisory",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::AltModel => "ALT_MODEL",
            Self::ProviderB => "PROVIDER_B",
            Self::Advisory => "ADVISORY",
        }
    }
}

impl fmt::Display for EndpointFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one endpoint needs to handle a request.
#[derive(Debug, Clone)]
pub struct EndpointPolicy {
    pub family: EndpointFamily,
    pub routing: RoutingPolicy,
    pub rate_limit: RateLimitWindow,
    pub identity: IdentityStrategy,
    /// Appended to the resolved identity so families have separate buckets
    pub key_suffix: String,
    /// Whether a caller-supplied `systemPrompt` is honoured
    pub accepts_system_prompt: bool,
    /// Fixed instructions placed before any caller system prompt
    pub preamble: Option<String>,
    /// Whether a routing metadata frame is sent before the terminal marker
    pub side_data: bool,
}

impl EndpointPolicy {
    /// Built-in policy for a family.
    pub fn defaults(family: EndpointFamily) -> Self {
        let five_minutes = 5 * 60;
        match family {
            EndpointFamily::Default => Self {
                family,
                routing: RoutingPolicy::Fixed {
                    target: ModelTarget::new(ProviderKind::Groq, "llama3-70b-8192"),
                },
                rate_limit: RateLimitWindow::new(10, five_minutes),
                identity: IdentityStrategy::ForwardedFor,
                key_suffix: "-default".to_string(),
                accepts_system_prompt: false,
                preamble: None,
                side_data: true,
            },
            EndpointFamily::AltModel => Self {
                family,
                routing: RoutingPolicy::Threshold {
                    threshold: 24_000,
                    light: ModelTarget::new(ProviderKind::Groq, "llama3-8b-8192"),
                    heavy: ModelTarget::new(ProviderKind::Groq, "mixtral-8x7b-32768"),
                },
                rate_limit: RateLimitWindow::new(10, five_minutes),
                identity: IdentityStrategy::ForwardedFor,
                key_suffix: "-groq".to_string(),
                accepts_system_prompt: true,
                preamble: None,
                side_data: true,
            },
            EndpointFamily::ProviderB => Self {
                family,
                routing: RoutingPolicy::Fixed {
                    target: ModelTarget::new(ProviderKind::Gemini, "gemini-pro"),
                },
                rate_limit: RateLimitWindow::new(10, five_minutes),
                identity: IdentityStrategy::ForwardedFor,
                key_suffix: "-gemini".to_string(),
                accepts_system_prompt: false,
                preamble: None,
                side_data: false,
            },
            EndpointFamily::Advisory => Self {
                family,
                routing: RoutingPolicy::Threshold {
                    threshold: 16_000,
                    light: ModelTarget::new(ProviderKind::Groq, "mixtral-8x7b-32768"),
                    heavy: ModelTarget::new(ProviderKind::Gemini, "gemini-pro"),
                },
                rate_limit: RateLimitWindow::new(50, five_minutes),
                identity: IdentityStrategy::Referer,
                key_suffix: "-school".to_string(),
                accepts_system_prompt: true,
                preamble: Some(ADVISORY_POLICY.to_string()),
                side_data: true,
            },
        }
    }

    /// Apply `{PREFIX}_*` environment overrides.
    fn apply_env_overrides(&mut self) -> Result<()> {
        let prefix = self.family.env_prefix();

        if let Some(requests) = env_parse::<u32>(&format!("{}_RATE_LIMIT_REQUESTS", prefix))? {
            self.rate_limit.requests = requests;
        }
        if let Some(secs) = env_parse::<u64>(&format!("{}_RATE_LIMIT_WINDOW_SECS", prefix))? {
            self.rate_limit.window_secs = secs;
        }

        let model = env_string(&format!("{}_MODEL", prefix));
        let heavy_model = env_string(&format!("{}_HEAVY_MODEL", prefix));
        let new_threshold = env_parse::<usize>(&format!("{}_ROUTING_THRESHOLD", prefix))?;

        match &mut self.routing {
            RoutingPolicy::Fixed { target } => {
                if let Some(model) = model {
                    target.model = model;
                }
            }
            RoutingPolicy::Threshold {
                threshold,
                light,
                heavy,
            } => {
                if let Some(value) = new_threshold {
                    *threshold = value;
                }
                if let Some(model) = model {
                    light.model = model;
                }
                if let Some(model) = heavy_model {
                    heavy.model = model;
                }
            }
        }

        Ok(())
    }
}

/// Policies for every endpoint family.
#[derive(Debug, Clone)]
pub struct EndpointPolicies {
    pub default: EndpointPolicy,
    pub alt_model: EndpointPolicy,
    pub provider_b: EndpointPolicy,
    pub advisory: EndpointPolicy,
}

impl EndpointPolicies {
    pub fn get(&self, family: EndpointFamily) -> &EndpointPolicy {
        match family {
            EndpointFamily::Default => &self.default,
            EndpointFamily::AltModel => &self.alt_model,
            EndpointFamily::ProviderB => &self.provider_b,
            EndpointFamily::Advisory => &self.advisory,
        }
    }

    pub fn get_mut(&mut self, family: EndpointFamily) -> &mut EndpointPolicy {
        match family {
            EndpointFamily::Default => &mut self.default,
            EndpointFamily::AltModel => &mut self.alt_model,
            EndpointFamily::ProviderB => &mut self.provider_b,
            EndpointFamily::Advisory => &mut self.advisory,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointPolicy> {
        EndpointFamily::ALL.into_iter().map(move |f| self.get(f))
    }
}

impl Default for EndpointPolicies {
    fn default() -> Self {
        Self {
            default: EndpointPolicy::defaults(EndpointFamily::Default),
            alt_model: EndpointPolicy::defaults(EndpointFamily::AltModel),
            provider_b: EndpointPolicy::defaults(EndpointFamily::ProviderB),
            advisory: EndpointPolicy::defaults(EndpointFamily::Advisory),
        }
    }
}

pub const DEFAULT_GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            verify_ssl: true,
            request_timeout_secs: 300,
            groq: ProviderSettings {
                api_key: None,
                api_base: DEFAULT_GROQ_API_BASE.to_string(),
            },
            gemini: ProviderSettings {
                api_key: None,
                api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            },
            rate_limit_store: RateLimitStoreConfig::Disabled,
            endpoints: EndpointPolicies::default(),
        }
    }
}

impl AppConfig {
    /// Build configuration from environment variables.
    ///
    /// Unset variables fall back to the built-in defaults. Variables that are
    /// set but cannot be parsed are reported as errors.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use completion_gateway::core::config::AppConfig;
    ///
    /// let config = AppConfig::from_env().expect("Failed to load config");
    /// ```
    pub fn from_env() -> Result<Self> {
        let mut config = AppConfig::default();

        if let Some(host) = env_string("HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("PORT")? {
            config.server.port = port;
        }
        if let Some(verify_ssl) = env_string("VERIFY_SSL") {
            config.verify_ssl = str_to_bool(&verify_ssl);
        }
        if let Some(timeout) = env_parse::<u64>("REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = timeout;
        }

        config.groq.api_key = env_string("OPENAI_API_KEY");
        if let Some(base) = env_string("GROQ_API_BASE") {
            config.groq.api_base = base;
        }
        config.gemini.api_key = env_string("GOOGLE_API_KEY");
        if let Some(base) = env_string("GEMINI_API_BASE") {
            config.gemini.api_base = base;
        }

        config.rate_limit_store = match (
            env_string("KV_REST_API_URL"),
            env_string("KV_REST_API_TOKEN"),
        ) {
            (Some(url), Some(token)) => RateLimitStoreConfig::Upstash { url, token },
            _ => match env_string("RATE_LIMIT_BACKEND").as_deref() {
                Some("memory") => RateLimitStoreConfig::InMemory,
                _ => RateLimitStoreConfig::Disabled,
            },
        };

        for family in EndpointFamily::ALL {
            config
                .endpoints
                .get_mut(family)
                .apply_env_overrides()
                .with_context(|| format!("Invalid configuration for endpoint '{}'", family))?;
        }

        Ok(config)
    }
}

/// Read a non-blank environment variable.
fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse an environment variable, failing if it is set but invalid.
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_string(name)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("{} has an invalid value: {}", name, raw))
        })
        .transpose()
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
fn str_to_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const MANAGED_VARS: &[&str] = &[
        "HOST",
        "PORT",
        "VERIFY_SSL",
        "REQUEST_TIMEOUT_SECS",
        "OPENAI_API_KEY",
        "GOOGLE_API_KEY",
        "GROQ_API_BASE",
        "GEMINI_API_BASE",
        "KV_REST_API_URL",
        "KV_REST_API_TOKEN",
        "RATE_LIMIT_BACKEND",
        "ADVISORY_ROUTING_THRESHOLD",
        "ADVISORY_RATE_LIMIT_REQUESTS",
        "ADVISORY_HEAVY_MODEL",
        "DEFAULT_MODEL",
        "ALT_MODEL_RATE_LIMIT_WINDOW_SECS",
    ];

    fn clear_env() {
        for name in MANAGED_VARS {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn test_str_to_bool() {
        assert!(str_to_bool("true"));
        assert!(str_to_bool("TRUE"));
        assert!(str_to_bool("1"));
        assert!(str_to_bool("yes"));
        assert!(str_to_bool("On"));
        assert!(!str_to_bool("false"));
        assert!(!str_to_bool("0"));
        assert!(!str_to_bool("off"));
        assert!(!str_to_bool(""));
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 18000);
        assert!(config.verify_ssl);
        assert_eq!(config.request_timeout_secs, 300);
        assert_eq!(config.groq.api_base, DEFAULT_GROQ_API_BASE);
        assert!(matches!(
            config.rate_limit_store,
            RateLimitStoreConfig::Disabled
        ));
    }

    #[test]
    fn test_default_endpoint_policies() {
        let policies = EndpointPolicies::default();

        assert_eq!(policies.default.rate_limit, RateLimitWindow::new(10, 300));
        assert_eq!(policies.advisory.rate_limit, RateLimitWindow::new(50, 300));
        assert_eq!(policies.advisory.identity, IdentityStrategy::Referer);
        assert_eq!(policies.advisory.key_suffix, "-school");
        assert_eq!(policies.alt_model.key_suffix, "-groq");
        assert_eq!(policies.advisory.preamble.as_deref(), Some(ADVISORY_POLICY));
        assert!(policies.default.preamble.is_none());
        assert!(!policies.provider_b.side_data);

        let suffixes: Vec<_> = policies.iter().map(|p| p.key_suffix.clone()).collect();
        let mut unique = suffixes.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(suffixes.len(), unique.len());
    }

    #[test]
    #[serial]
    fn test_from_env_without_variables_uses_defaults() {
        clear_env();

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.server.port, 18000);
        assert!(config.groq.api_key.is_none());
        assert!(matches!(
            config.rate_limit_store,
            RateLimitStoreConfig::Disabled
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_provider_and_store_settings() {
        clear_env();
        std::env::set_var("PORT", "9000");
        std::env::set_var("VERIFY_SSL", "off");
        std::env::set_var("OPENAI_API_KEY", "gsk-test");
        std::env::set_var("GOOGLE_API_KEY", "g-test");
        std::env::set_var("KV_REST_API_URL", "https://kv.example.com");
        std::env::set_var("KV_REST_API_TOKEN", "kv-token");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(!config.verify_ssl);
        assert_eq!(config.groq.api_key.as_deref(), Some("gsk-test"));
        assert_eq!(config.gemini.api_key.as_deref(), Some("g-test"));
        match &config.rate_limit_store {
            RateLimitStoreConfig::Upstash { url, token } => {
                assert_eq!(url, "https://kv.example.com");
                assert_eq!(token, "kv-token");
            }
            other => panic!("unexpected store config: {:?}", other),
        }

        clear_env();
    }

    #[test]
    #[serial]
    fn test_partial_store_credentials_disable_rate_limiting() {
        clear_env();
        std::env::set_var("KV_REST_API_URL", "https://kv.example.com");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.rate_limit_store.label(), "disabled");

        std::env::set_var("RATE_LIMIT_BACKEND", "memory");
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.rate_limit_store.label(), "memory");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_endpoint_overrides() {
        clear_env();
        std::env::set_var("ADVISORY_ROUTING_THRESHOLD", "8000");
        std::env::set_var("ADVISORY_RATE_LIMIT_REQUESTS", "5");
        std::env::set_var("ADVISORY_HEAVY_MODEL", "gemini-1.5-pro");
        std::env::set_var("DEFAULT_MODEL", "llama3-8b-8192");
        std::env::set_var("ALT_MODEL_RATE_LIMIT_WINDOW_SECS", "60");

        let config = AppConfig::from_env().unwrap();
        match &config.endpoints.advisory.routing {
            RoutingPolicy::Threshold {
                threshold, heavy, ..
            } => {
                assert_eq!(*threshold, 8000);
                assert_eq!(heavy.model, "gemini-1.5-pro");
                assert_eq!(heavy.provider, ProviderKind::Gemini);
            }
            other => panic!("unexpected routing: {:?}", other),
        }
        assert_eq!(config.endpoints.advisory.rate_limit.requests, 5);
        assert_eq!(config.endpoints.alt_model.rate_limit.window_secs, 60);
        assert_eq!(
            config.endpoints.default.routing,
            RoutingPolicy::Fixed {
                target: ModelTarget::new(ProviderKind::Groq, "llama3-8b-8192")
            }
        );

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_numeric_value_is_an_error() {
        clear_env();
        std::env::set_var("PORT", "not-a-port");
        assert!(AppConfig::from_env().is_err());

        clear_env();
        std::env::set_var("ADVISORY_ROUTING_THRESHOLD", "-3");
        let err = AppConfig::from_env().unwrap_err();
        assert!(format!("{:#}", err).contains("advisory"));

        clear_env();
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = ProviderSettings {
            api_key: Some("secret-key".to_string()),
            api_base: "http://localhost".to_string(),
        };
        let store = RateLimitStoreConfig::Upstash {
            url: "http://kv".to_string(),
            token: "secret-token".to_string(),
        };

        assert!(!format!("{:?}", settings).contains("secret-key"));
        assert!(!format!("{:?}", store).contains("secret-token"));
    }
}
