//! Sliding-window rate limiting keyed by client identity.
//!
//! The limiter itself holds no counters: every check is delegated to a
//! [`RateLimitStore`], which must make check-and-increment atomic. Two
//! stores are provided: [`UpstashStore`] (Redis over REST, shared between
//! instances) and [`InMemoryStore`] (single process).

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::core::config::{RateLimitStoreConfig, RateLimitWindow};
use crate::core::error::RateLimitError;
use crate::core::logging::client_digest;

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// A counter store able to answer sliding-window checks atomically.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one request for `key` against `window` and report the decision.
    async fn limit(
        &self,
        key: &str,
        window: &RateLimitWindow,
    ) -> Result<RateDecision, RateLimitError>;

    /// Store name for logs.
    fn name(&self) -> &'static str;
}

/// Per-endpoint gate in front of the provider call.
#[derive(Clone)]
pub enum RateLimiter {
    /// No store configured: every request passes unchecked
    Disabled,
    Enabled {
        store: Arc<dyn RateLimitStore>,
        window: RateLimitWindow,
    },
}

impl RateLimiter {
    pub fn new(store: Option<Arc<dyn RateLimitStore>>, window: RateLimitWindow) -> Self {
        match store {
            Some(store) => RateLimiter::Enabled { store, window },
            None => RateLimiter::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, RateLimiter::Enabled { .. })
    }

    /// Check `key` against this limiter's window.
    ///
    /// A disabled limiter always allows.
    pub async fn limit(&self, key: &str) -> Result<RateDecision, RateLimitError> {
        match self {
            RateLimiter::Disabled => Ok(RateDecision {
                allowed: true,
                limit: u32::MAX,
                remaining: u32::MAX,
                reset_at: Utc::now(),
            }),
            RateLimiter::Enabled { store, window } => {
                let decision = store.limit(key, window).await?;
                if !decision.allowed {
                    tracing::warn!(
                        client = %client_digest(key),
                        store = store.name(),
                        limit = window.requests,
                        window_secs = window.window_secs,
                        "Rate limit exceeded"
                    );
                }
                Ok(decision)
            }
        }
    }
}

/// Build the configured store, or `None` when rate limiting is disabled.
pub fn store_from_config(
    config: &RateLimitStoreConfig,
    http_client: reqwest::Client,
) -> Option<Arc<dyn RateLimitStore>> {
    match config {
        RateLimitStoreConfig::Disabled => None,
        RateLimitStoreConfig::InMemory => Some(Arc::new(InMemoryStore::new())),
        RateLimitStoreConfig::Upstash { url, token } => Some(Arc::new(UpstashStore::new(
            http_client,
            url.clone(),
            token.clone(),
        ))),
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local sliding log of admitted request timestamps per key.
#[derive(Default)]
pub struct InMemoryStore {
    logs: DashMap<String, VecDeque<i64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `key` as of `now`.
    pub fn limit_at(&self, key: &str, window: &RateLimitWindow, now: DateTime<Utc>) -> RateDecision {
        let now_ms = now.timestamp_millis();
        let window_ms = window.window().as_millis() as i64;

        // The entry guard holds the shard lock, making check-and-insert atomic.
        let mut entry = self.logs.entry(key.to_string()).or_default();
        let log = entry.value_mut();

        let cutoff = now_ms - window_ms;
        while log.front().is_some_and(|&admitted| admitted <= cutoff) {
            log.pop_front();
        }

        let allowed = (log.len() as u64) < window.requests as u64;
        if allowed {
            log.push_back(now_ms);
        }

        let remaining = window.requests.saturating_sub(log.len() as u32);
        let reset_ms = log.front().map_or(now_ms + window_ms, |oldest| oldest + window_ms);

        RateDecision {
            allowed,
            limit: window.requests,
            remaining,
            reset_at: millis_to_datetime(reset_ms),
        }
    }

    /// Drop keys whose whole log is older than `max_window` as of `now`.
    pub fn purge_idle(&self, max_window: std::time::Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now.timestamp_millis() - max_window.as_millis() as i64;
        let before = self.logs.len();
        self.logs
            .retain(|_, log| log.back().is_some_and(|&latest| latest > cutoff));
        before - self.logs.len()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn limit(
        &self,
        key: &str,
        window: &RateLimitWindow,
    ) -> Result<RateDecision, RateLimitError> {
        Ok(self.limit_at(key, window, Utc::now()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// Upstash store
// ============================================================================

/// Key prefix shared with other Upstash rate limit clients.
pub const UPSTASH_KEY_PREFIX: &str = "@upstash/ratelimit";

/// Weighted two-bucket sliding window, evaluated atomically inside Redis.
///
/// Returns -1 when the request is denied, otherwise the remaining quota.
pub const SLIDING_WINDOW_SCRIPT: &str = r#"
local current_key = KEYS[1]
local previous_key = KEYS[2]
local limit = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local increment = tonumber(ARGV[4])

local current = tonumber(redis.call("GET", current_key) or "0")
local previous = tonumber(redis.call("GET", previous_key) or "0")
local elapsed = (now % window) / window
local weighted = math.floor((1 - elapsed) * previous)
if weighted + current >= limit then
  return -1
end

local updated = redis.call("INCRBY", current_key, increment)
if updated == increment then
  redis.call("PEXPIRE", current_key, window * 2 + 1000)
end
return limit - (updated + weighted)
"#;

/// Rate limit store backed by Upstash Redis' REST API.
pub struct UpstashStore {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl UpstashStore {
    pub fn new(client: reqwest::Client, url: String, token: String) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Redis keys for the bucket containing `now_ms` and the one before it.
    pub fn bucket_keys(key: &str, now_ms: i64, window_ms: i64) -> (String, String, i64) {
        let bucket = now_ms / window_ms;
        (
            format!("{}:{}:{}", UPSTASH_KEY_PREFIX, key, bucket),
            format!("{}:{}:{}", UPSTASH_KEY_PREFIX, key, bucket - 1),
            bucket,
        )
    }
}

#[async_trait]
impl RateLimitStore for UpstashStore {
    async fn limit(
        &self,
        key: &str,
        window: &RateLimitWindow,
    ) -> Result<RateDecision, RateLimitError> {
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = (window.window().as_millis() as i64).max(1);
        let (current_key, previous_key, bucket) = Self::bucket_keys(key, now_ms, window_ms);

        let command = json!([
            "EVAL",
            SLIDING_WINDOW_SCRIPT,
            "2",
            current_key,
            previous_key,
            window.requests.to_string(),
            now_ms.to_string(),
            window_ms.to_string(),
            "1"
        ]);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&command)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RateLimitError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response.json().await?;
        if let Some(error) = payload.get("error") {
            return Err(RateLimitError::Decode(error.to_string()));
        }
        let remaining = payload
            .get("result")
            .and_then(Value::as_i64)
            .ok_or_else(|| RateLimitError::Decode(payload.to_string()))?;

        Ok(RateDecision {
            allowed: remaining >= 0,
            limit: window.requests,
            remaining: remaining.clamp(0, u32::MAX as i64) as u32,
            reset_at: millis_to_datetime((bucket + 1) * window_ms),
        })
    }

    fn name(&self) -> &'static str {
        "upstash"
    }
}
