//! Logging utilities with request context support.
//!
//! Request ids and the selected provider are kept in task-locals so that
//! log lines emitted deep inside streaming code can still be correlated
//! with the request that produced them.

use sha2::{Digest, Sha256};

tokio::task_local! {
    /// Task-local storage for the current request ID.
    pub static REQUEST_ID: String;
}

tokio::task_local! {
    /// Task-local storage for the provider serving the current request.
    pub static PROVIDER_CONTEXT: String;
}

/// Get the current request ID from context, if set.
///
/// Returns an empty string if no request ID is set.
pub fn get_request_id() -> String {
    REQUEST_ID.try_with(|id| id.clone()).unwrap_or_default()
}

/// Get the current provider name from context, if set.
///
/// Returns an empty string if no provider context is set.
pub fn get_provider_context() -> String {
    PROVIDER_CONTEXT
        .try_with(|ctx| ctx.clone())
        .unwrap_or_default()
}

/// Generate a new unique request ID using UUID v4.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Short, stable digest of a client key.
///
/// Client keys are usually IP addresses or hostnames; logs only ever see
/// this digest.
pub fn client_digest(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..6])
}

/// Execute an async block with request context (request_id, provider).
///
/// # Example
///
/// ```ignore
/// with_request_context!(request_id, provider_name, async {
///     // handler logic here
/// })
/// ```
#[macro_export]
macro_rules! with_request_context {
    ($request_id:expr, $provider_name:expr, $body:expr) => {
        $crate::core::logging::REQUEST_ID
            .scope($request_id, async {
                $crate::core::logging::PROVIDER_CONTEXT
                    .scope($provider_name, $body)
                    .await
            })
            .await
    };
    // Version without provider context
    ($request_id:expr, $body:expr) => {
        $crate::core::logging::REQUEST_ID.scope($request_id, $body).await
    };
}
