//! Derive the rate-limit key for a request from its headers.

use axum::http::HeaderMap;
use std::net::SocketAddr;

use crate::core::config::IdentityStrategy;

/// Identity used when no header or socket address is available.
pub const FALLBACK_IDENTITY: &str = "local";

/// A header's value, trimmed; blank or non-UTF-8 values count as absent.
fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Everything before the first `:`, which drops a port.
fn strip_port(value: &str) -> Option<&str> {
    let head = value.split(':').next().unwrap_or(value).trim();
    (!head.is_empty()).then_some(head)
}

/// Hostname of a URL-valued header.
fn url_host(value: &str) -> Option<String> {
    reqwest::Url::parse(value)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .filter(|host| !host.is_empty())
}

fn forwarded_for_identity(headers: &HeaderMap, remote: Option<SocketAddr>) -> Option<String> {
    if let Some(hop) = header_value(headers, "x-forwarded-for")
        .and_then(|list| list.split(',').map(str::trim).find(|hop| !hop.is_empty()))
        .and_then(strip_port)
    {
        return Some(hop.to_string());
    }
    if let Some(host) = header_value(headers, "host").and_then(strip_port) {
        return Some(host.to_string());
    }
    if let Some(addr) = remote {
        return Some(addr.ip().to_string());
    }
    header_value(headers, "x-real-ip")
        .and_then(strip_port)
        .map(str::to_string)
}

fn referer_identity(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "referer")
        .and_then(url_host)
        .or_else(|| header_value(headers, "origin").and_then(url_host))
        .or_else(|| {
            header_value(headers, "x-real-ip")
                .and_then(strip_port)
                .map(str::to_string)
        })
}

/// Resolve the caller's rate-limit key: identity plus the endpoint suffix.
///
/// Never empty; falls back to [`FALLBACK_IDENTITY`].
pub fn resolve_client_key(
    strategy: IdentityStrategy,
    headers: &HeaderMap,
    remote: Option<SocketAddr>,
    suffix: &str,
) -> String {
    let identity = match strategy {
        IdentityStrategy::ForwardedFor => forwarded_for_identity(headers, remote),
        IdentityStrategy::Referer => referer_identity(headers),
    }
    .unwrap_or_else(|| FALLBACK_IDENTITY.to_string());

    format!("{}{}", identity, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn remote() -> Option<SocketAddr> {
        Some("198.51.100.9:51234".parse().unwrap())
    }

    #[test]
    fn test_forwarded_for_first_hop() {
        let h = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("host", "api.example.com"),
        ]);
        assert_eq!(
            resolve_client_key(IdentityStrategy::ForwardedFor, &h, remote(), "-groq"),
            "203.0.113.7-groq"
        );
    }

    #[test]
    fn test_forwarded_for_strips_port() {
        let h = headers(&[("x-forwarded-for", "203.0.113.7:8080")]);
        assert_eq!(
            resolve_client_key(IdentityStrategy::ForwardedFor, &h, None, "-default"),
            "203.0.113.7-default"
        );
    }

    #[test]
    fn test_host_then_socket_then_real_ip() {
        let h = headers(&[("host", "localhost:3000"), ("x-real-ip", "192.0.2.1")]);
        assert_eq!(
            resolve_client_key(IdentityStrategy::ForwardedFor, &h, remote(), "-groq"),
            "localhost-groq"
        );

        let h = headers(&[("x-real-ip", "192.0.2.1")]);
        assert_eq!(
            resolve_client_key(IdentityStrategy::ForwardedFor, &h, remote(), "-groq"),
            "198.51.100.9-groq"
        );
        assert_eq!(
            resolve_client_key(IdentityStrategy::ForwardedFor, &h, None, "-groq"),
            "192.0.2.1-groq"
        );
    }

    #[test]
    fn test_blank_headers_are_absent() {
        let h = headers(&[("x-forwarded-for", "  "), ("host", "")]);
        assert_eq!(
            resolve_client_key(IdentityStrategy::ForwardedFor, &h, None, "-gemini"),
            "local-gemini"
        );
    }

    #[test]
    fn test_referer_hostname() {
        let h = headers(&[
            ("referer", "https://school.example.edu/lessons/1?x=y"),
            ("origin", "https://other.example.com"),
        ]);
        assert_eq!(
            resolve_client_key(IdentityStrategy::Referer, &h, remote(), "-school"),
            "school.example.edu-school"
        );
    }

    #[test]
    fn test_referer_falls_back_to_origin_then_real_ip() {
        let h = headers(&[
            ("referer", "not a url"),
            ("origin", "https://app.example.com:8443"),
        ]);
        assert_eq!(
            resolve_client_key(IdentityStrategy::Referer, &h, None, "-school"),
            "app.example.com-school"
        );

        let h = headers(&[("x-real-ip", "192.0.2.44")]);
        assert_eq!(
            resolve_client_key(IdentityStrategy::Referer, &h, remote(), "-school"),
            "192.0.2.44-school"
        );
    }

    #[test]
    fn test_referer_ignores_forwarded_for_and_socket() {
        let h = headers(&[("x-forwarded-for", "203.0.113.7")]);
        assert_eq!(
            resolve_client_key(IdentityStrategy::Referer, &h, remote(), "-school"),
            "local-school"
        );
    }
}
