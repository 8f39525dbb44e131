//! Route matching logic.
//!
//! # Responsibilities
//! - Match host (exact match, case-insensitive, port ignored)
//! - Match path prefix (case-sensitive)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Host comes from the `Host` header, or the URI authority for HTTP/2
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use axum::http::header::HOST;
use axum::http::Request;

/// Host and path of a request, extracted once per lookup.
#[derive(Debug, Clone, Copy)]
pub struct RequestKey<'a> {
    pub host: Option<&'a str>,
    pub path: &'a str,
}

impl<'a> RequestKey<'a> {
    pub fn from_request<B>(req: &'a Request<B>) -> Self {
        let host = req
            .headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| req.uri().host())
            .map(strip_port);
        Self {
            host,
            path: req.uri().path(),
        }
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal, keep the brackets.
        return host.split_once(']').map_or(host, |(addr, _)| &host[..=addr.len()]);
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, key: &RequestKey<'_>) -> bool;
}

/// Matches the request host.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, key: &RequestKey<'_>) -> bool {
        key.host
            .map(|h| h.eq_ignore_ascii_case(&self.expected_host))
            .unwrap_or(false)
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, key: &RequestKey<'_>) -> bool {
        key.path.starts_with(&self.prefix)
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, key: &RequestKey<'_>) -> bool {
        self.matchers.iter().all(|m| m.matches(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn key_of(req: &Request<Body>) -> RequestKey<'_> {
        RequestKey::from_request(req)
    }

    #[test]
    fn test_host_matcher() {
        let matcher = HostMatcher::new("example.com");

        let req1 = Request::builder()
            .header("Host", "example.com")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&key_of(&req1)));

        let req2 = Request::builder()
            .header("Host", "EXAMPLE.COM:8080")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&key_of(&req2)));

        let req3 = Request::builder()
            .header("Host", "other.com")
            .body(Body::default())
            .unwrap();
        assert!(!matcher.matches(&key_of(&req3)));
    }

    #[test]
    fn host_falls_back_to_authority() {
        let req = Request::builder()
            .uri("https://example.com/x")
            .body(Body::default())
            .unwrap();
        assert_eq!(key_of(&req).host, Some("example.com"));
    }

    #[test]
    fn ipv6_host_keeps_brackets() {
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("localhost"), "localhost");
    }

    #[test]
    fn test_path_matcher() {
        let matcher = PathPrefixMatcher::new("/api");

        let req1 = Request::builder()
            .uri("http://example.com/api/v1")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&key_of(&req1)));

        let req2 = Request::builder()
            .uri("http://example.com/images")
            .body(Body::default())
            .unwrap();
        assert!(!matcher.matches(&key_of(&req2)));
    }

    #[test]
    fn empty_and_matches_everything() {
        let req = Request::builder().uri("/anything").body(Body::default()).unwrap();
        assert!(AndMatcher::new(Vec::new()).matches(&key_of(&req)));
    }
}
