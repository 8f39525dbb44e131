//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the cold-start proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Forwarding timeouts and connection pool settings.
    pub timeouts: TimeoutConfig,

    /// Upstream round-trip tracing.
    pub tracing: TracingConfig,

    /// TLS client settings used when dialing `https` upstreams.
    pub upstream_tls: UpstreamTlsConfig,

    /// Placeholder feature switch and defaults.
    pub placeholder: PlaceholderFeatureConfig,

    /// Background readiness probing that feeds the endpoints cache.
    pub readiness: ReadinessConfig,

    /// Route definitions mapping requests to scale targets.
    pub routes: Vec<RouteConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Overall inbound request timeout in seconds. Must cover the wait
    /// timeout plus the upstream call.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            request_timeout_secs: 120,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeouts and pool settings for forwarding.
///
/// All durations are in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long a request may wait for the workload to have ready replicas.
    pub workload_replicas_ms: u64,

    /// How long to wait for upstream response headers once the request is sent.
    pub response_header_ms: u64,

    /// TCP connect timeout of the default dialer.
    pub connect_ms: u64,

    /// Attempt HTTP/2 (ALPN `h2`) on TLS upstream connections.
    pub force_http2: bool,

    /// Maximum idle pooled connections kept per upstream host.
    pub max_idle_conns: usize,

    /// How long an idle pooled connection is kept.
    pub idle_conn_ms: u64,

    /// TLS handshake timeout for `https` upstreams.
    pub tls_handshake_ms: u64,

    /// Wait for `100 Continue` before sending a body.
    pub expect_continue_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            workload_replicas_ms: 1_500,
            response_header_ms: 500,
            connect_ms: 500,
            force_http2: false,
            max_idle_conns: 100,
            idle_conn_ms: 90_000,
            tls_handshake_ms: 10_000,
            expect_continue_ms: 1_000,
        }
    }
}

/// Upstream round-trip tracing.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TracingConfig {
    /// Wrap every upstream round trip in a span.
    pub enabled: bool,
}

/// TLS client settings for upstream connections.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamTlsConfig {
    /// Extra CA bundle (PEM) trusted in addition to the web PKI roots.
    pub ca_cert_path: Option<String>,

    /// Client certificate chain (PEM) for mutual TLS.
    pub client_cert_path: Option<String>,

    /// Client private key (PEM) for mutual TLS.
    pub client_key_path: Option<String>,
}

/// Placeholder feature switch.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlaceholderFeatureConfig {
    /// Master switch; when false no route is ever short-circuited.
    pub enabled: bool,

    /// Refresh interval used by routes that don't set their own.
    pub default_refresh_interval_secs: u64,
}

impl Default for PlaceholderFeatureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_refresh_interval_secs: 5,
        }
    }
}

/// Readiness prober settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Probe every routed upstream and feed the endpoints cache.
    pub probe_enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path to probe on each upstream.
    pub path: String,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            probe_enabled: false,
            interval_secs: 2,
            timeout_ms: 500,
            path: "/healthz".to_string(),
        }
    }
}

/// Route configuration mapping requests to a scale target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match).
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,

    /// Namespace of the scale target.
    pub namespace: String,

    /// Service name of the scale target.
    pub service: String,

    /// Upstream base URL (e.g., "http://app.default.svc:8080").
    pub upstream: String,

    /// Per-route placeholder settings.
    #[serde(default)]
    pub placeholder: Option<RoutePlaceholderConfig>,
}

/// Per-route placeholder page.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutePlaceholderConfig {
    /// Serve the placeholder while the target has no ready endpoints.
    #[serde(default)]
    pub enabled: bool,

    /// Status code of the placeholder response.
    #[serde(default = "default_placeholder_status")]
    pub status_code: u16,

    /// Refresh interval advertised to clients, in seconds.
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,

    /// Inline template; the built-in page is used when absent.
    #[serde(default)]
    pub content: Option<String>,

    /// Extra response headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_placeholder_status() -> u16 {
    503
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [[routes]]
            name = "app"
            host = "app.example.com"
            namespace = "default"
            service = "app"
            upstream = "http://app.default.svc:8080"
            "#,
        )
        .unwrap();

        assert_eq!(config.timeouts.workload_replicas_ms, 1_500);
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert!(!config.tracing.enabled);
        assert_eq!(config.routes.len(), 1);
        assert!(config.routes[0].placeholder.is_none());
    }

    #[test]
    fn route_placeholder_defaults_status() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [[routes]]
            name = "app"
            namespace = "default"
            service = "app"
            upstream = "http://app:8080"
            [routes.placeholder]
            enabled = true
            "#,
        )
        .unwrap();

        let placeholder = config.routes[0].placeholder.as_ref().unwrap();
        assert!(placeholder.enabled);
        assert_eq!(placeholder.status_code, 503);
        assert!(placeholder.headers.is_empty());
    }
}
