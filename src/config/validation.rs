//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, pool sizes > 0)
//! - Check routes point at usable upstream URLs
//! - Check placeholder status codes and TLS path pairs
//! - Keep the listener request timeout above the wait and header budget
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use axum::http::{StatusCode, Uri};

use crate::config::schema::{ProxyConfig, RouteConfig};

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// Human readable reason.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let t = &config.timeouts;
    for (field, value) in [
        ("timeouts.workload_replicas_ms", t.workload_replicas_ms),
        ("timeouts.response_header_ms", t.response_header_ms),
        ("timeouts.connect_ms", t.connect_ms),
        ("timeouts.idle_conn_ms", t.idle_conn_ms),
        ("timeouts.tls_handshake_ms", t.tls_handshake_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }
    if t.max_idle_conns == 0 {
        errors.push(ValidationError::new(
            "timeouts.max_idle_conns",
            "must be greater than zero",
        ));
    }

    let request_timeout_ms = config.listener.request_timeout_secs.saturating_mul(1_000);
    let forward_budget_ms = t.workload_replicas_ms.saturating_add(t.response_header_ms);
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "listener.request_timeout_secs",
            "must be greater than zero",
        ));
    } else if request_timeout_ms <= forward_budget_ms {
        // The listener timeout would answer before the handler can report a wait failure.
        errors.push(ValidationError::new(
            "listener.request_timeout_secs",
            format!(
                "must exceed timeouts.workload_replicas_ms + timeouts.response_header_ms ({forward_budget_ms}ms)"
            ),
        ));
    }

    let tls = &config.upstream_tls;
    if tls.client_cert_path.is_some() != tls.client_key_path.is_some() {
        errors.push(ValidationError::new(
            "upstream_tls",
            "client_cert_path and client_key_path must be set together",
        ));
    }

    if config.readiness.probe_enabled && config.readiness.interval_secs == 0 {
        errors.push(ValidationError::new(
            "readiness.interval_secs",
            "must be greater than zero",
        ));
    }

    for (i, route) in config.routes.iter().enumerate() {
        validate_route(i, route, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_route(index: usize, route: &RouteConfig, errors: &mut Vec<ValidationError>) {
    let prefix = format!("routes[{}]", index);

    if route.namespace.is_empty() {
        errors.push(ValidationError::new(format!("{prefix}.namespace"), "must not be empty"));
    }
    if route.service.is_empty() {
        errors.push(ValidationError::new(format!("{prefix}.service"), "must not be empty"));
    }

    match route.upstream.parse::<Uri>() {
        Ok(uri) => {
            let scheme_ok = matches!(uri.scheme_str(), Some("http") | Some("https"));
            if !scheme_ok || uri.authority().is_none() {
                errors.push(ValidationError::new(
                    format!("{prefix}.upstream"),
                    "must be an absolute http(s) URL",
                ));
            }
        }
        Err(e) => {
            errors.push(ValidationError::new(format!("{prefix}.upstream"), e.to_string()));
        }
    }

    if let Some(path) = &route.path_prefix {
        if !path.starts_with('/') {
            errors.push(ValidationError::new(
                format!("{prefix}.path_prefix"),
                "must start with '/'",
            ));
        }
    }

    if let Some(placeholder) = &route.placeholder {
        if StatusCode::from_u16(placeholder.status_code).is_err() {
            errors.push(ValidationError::new(
                format!("{prefix}.placeholder.status_code"),
                format!("{} is not a valid status code", placeholder.status_code),
            ));
        }
    }
}
