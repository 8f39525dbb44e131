//! Template based placeholder pages.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, RETRY_AFTER};
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};

use crate::forwarding::RoutingTarget;
use crate::http::X_REQUEST_ID;
use crate::placeholder::{PlaceholderError, PlaceholderResponder, PLACEHOLDER_SERVED_HEADER};

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="{{refresh_interval}}">
<title>Starting {{service}}</title>
</head>
<body>
<h1>{{service}} is starting up</h1>
<p>The service in namespace {{namespace}} is scaling up from zero. This page refreshes every {{refresh_interval}} seconds.</p>
<p><small>Request {{request_id}}</small></p>
</body>
</html>
"#;

/// Renders the target's inline template, or a built-in page.
///
/// Supported variables: `{{namespace}}`, `{{service}}`,
/// `{{refresh_interval}}` (seconds) and `{{request_id}}`.
#[derive(Debug, Clone, Default)]
pub struct TemplatePlaceholder;

impl TemplatePlaceholder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PlaceholderResponder for TemplatePlaceholder {
    async fn serve_placeholder(
        &self,
        request: &Parts,
        target: &RoutingTarget,
    ) -> Result<Response<Body>, PlaceholderError> {
        let settings = target
            .placeholder
            .as_ref()
            .ok_or_else(|| PlaceholderError::NotConfigured {
                namespace: target.namespace.clone(),
                service: target.service.clone(),
            })?;

        let status = StatusCode::from_u16(settings.status_code)
            .map_err(|_| PlaceholderError::InvalidStatus(settings.status_code))?;
        let refresh_secs = settings.refresh_interval.as_secs().max(1);
        let request_id = request
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let template = settings.content.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        let body = template
            .replace("{{namespace}}", &escape_html(&target.namespace))
            .replace("{{service}}", &escape_html(&target.service))
            .replace("{{refresh_interval}}", &refresh_secs.to_string())
            .replace("{{request_id}}", &escape_html(request_id));

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store, must-revalidate"));
        headers.insert(RETRY_AFTER, HeaderValue::from(refresh_secs));
        headers.insert(PLACEHOLDER_SERVED_HEADER, HeaderValue::from_static("true"));

        for (name, value) in &settings.headers {
            let invalid = |reason: String| PlaceholderError::InvalidHeader {
                name: name.clone(),
                reason,
            };
            let header_name = HeaderName::try_from(name.as_str()).map_err(|e| invalid(e.to_string()))?;
            let header_value = HeaderValue::try_from(value.as_str()).map_err(|e| invalid(e.to_string()))?;
            headers.insert(header_name, header_value);
        }

        Ok(response)
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
