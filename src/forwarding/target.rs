//! Per-request routing object.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, Uri};

/// Identifies the scale target a request is forwarded to.
///
/// Attached to the request extensions by the routing layer as
/// `Arc<RoutingTarget>` and only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTarget {
    pub namespace: String,
    pub service: String,
    /// Base URL requests are forwarded to.
    pub upstream: Uri,
    pub placeholder: Option<PlaceholderSettings>,
}

/// Placeholder page settings of a single target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderSettings {
    pub enabled: bool,
    pub status_code: u16,
    pub refresh_interval: Duration,
    /// Inline template. `None` selects the built-in page.
    pub content: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl RoutingTarget {
    pub fn new(namespace: impl Into<String>, service: impl Into<String>, upstream: Uri) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            upstream,
            placeholder: None,
        }
    }

    pub fn with_placeholder(mut self, placeholder: PlaceholderSettings) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    /// True when the target asks for a placeholder while scaled to zero.
    pub fn placeholder_enabled(&self) -> bool {
        self.placeholder.as_ref().is_some_and(|p| p.enabled)
    }
}

/// Access to the routing object carried by a request.
pub trait RoutingTargetExt {
    fn routing_target(&self) -> Option<Arc<RoutingTarget>>;
}

impl<B> RoutingTargetExt for Request<B> {
    fn routing_target(&self) -> Option<Arc<RoutingTarget>> {
        self.extensions().get::<Arc<RoutingTarget>>().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn settings(enabled: bool) -> PlaceholderSettings {
        PlaceholderSettings {
            enabled,
            status_code: 503,
            refresh_interval: Duration::from_secs(5),
            content: None,
            headers: BTreeMap::new(),
        }
    }

    #[test]
    fn placeholder_flag() {
        let target = RoutingTarget::new("ns", "svc", Uri::from_static("http://svc:80"));
        assert!(!target.placeholder_enabled());
        assert!(!target.clone().with_placeholder(settings(false)).placeholder_enabled());
        assert!(target.with_placeholder(settings(true)).placeholder_enabled());
    }

    #[test]
    fn reads_target_from_extensions() {
        let mut req = Request::new(Body::empty());
        assert!(req.routing_target().is_none());

        let target = Arc::new(RoutingTarget::new("ns", "svc", Uri::from_static("http://svc:80")));
        req.extensions_mut().insert(target.clone());
        assert_eq!(req.routing_target(), Some(target));
    }
}
