//! Route lookup.
//!
//! # Responsibilities
//! - Compile route configs into matchers and routing objects
//! - Look up matching route for request
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in priority order (acceptable for typical route counts)
//! - Equal priorities keep their config order

use std::sync::Arc;
use std::time::Duration;

use axum::http::uri::InvalidUri;
use axum::http::{Request, Uri};

use crate::config::{PlaceholderFeatureConfig, RouteConfig};
use crate::forwarding::{PlaceholderSettings, RoutingTarget};
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher, RequestKey};

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("route '{route}': invalid upstream '{upstream}': {source}")]
    InvalidUpstream {
        route: String,
        upstream: String,
        #[source]
        source: InvalidUri,
    },
}

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub priority: u32,
    matcher: AndMatcher,
    target: Arc<RoutingTarget>,
}

impl Route {
    pub fn target(&self) -> &Arc<RoutingTarget> {
        &self.target
    }
}

/// Static route table, first match wins.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(
        routes: &[RouteConfig],
        placeholder: &PlaceholderFeatureConfig,
    ) -> Result<Self, RouteError> {
        let default_refresh = Duration::from_secs(placeholder.default_refresh_interval_secs);
        let mut compiled = routes
            .iter()
            .map(|route| compile(route, default_refresh))
            .collect::<Result<Vec<_>, _>>()?;
        // Stable sort, so ties keep config order.
        compiled.sort_by(|a, b| b.priority.cmp(&a.priority));

        tracing::info!(routes = compiled.len(), "Route table compiled");
        Ok(Self { routes: compiled })
    }

    pub fn match_request<B>(&self, req: &Request<B>) -> Option<&Route> {
        let key = RequestKey::from_request(req);
        self.routes.iter().find(|route| route.matcher.matches(&key))
    }

    /// Routing objects of every route, in match order.
    pub fn targets(&self) -> impl Iterator<Item = &RoutingTarget> {
        self.routes.iter().map(|route| route.target.as_ref())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn compile(route: &RouteConfig, default_refresh: Duration) -> Result<Route, RouteError> {
    let upstream: Uri = route
        .upstream
        .parse()
        .map_err(|source| RouteError::InvalidUpstream {
            route: route.name.clone(),
            upstream: route.upstream.clone(),
            source,
        })?;

    let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
    if let Some(host) = &route.host {
        matchers.push(Box::new(HostMatcher::new(host)));
    }
    if let Some(prefix) = &route.path_prefix {
        matchers.push(Box::new(PathPrefixMatcher::new(prefix)));
    }

    let mut target = RoutingTarget::new(&route.namespace, &route.service, upstream);
    if let Some(p) = &route.placeholder {
        target = target.with_placeholder(PlaceholderSettings {
            enabled: p.enabled,
            status_code: p.status_code,
            refresh_interval: p
                .refresh_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(default_refresh),
            content: p.content.clone(),
            headers: p.headers.clone(),
        });
    }

    Ok(Route {
        name: route.name.clone(),
        priority: route.priority,
        matcher: AndMatcher::new(matchers),
        target: Arc::new(target),
    })
}
