//! The forwarding handler.
//!
//! # Responsibilities
//! - Short-circuit to a placeholder when the target has no ready endpoints
//! - Wait, bounded, for the target to have capacity
//! - Forward the request and mark the response with the cold start flag
//!
//! # Design Decisions
//! - Every path ends in exactly one response; errors never escape
//! - Endpoints lookup failures fail open to the wait path
//! - The wait is dropped, not detached, when the client goes away

use std::ops::ControlFlow;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, StatusCode};

use crate::forwarding::upstream::{bad_gateway, plain_response, Upstream};
use crate::forwarding::{ForwardingConfig, RoutingTarget, RoutingTargetExt};
use crate::observability::metrics;
use crate::placeholder::PlaceholderResponder;
use crate::scaling::{EndpointsCache, WaitContext, WaitError, WaitFunc};
use crate::upstream::RoundTrip;

/// Response header telling clients whether the request hit a cold start.
pub const COLD_START_HEADER: &str = "x-keda-http-cold-start";

/// Body of the response sent when the placeholder could not be rendered.
pub const PLACEHOLDER_FAILURE_BODY: &str = "error serving placeholder page";

/// Per-request orchestration of placeholder, wait and forward.
pub struct ForwardingHandler {
    config: ForwardingConfig,
    wait: Arc<dyn WaitFunc>,
    endpoints: Arc<dyn EndpointsCache>,
    placeholder: Option<Arc<dyn PlaceholderResponder>>,
    upstream: Upstream,
}

impl ForwardingHandler {
    /// `placeholder` is the feature switch: `None` never short-circuits.
    /// `round_tripper` is used for every request this handler forwards.
    pub fn new(
        config: ForwardingConfig,
        wait: Arc<dyn WaitFunc>,
        endpoints: Arc<dyn EndpointsCache>,
        placeholder: Option<Arc<dyn PlaceholderResponder>>,
        round_tripper: Arc<dyn RoundTrip>,
    ) -> Self {
        Self {
            config,
            wait,
            endpoints,
            placeholder,
            upstream: Upstream::new(round_tripper),
        }
    }

    pub fn config(&self) -> &ForwardingConfig {
        &self.config
    }

    /// Handle a request carrying its routing target in the extensions.
    pub async fn serve(&self, request: Request<Body>) -> Response<Body> {
        let target = request.routing_target();
        self.handle(target.as_deref(), request).await
    }

    /// Handle a request for an explicitly supplied routing target.
    pub async fn handle(&self, target: Option<&RoutingTarget>, request: Request<Body>) -> Response<Body> {
        let Some(target) = target else {
            tracing::error!(
                method = %request.method(),
                uri = %request.uri(),
                "Request reached the forwarding handler without a routing target"
            );
            return plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
        };

        let request = match self.placeholder_short_circuit(target, request).await {
            ControlFlow::Break(response) => return response,
            ControlFlow::Continue(request) => request,
        };

        let ctx = WaitContext::with_timeout(self.config.wait_timeout());
        let waited = tokio::time::timeout_at(
            ctx.deadline(),
            self.wait.wait(ctx, &target.namespace, &target.service),
        )
        .await
        .unwrap_or(Err(WaitError::DeadlineExceeded(ctx.timeout())));

        let cold_start = match waited {
            Ok(cold_start) => cold_start,
            Err(e) => {
                tracing::error!(
                    namespace = %target.namespace,
                    service = %target.service,
                    error = %e,
                    "Wait function failed, not forwarding request"
                );
                metrics::record_wait_failure(&target.namespace, &target.service);
                return bad_gateway(format!("error on backend ({e})"));
            }
        };

        if cold_start {
            tracing::info!(
                namespace = %target.namespace,
                service = %target.service,
                "Forwarding request after cold start"
            );
        }
        metrics::record_cold_start(&target.namespace, &target.service, cold_start);

        let mut response = self.upstream.forward(target, request).await;
        response.headers_mut().insert(
            COLD_START_HEADER,
            HeaderValue::from_static(if cold_start { "true" } else { "false" }),
        );
        response
    }

    /// Serve the placeholder when the feature is on, the target asks for it
    /// and the cache reports no ready endpoints. Otherwise hand the request
    /// back untouched.
    async fn placeholder_short_circuit(
        &self,
        target: &RoutingTarget,
        request: Request<Body>,
    ) -> ControlFlow<Response<Body>, Request<Body>> {
        let Some(placeholder) = &self.placeholder else {
            return ControlFlow::Continue(request);
        };
        if !target.placeholder_enabled() {
            return ControlFlow::Continue(request);
        }

        match self.endpoints.get(&target.namespace, &target.service) {
            Ok(endpoints) if endpoints.active() == 0 => {}
            Ok(_) => return ControlFlow::Continue(request),
            Err(e) => {
                tracing::warn!(
                    namespace = %target.namespace,
                    service = %target.service,
                    error = %e,
                    "Endpoints lookup failed, skipping placeholder check"
                );
                return ControlFlow::Continue(request);
            }
        }

        tracing::info!(
            namespace = %target.namespace,
            service = %target.service,
            reason = "zero replicas detected",
            "Serving placeholder page immediately"
        );

        let (parts, _body) = request.into_parts();
        match placeholder.serve_placeholder(&parts, target).await {
            Ok(response) => {
                metrics::record_placeholder_served(&target.namespace, &target.service);
                ControlFlow::Break(response)
            }
            Err(e) => {
                tracing::error!(
                    namespace = %target.namespace,
                    service = %target.service,
                    error = %e,
                    "Failed to serve placeholder page"
                );
                ControlFlow::Break(bad_gateway(PLACEHOLDER_FAILURE_BODY.to_string()))
            }
        }
    }
}
