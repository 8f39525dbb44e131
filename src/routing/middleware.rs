//! Routing middleware.
//!
//! Attaches the matched `Arc<RoutingTarget>` to the request and counts the
//! request as pending for its service until the response is produced.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::observability::metrics::PendingGuard;
use crate::routing::RouteTable;

pub async fn route_request(
    State(table): State<Arc<RouteTable>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(route) = table.match_request(&req) else {
        tracing::warn!(
            method = %req.method(),
            path = %req.uri().path(),
            "No route matched"
        );
        return (StatusCode::NOT_FOUND, "No matching route found").into_response();
    };

    let target = route.target().clone();
    tracing::debug!(
        route = %route.name,
        namespace = %target.namespace,
        service = %target.service,
        "Route matched"
    );

    let _pending = PendingGuard::new(&target.namespace, &target.service);
    req.extensions_mut().insert(target);
    next.run(req).await
}
