//! Admin API.
//!
//! Bearer-key protected endpoints to inspect the proxy and drive the
//! endpoints cache by hand.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, put},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::routing::RouteTable;
use crate::scaling::InMemoryEndpointsCache;

#[derive(Clone)]
pub struct AdminState {
    pub cache: Arc<InMemoryEndpointsCache>,
    pub routes: Arc<RouteTable>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/endpoints", get(get_endpoints))
        .route("/admin/endpoints/{namespace}/{service}", put(put_endpoints))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
