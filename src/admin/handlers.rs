use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::scaling::ServiceReadiness;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub routes: usize,
    pub tracked_services: usize,
}

/// Body of `PUT /admin/endpoints/{namespace}/{service}`.
#[derive(Debug, Deserialize)]
pub struct ReadinessUpdate {
    pub ready: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        routes: state.routes.len(),
        tracked_services: state.cache.snapshot_all().len(),
    })
}

pub async fn get_endpoints(State(state): State<AdminState>) -> Json<Vec<ServiceReadiness>> {
    Json(state.cache.snapshot_all())
}

pub async fn put_endpoints(
    State(state): State<AdminState>,
    Path((namespace, service)): Path<(String, String)>,
    Json(update): Json<ReadinessUpdate>,
) -> (StatusCode, Json<ServiceReadiness>) {
    tracing::info!(%namespace, %service, ready = update.ready, "Readiness set through admin API");
    state.cache.set_ready(&namespace, &service, update.ready);
    (
        StatusCode::OK,
        Json(ServiceReadiness {
            namespace,
            service,
            ready: update.ready,
        }),
    )
}
