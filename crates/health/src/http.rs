//! HTTP query surface for the registry
//!
//! ```text
//! GET /health/ping        liveness of the health service itself
//! GET /health/summary     cluster roll-up
//! GET /health/healthy     records currently HEALTHY
//! GET /health/unhealthy   records currently UNHEALTHY
//! GET /health/nodes/{id}  one record, 404 when unregistered
//! ```

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::record::{HealthRecord, HealthSummary};
use crate::registry::HealthRegistry;

/// Build the health API router.
pub fn router(registry: Arc<HealthRegistry>) -> Router {
    Router::new()
        .route("/health/ping", get(ping))
        .route("/health/summary", get(summary))
        .route("/health/healthy", get(healthy))
        .route("/health/unhealthy", get(unhealthy))
        .route("/health/nodes/:id", get(node))
        .with_state(registry)
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn summary(State(registry): State<Arc<HealthRegistry>>) -> Json<HealthSummary> {
    Json(registry.summary())
}

async fn healthy(State(registry): State<Arc<HealthRegistry>>) -> Json<Vec<HealthRecord>> {
    Json(registry.list_healthy())
}

async fn unhealthy(State(registry): State<Arc<HealthRegistry>>) -> Json<Vec<HealthRecord>> {
    Json(registry.list_unhealthy())
}

async fn node(
    State(registry): State<Arc<HealthRegistry>>,
    Path(id): Path<String>,
) -> Result<Json<HealthRecord>, StatusCode> {
    registry.get(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}
