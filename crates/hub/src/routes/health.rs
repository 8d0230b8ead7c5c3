//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::dispatch::{ActiveOperations, FlowServices};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_operations: ActiveOperations,
}

/// GET /health: process status and the number of live flow operations.
pub async fn check(State(services): State<Arc<FlowServices>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_operations: services.active_operations().await,
    })
}
