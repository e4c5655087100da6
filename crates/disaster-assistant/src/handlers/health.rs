use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::services::workflow::WorkflowEngine;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    status: String,
    active_sessions: usize,
    history_capacity: usize,
}

pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

pub async fn readiness_check(State(engine): State<Arc<WorkflowEngine>>) -> (StatusCode, Json<ReadinessResponse>) {
    let stats = engine.sessions().stats();
    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready".to_string(),
            active_sessions: stats.active_sessions,
            history_capacity: stats.history_capacity,
        }),
    )
}
