use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::sync::Arc;
use tracing::{info, Instrument};

use crate::models::chat::{ChatAnswer, ChatRequest};
use crate::services::workflow::{WorkflowEngine, WorkflowError};
use crate::utils::error::ApiError;

pub async fn chat_handler(
    State(engine): State<Arc<WorkflowEngine>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatAnswer>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(ApiError::BadRequest("Empty query".to_string()));
    }
    let session_id = request.session_id;

    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("chat", %request_id, session_id = %session_id);
    info!(parent: &span, "Chat request: query_len={}", query.len());

    // Run detached so a dropped connection does not cancel a turn halfway
    // through its history write.
    let task = {
        let engine = engine.clone();
        let session_id = session_id.clone();
        let query = query.clone();
        tokio::spawn(async move { engine.run_turn(&session_id, &query).await }.instrument(span))
    };

    let outcome = task
        .await
        .map_err(|e| ApiError::InternalError(format!("Turn task failed: {}", e)))?
        .map_err(|e| match e {
            WorkflowError::EmptyQuery => ApiError::BadRequest(e.to_string()),
            other => ApiError::InternalError(other.to_string()),
        })?;

    Ok(Json(ChatAnswer {
        success: true,
        query,
        answer: outcome.answer,
        session_id,
    }))
}
