use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::query::ChatAnswer;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
}

/// The one RPC of the query surface. Infallible by design: the pipeline
/// degrades internally, so this handler always produces a response body.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatAnswer> {
    let answer = state
        .query
        .answer(&request.message, request.session_id.as_deref())
        .await;
    Json(answer)
}
