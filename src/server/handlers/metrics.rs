use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::core::errors::RagError;
use crate::state::AppState;

pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, RagError> {
    let body = state.metrics.export()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
