use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Failure taxonomy for the whole service.
///
/// Ingestion classifies into `NotFound` / `UnsupportedFormat` / `Processing`;
/// query-side collaborator faults surface as `Retrieval` / `Generation`;
/// `Connectivity` is reserved for the broker link.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("document processing failed: {0}")]
    Processing(String),
    #[error("retrieval failed: {0}")]
    Retrieval(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("broker unreachable: {0}")]
    Connectivity(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn processing<E: std::fmt::Display>(err: E) -> Self {
        RagError::Processing(err.to_string())
    }

    pub fn retrieval<E: std::fmt::Display>(err: E) -> Self {
        RagError::Retrieval(err.to_string())
    }

    pub fn generation<E: std::fmt::Display>(err: E) -> Self {
        RagError::Generation(err.to_string())
    }

    pub fn connectivity<E: std::fmt::Display>(err: E) -> Self {
        RagError::Connectivity(err.to_string())
    }

    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        RagError::Internal(err.to_string())
    }

    /// Metric label for document-processing outcomes.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            RagError::NotFound(_) => "not_found",
            RagError::UnsupportedFormat(_) => "unsupported",
            _ => "error",
        }
    }
}

impl IntoResponse for RagError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            RagError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            RagError::UnsupportedFormat(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
