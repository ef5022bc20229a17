use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::core::errors::RagError;

/// Service metrics backed by an explicitly owned registry.
///
/// Handles are cheap to clone and safe to update from any task; the registry
/// lives as long as the application state.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub requests_total: IntCounterVec,
    pub request_latency: HistogramVec,
    pub vector_search_latency: Histogram,
    pub llm_latency: Histogram,
    pub documents_processed: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, RagError> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("rag_requests_total", "Total number of RAG requests"),
            &["method", "status"],
        )
        .map_err(RagError::internal)?;

        let request_latency = HistogramVec::new(
            HistogramOpts::new("rag_request_latency_seconds", "Request latency in seconds")
                .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
            &["method"],
        )
        .map_err(RagError::internal)?;

        let vector_search_latency = Histogram::with_opts(
            HistogramOpts::new("rag_vector_search_seconds", "Vector search latency in seconds")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )
        .map_err(RagError::internal)?;

        let llm_latency = Histogram::with_opts(
            HistogramOpts::new("rag_llm_latency_seconds", "LLM call latency in seconds")
                .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )
        .map_err(RagError::internal)?;

        let documents_processed = IntCounterVec::new(
            Opts::new(
                "rag_documents_processed_total",
                "Total number of documents processed",
            ),
            &["status"],
        )
        .map_err(RagError::internal)?;

        registry
            .register(Box::new(requests_total.clone()))
            .map_err(RagError::internal)?;
        registry
            .register(Box::new(request_latency.clone()))
            .map_err(RagError::internal)?;
        registry
            .register(Box::new(vector_search_latency.clone()))
            .map_err(RagError::internal)?;
        registry
            .register(Box::new(llm_latency.clone()))
            .map_err(RagError::internal)?;
        registry
            .register(Box::new(documents_processed.clone()))
            .map_err(RagError::internal)?;

        Ok(Self {
            registry,
            requests_total,
            request_latency,
            vector_search_latency,
            llm_latency,
            documents_processed,
        })
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn export(&self) -> Result<String, RagError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(RagError::internal)?;
        String::from_utf8(buffer).map_err(RagError::internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_contains_registered_series() {
        let metrics = Metrics::new().unwrap();
        metrics
            .requests_total
            .with_label_values(&["chat", "success"])
            .inc();
        metrics
            .documents_processed
            .with_label_values(&["error"])
            .inc();

        let text = metrics.export().unwrap();
        assert!(text.contains("rag_requests_total"));
        assert!(text.contains("rag_documents_processed_total"));
    }

    #[test]
    fn registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.requests_total.with_label_values(&["chat", "error"]).inc();

        assert!(!b.export().unwrap().contains(r#"status="error""#));
    }
}
