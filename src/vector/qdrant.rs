//! Qdrant retrieval client over the HTTP API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ChunkPoint, RetrievalClient, RetrievalMatch};
use crate::core::errors::RagError;

pub struct QdrantRetrieval {
    base_url: String,
    collection: String,
    client: Client,
}

impl QdrantRetrieval {
    pub fn new(base_url: String, collection: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            collection,
            client: Client::new(),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }
}

#[async_trait]
impl RetrievalClient for QdrantRetrieval {
    async fn ensure_collection(&self, dimension: usize) -> Result<(), RagError> {
        let res = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(RagError::retrieval)?;

        if res.status().is_success() {
            tracing::debug!("collection {} already exists", self.collection);
            return Ok(());
        }
        if res.status() != StatusCode::NOT_FOUND {
            return Err(RagError::Retrieval(format!(
                "collection lookup failed: {}",
                res.status()
            )));
        }

        tracing::info!("creating collection {}", self.collection);
        let body = json!({
            "vectors": { "size": dimension, "distance": "Cosine" }
        });
        let res = self
            .client
            .put(self.collection_url())
            .json(&body)
            .send()
            .await
            .map_err(RagError::retrieval)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(RagError::Retrieval(format!(
                "collection create failed: {}",
                text
            )));
        }

        Ok(())
    }

    async fn upsert(&self, points: Vec<ChunkPoint>) -> Result<(), RagError> {
        if points.is_empty() {
            return Ok(());
        }

        let body = json!({
            "points": points.iter().map(point_body).collect::<Vec<_>>()
        });

        let res = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&body)
            .send()
            .await
            .map_err(RagError::retrieval)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(RagError::Retrieval(format!("upsert failed: {}", text)));
        }

        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievalMatch>, RagError> {
        let body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true
        });

        let res = self
            .client
            .post(format!("{}/points/query", self.collection_url()))
            .json(&body)
            .send()
            .await
            .map_err(RagError::retrieval)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(RagError::Retrieval(format!("search failed: {}", text)));
        }

        let payload: QueryResponse = res.json().await.map_err(RagError::retrieval)?;
        Ok(payload
            .result
            .points
            .into_iter()
            .map(match_from_point)
            .collect())
    }
}

// Payload keys `source`, `page`, `page_content` match the wire format the
// index was originally populated with.
fn point_body(point: &ChunkPoint) -> Value {
    let mut payload = json!({
        "source": point.source,
        "page_content": point.text,
        "ordinal": point.ordinal,
    });
    if let Some(page) = point.page {
        payload["page"] = json!(page);
    }

    json!({
        "id": point.id.to_string(),
        "vector": point.vector,
        "payload": payload,
    })
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    points: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: Option<f32>,
    payload: Option<Value>,
}

fn match_from_point(point: ScoredPoint) -> RetrievalMatch {
    let payload = point.payload.unwrap_or(Value::Null);

    let source = payload
        .get("source")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let page = payload
        .get("page")
        .and_then(|v| v.as_u64())
        .map(|p| p as u32);
    let text = payload
        .get("page_content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    RetrievalMatch {
        source,
        page,
        text,
        score: point.score.unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn point_body_carries_citation_payload() {
        let point = ChunkPoint {
            id: Uuid::new_v4(),
            vector: vec![0.1, 0.2],
            text: "refunds within 30 days".to_string(),
            source: "/uploads/policy.pdf".to_string(),
            page: Some(2),
            ordinal: 7,
        };

        let body = point_body(&point);
        assert_eq!(body["payload"]["source"], "/uploads/policy.pdf");
        assert_eq!(body["payload"]["page"], 2);
        assert_eq!(body["payload"]["page_content"], "refunds within 30 days");
        assert_eq!(body["payload"]["ordinal"], 7);
    }

    #[test]
    fn point_body_omits_missing_page() {
        let point = ChunkPoint {
            id: Uuid::new_v4(),
            vector: vec![],
            text: String::new(),
            source: "notes.txt".to_string(),
            page: None,
            ordinal: 0,
        };

        let body = point_body(&point);
        assert!(body["payload"].get("page").is_none());
    }

    #[test]
    fn missing_score_and_payload_fall_back_to_sentinels() {
        let m = match_from_point(ScoredPoint {
            score: None,
            payload: None,
        });

        assert_eq!(m.score, 0.0);
        assert_eq!(m.source, "unknown");
        assert_eq!(m.page, None);
        assert!(m.text.is_empty());
    }

    #[test]
    fn response_parsing_maps_payload_fields() {
        let raw = serde_json::json!({
            "result": {
                "points": [
                    {
                        "id": "x",
                        "score": 0.87,
                        "payload": {
                            "source": "/docs/policy.txt",
                            "page": 0,
                            "page_content": "refunds within 30 days"
                        }
                    }
                ]
            }
        });

        let parsed: QueryResponse = serde_json::from_value(raw).unwrap();
        let matches: Vec<RetrievalMatch> = parsed
            .result
            .points
            .into_iter()
            .map(match_from_point)
            .collect();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].source, "/docs/policy.txt");
        assert_eq!(matches[0].page, Some(0));
        assert!(matches[0].score > 0.8);
    }
}
