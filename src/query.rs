//! Query pipeline: session resolution, retrieval, grounded generation.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::core::errors::RagError;
use crate::core::metrics::Metrics;
use crate::embedding::Embedder;
use crate::history::{ConversationStore, MessageRole, StoredMessage};
use crate::llm::{ChatMessage, GenerationClient};
use crate::vector::{RetrievalClient, RetrievalMatch};

pub const NO_RESULTS_ANSWER: &str = "No relevant information found in documents.";
pub const FAILURE_ANSWER: &str = "Error processing request.";

const HISTORY_LIMIT: i64 = 10;
const SEARCH_LIMIT: usize = 3;
const CONTEXT_DELIMITER: &str = "\n---\n";

const SYSTEM_PROMPT_POLICY: &str = "You are a corporate AI assistant. \
Answer strictly based on the provided context. \
If information is missing, say 'No information found'.";

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub doc_name: String,
    pub page: u32,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub session_id: String,
}

pub struct QueryPipeline {
    store: ConversationStore,
    retrieval: Arc<dyn RetrievalClient>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn GenerationClient>,
    metrics: Arc<Metrics>,
}

impl QueryPipeline {
    pub fn new(
        store: ConversationStore,
        retrieval: Arc<dyn RetrievalClient>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn GenerationClient>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            retrieval,
            embedder,
            llm,
            metrics,
        }
    }

    /// Answer a question in the context of a conversation. Never fails
    /// outward: every internal fault degrades to a fixed failure answer so
    /// the RPC boundary can always respond.
    pub async fn answer(&self, query: &str, requested_session: Option<&str>) -> ChatAnswer {
        let started = Instant::now();

        let response = match self.store.get_or_create_session(requested_session).await {
            Ok((session_id, is_new)) => {
                if is_new {
                    tracing::debug!("started session {}", session_id);
                }
                match self.run_turn(&session_id, query).await {
                    Ok(answer) => answer,
                    Err(err) => {
                        tracing::error!("query pipeline error: {}", err);
                        self.metrics
                            .requests_total
                            .with_label_values(&["chat", "error"])
                            .inc();
                        ChatAnswer {
                            answer: FAILURE_ANSWER.to_string(),
                            sources: Vec::new(),
                            session_id: session_id.to_string(),
                        }
                    }
                }
            }
            Err(err) => {
                tracing::error!("session resolution failed: {}", err);
                self.metrics
                    .requests_total
                    .with_label_values(&["chat", "error"])
                    .inc();
                ChatAnswer {
                    answer: FAILURE_ANSWER.to_string(),
                    sources: Vec::new(),
                    session_id: requested_session.unwrap_or_default().to_string(),
                }
            }
        };

        self.metrics
            .request_latency
            .with_label_values(&["chat"])
            .observe(started.elapsed().as_secs_f64());

        response
    }

    async fn run_turn(&self, session_id: &Uuid, query: &str) -> Result<ChatAnswer, RagError> {
        // The question is recorded before any retrieval or generation work,
        // so it survives every later failure.
        self.store
            .append_message(session_id, MessageRole::User, query)
            .await?;

        let recent = self
            .store
            .list_recent_messages(session_id, HISTORY_LIMIT)
            .await?;
        // History means prior turns only; the tail is the question we just
        // wrote.
        let history = &recent[..recent.len().saturating_sub(1)];

        let search_started = Instant::now();
        let query_vector = self
            .embedder
            .embed(query)
            .await
            .map_err(RagError::retrieval)?;
        let matches = self.retrieval.search(&query_vector, SEARCH_LIMIT).await?;
        self.metrics
            .vector_search_latency
            .observe(search_started.elapsed().as_secs_f64());

        if matches.is_empty() {
            self.store
                .append_message(session_id, MessageRole::Assistant, NO_RESULTS_ANSWER)
                .await?;
            self.metrics
                .requests_total
                .with_label_values(&["chat", "no_results"])
                .inc();
            tracing::info!("no matches for query: {:.50}", query);
            return Ok(ChatAnswer {
                answer: NO_RESULTS_ANSWER.to_string(),
                sources: Vec::new(),
                session_id: session_id.to_string(),
            });
        }

        let sources: Vec<SourceRef> = matches.iter().map(source_ref).collect();
        let system_prompt = render_system_prompt(&render_context(&matches));
        let messages = build_messages(&system_prompt, history, query);

        let llm_started = Instant::now();
        let answer = self.llm.generate(&messages).await?;
        self.metrics
            .llm_latency
            .observe(llm_started.elapsed().as_secs_f64());

        self.store
            .append_message(session_id, MessageRole::Assistant, &answer)
            .await?;

        self.metrics
            .requests_total
            .with_label_values(&["chat", "success"])
            .inc();

        Ok(ChatAnswer {
            answer,
            sources,
            session_id: session_id.to_string(),
        })
    }
}

/// Render matches (already best-first) into the grounding context block.
fn render_context(matches: &[RetrievalMatch]) -> String {
    matches
        .iter()
        .map(|m| {
            format!(
                "Document: {} (page {})\n{}",
                m.source,
                m.page.unwrap_or(0),
                m.text
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}

fn render_system_prompt(context: &str) -> String {
    format!("{}\n\nContext:\n{}", SYSTEM_PROMPT_POLICY, context)
}

fn build_messages(
    system_prompt: &str,
    history: &[StoredMessage],
    query: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt));

    for turn in history {
        messages.push(match turn.role {
            MessageRole::User => ChatMessage::user(turn.content.clone()),
            MessageRole::Assistant => ChatMessage::assistant(turn.content.clone()),
        });
    }

    messages.push(ChatMessage::user(query));
    messages
}

fn source_ref(m: &RetrievalMatch) -> SourceRef {
    SourceRef {
        doc_name: basename(&m.source),
        page: m.page.unwrap_or(0),
        score: m.score,
    }
}

fn basename(source: &str) -> String {
    Path::new(source)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ConversationStore;
    use crate::testutil::{
        FailingEmbedder, FailingGeneration, InMemoryRetrieval, StubEmbedder, StubGeneration,
    };
    use crate::vector::ChunkPoint;

    async fn test_store() -> ConversationStore {
        let path = std::env::temp_dir().join(format!("rag-query-test-{}.db", Uuid::new_v4()));
        ConversationStore::new(&path).await.unwrap()
    }

    async fn seeded_retrieval() -> Arc<InMemoryRetrieval> {
        let retrieval = Arc::new(InMemoryRetrieval::new());
        let embedder = StubEmbedder::new(8);
        let text = "Acme policy: refunds within 30 days.";
        retrieval
            .upsert(vec![ChunkPoint {
                id: Uuid::new_v4(),
                vector: embedder.embed(text).await.unwrap(),
                text: text.to_string(),
                source: "/uploads/policy.txt".to_string(),
                page: None,
                ordinal: 0,
            }])
            .await
            .unwrap();
        retrieval
    }

    fn pipeline(
        store: ConversationStore,
        retrieval: Arc<InMemoryRetrieval>,
        llm: Arc<dyn GenerationClient>,
    ) -> QueryPipeline {
        QueryPipeline::new(
            store,
            retrieval,
            Arc::new(StubEmbedder::new(8)),
            llm,
            Arc::new(Metrics::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn grounded_answer_cites_the_matched_document() {
        let store = test_store().await;
        let retrieval = seeded_retrieval().await;
        let llm = Arc::new(StubGeneration::new("The refund window is 30 days."));
        let pipeline = pipeline(store, retrieval, llm.clone());

        let response = pipeline.answer("What is the refund window?", None).await;

        assert_eq!(response.answer, "The refund window is 30 days.");
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].doc_name, "policy.txt");
        assert_eq!(response.sources[0].page, 0);
        assert!(response.sources[0].score > 0.0);
        assert!(Uuid::parse_str(&response.session_id).is_ok());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn session_continuity_across_turns() {
        let store = test_store().await;
        let retrieval = seeded_retrieval().await;
        let llm = Arc::new(StubGeneration::new("answer"));
        let pipeline = pipeline(store.clone(), retrieval, llm);

        let first = pipeline.answer("What is the refund window?", None).await;
        let sid = Uuid::parse_str(&first.session_id).unwrap();
        assert_eq!(store.list_recent_messages(&sid, 10).await.unwrap().len(), 2);

        let second = pipeline
            .answer("And for damaged goods?", Some(&first.session_id))
            .await;
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(store.list_recent_messages(&sid, 10).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn history_excludes_the_question_being_asked() {
        let store = test_store().await;
        let retrieval = seeded_retrieval().await;
        let llm = Arc::new(StubGeneration::new("answer"));
        let pipeline = pipeline(store, retrieval, llm.clone());

        let first = pipeline.answer("first question", None).await;
        pipeline
            .answer("second question", Some(&first.session_id))
            .await;

        let seen = llm.seen();
        // First turn: system + the current question only.
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[0][1].content, "first question");
        // Second turn: system + first user + first answer + current question.
        assert_eq!(seen[1].len(), 4);
        assert_eq!(seen[1][1].content, "first question");
        assert_eq!(seen[1][2].role, "assistant");
        assert_eq!(seen[1][3].content, "second question");
    }

    #[tokio::test]
    async fn empty_retrieval_short_circuits_generation() {
        let store = test_store().await;
        let retrieval = Arc::new(InMemoryRetrieval::new());
        let llm = Arc::new(StubGeneration::new("should not run"));
        let pipeline = pipeline(store.clone(), retrieval, llm.clone());

        let response = pipeline.answer("anything", None).await;

        assert_eq!(response.answer, NO_RESULTS_ANSWER);
        assert!(response.sources.is_empty());
        assert_eq!(llm.calls(), 0);

        // The fallback is still a full turn: question plus canned answer.
        let sid = Uuid::parse_str(&response.session_id).unwrap();
        let messages = store.list_recent_messages(&sid, 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, NO_RESULTS_ANSWER);
    }

    #[tokio::test]
    async fn generation_failure_degrades_but_keeps_the_question() {
        let store = test_store().await;
        let retrieval = seeded_retrieval().await;
        let pipeline = pipeline(store.clone(), retrieval, Arc::new(FailingGeneration));

        let response = pipeline.answer("What is the refund window?", None).await;

        assert_eq!(response.answer, FAILURE_ANSWER);
        assert!(response.sources.is_empty());

        let sid = Uuid::parse_str(&response.session_id).unwrap();
        let messages = store.list_recent_messages(&sid, 10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "What is the refund window?");
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_failure_answer() {
        let store = test_store().await;
        let retrieval = seeded_retrieval().await;
        let llm = Arc::new(StubGeneration::new("unused"));
        let pipeline = QueryPipeline::new(
            store,
            retrieval,
            Arc::new(FailingEmbedder),
            llm.clone(),
            Arc::new(Metrics::new().unwrap()),
        );

        let response = pipeline.answer("anything", None).await;
        assert_eq!(response.answer, FAILURE_ANSWER);
        assert_eq!(llm.calls(), 0);
        assert!(Uuid::parse_str(&response.session_id).is_ok());
    }

    #[test]
    fn context_renders_citation_headers_with_page_sentinel() {
        let matches = vec![
            RetrievalMatch {
                source: "/docs/guide.pdf".to_string(),
                page: Some(4),
                text: "chapter four".to_string(),
                score: 0.9,
            },
            RetrievalMatch {
                source: "/docs/policy.txt".to_string(),
                page: None,
                text: "refunds within 30 days".to_string(),
                score: 0.7,
            },
        ];

        let context = render_context(&matches);
        assert_eq!(
            context,
            "Document: /docs/guide.pdf (page 4)\nchapter four\n---\nDocument: /docs/policy.txt (page 0)\nrefunds within 30 days"
        );
    }

    #[test]
    fn source_ref_uses_basename_and_sentinels() {
        let m = RetrievalMatch {
            source: "/uploads/2024/policy.txt".to_string(),
            page: None,
            text: String::new(),
            score: 0.5,
        };
        let s = source_ref(&m);
        assert_eq!(s.doc_name, "policy.txt");
        assert_eq!(s.page, 0);

        let m = RetrievalMatch {
            source: String::new(),
            page: Some(2),
            text: String::new(),
            score: 0.5,
        };
        assert_eq!(source_ref(&m).doc_name, "unknown");
    }
}
