//! Conversation store: chat sessions and their append-only message log.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::core::errors::RagError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    fn from_str(role: &str) -> Self {
        match role {
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::User,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub async fn new(db_path: &Path) -> Result<Self, RagError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(RagError::internal)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(RagError::internal)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), RagError> {
        sqlx::query(
            "\
            CREATE TABLE IF NOT EXISTS chat_sessions (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RagError::internal)?;

        sqlx::query(
            "\
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                FOREIGN KEY (session_id) REFERENCES chat_sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RagError::internal)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_session_id_id ON messages(session_id, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(RagError::internal)?;

        Ok(())
    }

    /// Reuse the session when the supplied id identifies one; otherwise
    /// create a fresh session. The bool reports whether a session was
    /// created by this call.
    pub async fn get_or_create_session(
        &self,
        requested: Option<&str>,
    ) -> Result<(Uuid, bool), RagError> {
        if let Some(id) = requested.and_then(|raw| Uuid::parse_str(raw).ok()) {
            let row = sqlx::query("SELECT id FROM chat_sessions WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(RagError::internal)?;

            if row.is_some() {
                return Ok((id, false));
            }
        }

        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO chat_sessions (id) VALUES (?1)")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(RagError::internal)?;

        Ok((id, true))
    }

    pub async fn append_message(
        &self,
        session_id: &Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<(), RagError> {
        sqlx::query("INSERT INTO messages (session_id, role, content) VALUES (?1, ?2, ?3)")
            .bind(session_id.to_string())
            .bind(role.as_str())
            .bind(content)
            .execute(&self.pool)
            .await
            .map_err(RagError::internal)?;

        Ok(())
    }

    /// The last `limit` messages of a session, oldest first. Insertion order
    /// (the autoincrement id) is the ordering key, so two messages written in
    /// the same millisecond still come back in write order.
    pub async fn list_recent_messages(
        &self,
        session_id: &Uuid,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, RagError> {
        let rows = sqlx::query(
            "\
            SELECT role, content, created_at
            FROM (
                SELECT id, role, content, created_at
                FROM messages
                WHERE session_id = ?1
                ORDER BY id DESC
                LIMIT ?2
            )
            ORDER BY id ASC",
        )
        .bind(session_id.to_string())
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(RagError::internal)?;

        rows.into_iter()
            .map(|row| {
                let role: String = row.try_get("role")?;
                Ok(StoredMessage {
                    role: MessageRole::from_str(&role),
                    content: row.try_get("content")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(RagError::internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> ConversationStore {
        let path = std::env::temp_dir().join(format!("rag-chat-test-{}.db", Uuid::new_v4()));
        ConversationStore::new(&path).await.unwrap()
    }

    #[tokio::test]
    async fn creates_session_when_none_requested() {
        let store = test_store().await;
        let (id, is_new) = store.get_or_create_session(None).await.unwrap();
        assert!(is_new);

        let (again, is_new) = store
            .get_or_create_session(Some(&id.to_string()))
            .await
            .unwrap();
        assert!(!is_new);
        assert_eq!(id, again);
    }

    #[tokio::test]
    async fn unknown_or_invalid_id_creates_new_session() {
        let store = test_store().await;

        let (_, is_new) = store
            .get_or_create_session(Some(&Uuid::new_v4().to_string()))
            .await
            .unwrap();
        assert!(is_new);

        let (_, is_new) = store
            .get_or_create_session(Some("not-a-uuid"))
            .await
            .unwrap();
        assert!(is_new);
    }

    #[tokio::test]
    async fn messages_come_back_oldest_first() {
        let store = test_store().await;
        let (sid, _) = store.get_or_create_session(None).await.unwrap();

        store
            .append_message(&sid, MessageRole::User, "first")
            .await
            .unwrap();
        store
            .append_message(&sid, MessageRole::Assistant, "second")
            .await
            .unwrap();
        store
            .append_message(&sid, MessageRole::User, "third")
            .await
            .unwrap();

        let all = store.list_recent_messages(&sid, 10).await.unwrap();
        let contents: Vec<&str> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);

        // The limit keeps the most recent window but preserves oldest-first.
        let windowed = store.list_recent_messages(&sid, 2).await.unwrap();
        let contents: Vec<&str> = windowed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["second", "third"]);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = test_store().await;
        let (a, _) = store.get_or_create_session(None).await.unwrap();
        let (b, _) = store.get_or_create_session(None).await.unwrap();

        store
            .append_message(&a, MessageRole::User, "only in a")
            .await
            .unwrap();

        assert_eq!(store.list_recent_messages(&a, 10).await.unwrap().len(), 1);
        assert!(store.list_recent_messages(&b, 10).await.unwrap().is_empty());
    }
}
