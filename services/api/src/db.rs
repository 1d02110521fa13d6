//! Data Access Layer
//!
//! This module contains all the functions for interacting with the
//! PostgreSQL database, and implements the core's `ContentProvider` and
//! `SessionStore` contracts on top of it. Queries use the runtime `sqlx`
//! API with explicit row mapping so the crate builds without a live
//! database connection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use edubot_core::{
    content::ContentProvider,
    session::{Session, Turn},
    store::SessionStore,
    topic::{Passage, SubTopic},
};
use sqlx::{PgPool, Row};

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

/// A topic with its content volume, as listed for the topic browser.
#[derive(Debug, Clone)]
pub struct TopicRow {
    pub topic: String,
    pub chunk_count: i64,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Lists every topic that has content, with its chunk count.
    pub async fn list_topics(&self) -> Result<Vec<TopicRow>> {
        let rows = sqlx::query(
            r#"
            SELECT topic, COUNT(*) AS chunk_count
            FROM content_chunks
            GROUP BY topic
            ORDER BY topic
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(TopicRow {
                    topic: row.try_get("topic")?,
                    chunk_count: row.try_get("chunk_count")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ContentProvider for Db {
    /// Returns the ordered sub-topic list for a topic.
    async fn list_subtopics(&self, topic: &str) -> Result<Vec<SubTopic>> {
        let rows = sqlx::query(
            r#"
            SELECT title, body
            FROM content_chunks
            WHERE topic = $1
            ORDER BY position, id
            "#,
        )
        .bind(topic)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(SubTopic {
                    title: row.try_get("title")?,
                    body: row.try_get("body")?,
                })
            })
            .collect()
    }

    /// Case-insensitive substring search within a topic's content.
    async fn search(&self, topic: &str, query: &str, limit: usize) -> Result<Vec<Passage>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, body
            FROM content_chunks
            WHERE topic = $1 AND (body ILIKE '%' || $2 || '%' OR title ILIKE '%' || $2 || '%')
            ORDER BY position, id
            LIMIT $3
            "#,
        )
        .bind(topic)
        .bind(query)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Passage {
                    id: row.try_get("chunk_id")?,
                    text: row.try_get("body")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SessionStore for Db {
    /// Upserts the full session state, keyed by session id. The state is
    /// stored whole as JSON next to a few queryable identity columns.
    async fn upsert_session(&self, session: &Session) -> Result<()> {
        let state_json = serde_json::to_value(session)?;
        sqlx::query(
            r#"
            INSERT INTO revision_sessions
                (session_id, student_id, topic, is_complete, state_json, started_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (session_id) DO UPDATE SET
                is_complete = EXCLUDED.is_complete,
                state_json = EXCLUDED.state_json,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.student_id)
        .bind(&session.topic)
        .bind(session.is_complete)
        .bind(state_json)
        .bind(session.started_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT state_json FROM revision_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let state_json: serde_json::Value = row.try_get("state_json")?;
                let session = serde_json::from_value(state_json)
                    .context("Malformed session state in store")?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn append_turn(&self, session_id: &str, turn: &Turn) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO revision_turns
                (session_id, turn, user_text, assistant_text, stage, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session_id)
        .bind(turn.turn as i32)
        .bind(turn.user_text.as_deref())
        .bind(&turn.assistant_text)
        .bind(turn.stage.as_str())
        .bind(turn.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
