//! SQLite-backed memory store
//!
//! Short-term entries live in `short_term` with an absolute `expires_at`
//! (unix millis). Reads filter on it and every write purges lapsed rows, so
//! expiry holds without a sweeper task. Long-term entries live in
//! `long_term_memories` and `consolidated_learnings` and are only appended.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::{EngineError, Result};
use sdk::types::{ConsolidatedLearning, MemoryEntry, MemoryType};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{LongTermStore, ShortTermStore};
use crate::db::classify_sqlx_error;

/// Memory store over the agent database
#[derive(Clone)]
pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Drop every lapsed short-term row
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM short_term WHERE expires_at <= ?")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

        if result.rows_affected() > 0 {
            debug!("Purged {} expired short-term keys", result.rows_affected());
        }
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ShortTermStore for SqliteMemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));

        sqlx::query(
            r#"
            INSERT INTO short_term (key, value, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        self.purge_expired().await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT value FROM short_term WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx_error)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT key FROM short_term WHERE key GLOB ? AND expires_at > ? ORDER BY key",
        )
        .bind(pattern)
        .bind(Utc::now().timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx_error)
    }
}

#[async_trait]
impl LongTermStore for SqliteMemoryStore {
    async fn append(&self, entry: &MemoryEntry) -> Result<()> {
        let tags = serde_json::to_string(&entry.tags)?;

        sqlx::query(
            r#"
            INSERT INTO long_term_memories
                (id, timestamp, memory_type, content, summary, importance,
                 tags, access_count, last_accessed, source_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(entry.timestamp.timestamp_millis())
        .bind(entry.memory_type.as_str())
        .bind(&entry.content)
        .bind(&entry.summary)
        .bind(entry.importance)
        .bind(tags)
        .bind(entry.access_count as i64)
        .bind(entry.last_accessed.map(|t| t.timestamp_millis()))
        .bind(&entry.source_id)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        debug!("Appended {} memory {}", entry.memory_type.as_str(), entry.id);
        Ok(())
    }

    async fn recent_entries(&self, limit: usize) -> Result<Vec<MemoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, memory_type, content, summary, importance,
                   tags, access_count, last_accessed, source_id
            FROM long_term_memories
            ORDER BY timestamp DESC, seq DESC
            LIMIT ?
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn append_learning(&self, learning: &ConsolidatedLearning) -> Result<()> {
        let sources = serde_json::to_string(&learning.source_memory_ids)?;

        sqlx::query(
            r#"
            INSERT INTO consolidated_learnings
                (id, created, topic, summary, source_memory_ids, confidence)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&learning.id)
        .bind(learning.created.timestamp_millis())
        .bind(&learning.topic)
        .bind(&learning.summary)
        .bind(sources)
        .bind(learning.confidence)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        Ok(())
    }

    async fn learnings(&self) -> Result<Vec<ConsolidatedLearning>> {
        let rows = sqlx::query(
            r#"
            SELECT id, created, topic, summary, source_memory_ids, confidence
            FROM consolidated_learnings
            ORDER BY created DESC, seq DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        rows.iter()
            .map(|row| -> Result<ConsolidatedLearning> {
                let sources: String = row.get("source_memory_ids");
                Ok(ConsolidatedLearning {
                    id: row.get("id"),
                    created: from_millis(row.get("created")),
                    topic: row.get("topic"),
                    summary: row.get("summary"),
                    source_memory_ids: serde_json::from_str(&sources)?,
                    confidence: row.get("confidence"),
                })
            })
            .collect()
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM long_term_memories")
            .fetch_one(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(count.max(0) as u64)
    }

    async fn touch(&self, ids: &[String], at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;
        for id in ids {
            sqlx::query(
                r#"
                UPDATE long_term_memories
                SET access_count = access_count + 1, last_accessed = ?
                WHERE id = ?
                "#,
            )
            .bind(at.timestamp_millis())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(classify_sqlx_error)?;
        }
        tx.commit().await.map_err(classify_sqlx_error)?;
        Ok(())
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<MemoryEntry> {
    let memory_type: String = row.get("memory_type");
    let tags: String = row.get("tags");
    let tags: BTreeSet<String> = serde_json::from_str(&tags)?;
    let access_count: i64 = row.get("access_count");
    let last_accessed: Option<i64> = row.get("last_accessed");

    Ok(MemoryEntry {
        id: row.get("id"),
        timestamp: from_millis(row.get("timestamp")),
        memory_type: MemoryType::from_str(&memory_type)
            .map_err(|e| EngineError::Database(e.to_string()))?,
        content: row.get("content"),
        summary: row.get("summary"),
        importance: row.get("importance"),
        tags,
        access_count: access_count.max(0) as u64,
        last_accessed: last_accessed.map(from_millis),
        source_id: row.get("source_id"),
    })
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
