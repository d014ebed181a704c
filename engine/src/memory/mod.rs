//! Tiered memory
//!
//! Two contracts back the agent's memory:
//!
//! - [`ShortTermStore`]: a TTL key/value namespace holding the live state
//!   snapshot plus per-record thought and action entries. Entries vanish on
//!   their own once their TTL lapses.
//! - [`LongTermStore`]: an append-only log of [`MemoryEntry`] values and the
//!   [`ConsolidatedLearning`]s derived from them. Nothing here is ever deleted.
//!
//! [`SqliteMemoryStore`] implements both over the agent database and
//! [`InMemoryStore`] implements both in process for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::Result;
use sdk::types::{ConsolidatedLearning, MemoryEntry};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub mod consolidation;
pub mod context;
pub mod importance;
pub mod in_memory;
pub mod retry;
pub mod sqlite;

pub use consolidation::{ConsolidationReport, ConsolidationService, ConsolidationSettings};
pub use context::{ContextSettings, MemoryContextBuilder, ScoredMemory, NO_MEMORY_CONTEXT};
pub use importance::{ImportancePolicy, ReferenceImportancePolicy};
pub use in_memory::InMemoryStore;
pub use retry::{retry, RetryPolicy};
pub use sqlite::SqliteMemoryStore;

/// TTL key/value store for fast-changing agent state
#[async_trait]
pub trait ShortTermStore: Send + Sync {
    /// Write `value` under `key`, replacing any previous value and TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Read a live value; expired or unknown keys yield `None`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Live keys matching a glob pattern (`*` and `?` wildcards)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Append-only store of durable memories
#[async_trait]
pub trait LongTermStore: Send + Sync {
    async fn append(&self, entry: &MemoryEntry) -> Result<()>;

    /// Up to `limit` entries, newest first
    async fn recent_entries(&self, limit: usize) -> Result<Vec<MemoryEntry>>;

    async fn append_learning(&self, learning: &ConsolidatedLearning) -> Result<()>;

    /// Every learning, newest first
    async fn learnings(&self) -> Result<Vec<ConsolidatedLearning>>;

    /// Number of memory entries (learnings excluded)
    async fn count(&self) -> Result<u64>;

    /// Bump access bookkeeping for the given entry ids; unknown ids are ignored
    async fn touch(&self, ids: &[String], at: DateTime<Utc>) -> Result<()>;
}

/// Serialize `value` as JSON and store it under `key`
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn ShortTermStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let json = serde_json::to_string(value)?;
    store.set(key, &json, ttl).await
}

/// Read `key` and decode it from JSON
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ShortTermStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}
