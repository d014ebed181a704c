//! In-process memory store
//!
//! Satisfies both store contracts without a database. Used by tests and by
//! anything that wants to run the loop against scratch memory. Supports
//! failure injection through [`InMemoryStore::fail_next`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use sdk::errors::{EngineError, Result};
use sdk::types::{ConsolidatedLearning, MemoryEntry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{LongTermStore, ShortTermStore};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    short_term: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
    entries: Mutex<Vec<MemoryEntry>>,
    learnings: Mutex<Vec<ConsolidatedLearning>>,
    failures: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` operations fail with `StoreUnavailable`
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Snapshot of every long-term entry in append order
    pub fn entries(&self) -> Vec<MemoryEntry> {
        lock(&self.entries).clone()
    }

    fn check_failure(&self) -> Result<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(EngineError::StoreUnavailable(
                "injected store failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Translate a `*`/`?` glob into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| EngineError::Config(format!("invalid key pattern: {}", e)))
}

#[async_trait]
impl ShortTermStore for InMemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_failure()?;
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let expires_at = now + ttl;

        let mut map = lock(&self.short_term);
        map.retain(|_, (_, exp)| *exp > now);
        map.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_failure()?;
        let now = Utc::now();
        let map = lock(&self.short_term);
        Ok(map
            .get(key)
            .filter(|(_, exp)| *exp > now)
            .map(|(value, _)| value.clone()))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check_failure()?;
        let re = glob_to_regex(pattern)?;
        let now = Utc::now();
        let map = lock(&self.short_term);
        let mut keys: Vec<String> = map
            .iter()
            .filter(|(key, (_, exp))| *exp > now && re.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl LongTermStore for InMemoryStore {
    async fn append(&self, entry: &MemoryEntry) -> Result<()> {
        self.check_failure()?;
        lock(&self.entries).push(entry.clone());
        Ok(())
    }

    async fn recent_entries(&self, limit: usize) -> Result<Vec<MemoryEntry>> {
        self.check_failure()?;
        let entries = lock(&self.entries);
        let mut indexed: Vec<(usize, &MemoryEntry)> = entries.iter().enumerate().collect();
        indexed.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ib.cmp(ia)));
        Ok(indexed
            .into_iter()
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn append_learning(&self, learning: &ConsolidatedLearning) -> Result<()> {
        self.check_failure()?;
        lock(&self.learnings).push(learning.clone());
        Ok(())
    }

    async fn learnings(&self) -> Result<Vec<ConsolidatedLearning>> {
        self.check_failure()?;
        let mut learnings = lock(&self.learnings).clone();
        learnings.reverse();
        learnings.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(learnings)
    }

    async fn count(&self) -> Result<u64> {
        self.check_failure()?;
        Ok(lock(&self.entries).len() as u64)
    }

    async fn touch(&self, ids: &[String], at: DateTime<Utc>) -> Result<()> {
        self.check_failure()?;
        let mut entries = lock(&self.entries);
        for entry in entries.iter_mut().filter(|e| ids.contains(&e.id)) {
            entry.access_count += 1;
            entry.last_accessed = Some(at);
        }
        Ok(())
    }
}
