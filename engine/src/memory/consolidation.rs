//! Consolidation: promoting short-term records into long-term memory
//!
//! Each pass reads every live `thought:*` and `action:*` record, scores it
//! with the configured [`ImportancePolicy`], appends the ones at or above the
//! promotion threshold to long-term memory, then clusters the promoted
//! entries by topic into [`ConsolidatedLearning`]s.
//!
//! A pass never deletes short-term keys; records leave only by TTL. Running
//! two passes over the same snapshot therefore promotes the same source twice.
//! Long-term memory is append-only and advisory, so the duplicates are kept.

use sdk::errors::{EngineErrorExt, Result};
use sdk::keys::{ACTION_PATTERN, THOUGHT_PATTERN};
use sdk::types::{
    summarize, Action, ActionStatus, ConsolidatedLearning, MemoryEntry, MemoryType, Thought,
    ThoughtType,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::importance::{
    ImportancePolicy, ReferenceImportancePolicy, ShortTermItem, CODE_CHANGE_TOOLS,
};
use super::retry::{retry, RetryPolicy};
use super::{get_json, LongTermStore, ShortTermStore};
use crate::config::ConsolidationConfig;

/// Tag carried by every promoted entry
pub const CONSOLIDATED_TAG: &str = "consolidated";
const TOPIC_PREFIX: &str = "topic:";

/// Cadence and thresholds for consolidation
#[derive(Debug, Clone)]
pub struct ConsolidationSettings {
    pub interval: Duration,
    pub promotion_threshold: f64,
    /// Long-term entries consulted for novelty
    pub novelty_window: usize,
    /// Long-term entries clustered by a batch learning pass
    pub learning_window: usize,
}

impl Default for ConsolidationSettings {
    fn default() -> Self {
        Self::from(&ConsolidationConfig::default())
    }
}

impl From<&ConsolidationConfig> for ConsolidationSettings {
    fn from(config: &ConsolidationConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_hours * 3600),
            promotion_threshold: config.promotion_importance_threshold,
            novelty_window: 50,
            learning_window: 200,
        }
    }
}

/// Outcome of one pass
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ConsolidationReport {
    pub scanned: usize,
    /// Keys listed but gone (or unreadable) by the time they were fetched
    pub skipped: usize,
    pub promoted: usize,
    pub learnings: usize,
}

/// Topic a memory clusters under
pub fn topic_of(entry: &MemoryEntry) -> String {
    entry
        .tags
        .iter()
        .find_map(|t| t.strip_prefix(TOPIC_PREFIX))
        .map(str::to_string)
        .unwrap_or_else(|| entry.memory_type.as_str().to_string())
}

fn thought_memory_type(thought: &Thought) -> MemoryType {
    match thought.thought_type {
        ThoughtType::Decision => MemoryType::Decision,
        ThoughtType::Reflection => MemoryType::Reflection,
        _ => MemoryType::Observation,
    }
}

fn action_memory_type(action: &Action) -> MemoryType {
    match action.status {
        ActionStatus::Failed => MemoryType::Error,
        ActionStatus::Completed if CODE_CHANGE_TOOLS.contains(&action.name.as_str()) => {
            MemoryType::CodeChange
        }
        ActionStatus::Completed => MemoryType::Success,
        ActionStatus::Pending | ActionStatus::Running => MemoryType::Observation,
    }
}

/// Build the long-term entry for a promoted item
pub fn promote(item: &ShortTermItem, importance: f64) -> MemoryEntry {
    let (memory_type, content, kind, topic, timestamp) = match item {
        ShortTermItem::Thought(t) => {
            let mut content = t.content.text();
            for call in &t.tool_calls {
                content.push_str(&format!(
                    "\n[{}] {}({}) -> {}",
                    if call.succeeded { "ok" } else { "failed" },
                    call.name,
                    call.arguments,
                    call.output.as_deref().unwrap_or("")
                ));
            }
            (
                thought_memory_type(t),
                content,
                "thought",
                t.thought_type.as_str().to_string(),
                t.timestamp,
            )
        }
        ShortTermItem::Action(a) => (
            action_memory_type(a),
            format!(
                "{}({})\nstatus: {}\noutput: {}",
                a.name,
                a.input,
                a.status,
                a.output.as_deref().unwrap_or("")
            ),
            "action",
            a.name.clone(),
            a.timestamp,
        ),
    };

    MemoryEntry::new(memory_type, content, item.summary(), importance)
        .with_timestamp(timestamp)
        .with_tag(CONSOLIDATED_TAG)
        .with_tag(memory_type.as_str())
        .with_tag(kind)
        .with_tag(format!("{}{}", TOPIC_PREFIX, topic))
        .with_source(item.key())
}

/// Cluster entries by topic; clusters of two or more become learnings
pub fn cluster_learnings(entries: &[MemoryEntry]) -> Vec<ConsolidatedLearning> {
    let mut clusters: BTreeMap<String, Vec<&MemoryEntry>> = BTreeMap::new();
    for entry in entries {
        clusters.entry(topic_of(entry)).or_default().push(entry);
    }

    clusters
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .map(|(topic, members)| {
            let confidence =
                members.iter().map(|m| m.importance).sum::<f64>() / members.len() as f64;
            let highlights: Vec<String> = members
                .iter()
                .take(3)
                .map(|m| summarize(&m.summary, 80))
                .collect();
            let summary = format!(
                "{} related memories about {}: {}",
                members.len(),
                topic,
                highlights.join("; ")
            );
            let sources = members.iter().map(|m| m.id.clone()).collect();
            ConsolidatedLearning::new(topic, summary, sources, confidence)
        })
        .collect()
}

/// Periodic promotion of short-term records
pub struct ConsolidationService {
    short_term: Arc<dyn ShortTermStore>,
    long_term: Arc<dyn LongTermStore>,
    policy: Box<dyn ImportancePolicy>,
    settings: ConsolidationSettings,
    retry: RetryPolicy,
}

impl ConsolidationService {
    pub fn new(
        short_term: Arc<dyn ShortTermStore>,
        long_term: Arc<dyn LongTermStore>,
        settings: ConsolidationSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            short_term,
            long_term,
            policy: Box::new(ReferenceImportancePolicy::default()),
            settings,
            retry,
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn ImportancePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Read every live thought and action record
    pub async fn scan_short_term(&self) -> Result<(Vec<ShortTermItem>, usize)> {
        let mut items = Vec::new();
        let mut skipped = 0;

        for pattern in [THOUGHT_PATTERN, ACTION_PATTERN] {
            let store = Arc::clone(&self.short_term);
            let keys = retry(&self.retry, "list short-term keys", || {
                let store = Arc::clone(&store);
                async move { store.keys(pattern).await }
            })
            .await?;

            for key in keys {
                let store = Arc::clone(&self.short_term);
                let fetched = retry(&self.retry, "read short-term record", || {
                    let store = Arc::clone(&store);
                    let key = key.clone();
                    async move {
                        if pattern == THOUGHT_PATTERN {
                            Ok(get_json::<Thought>(store.as_ref(), &key)
                                .await?
                                .map(ShortTermItem::Thought))
                        } else {
                            Ok(get_json::<Action>(store.as_ref(), &key)
                                .await?
                                .map(ShortTermItem::Action))
                        }
                    }
                })
                .await;

                match fetched {
                    Ok(Some(item)) => items.push(item),
                    Ok(None) => skipped += 1,
                    Err(e) if e.is_transient() => return Err(e),
                    Err(e) => {
                        warn!("Skipping unreadable short-term record {}: {}", key, e);
                        skipped += 1;
                    }
                }
            }
        }

        Ok((items, skipped))
    }

    /// One full promotion pass
    pub async fn run_once(&self) -> Result<ConsolidationReport> {
        let (items, skipped) = self.scan_short_term().await?;
        let mut report = ConsolidationReport {
            scanned: items.len(),
            skipped,
            ..Default::default()
        };

        if items.is_empty() {
            debug!("Consolidation: nothing in short-term memory");
            return Ok(report);
        }

        let long_term = Arc::clone(&self.long_term);
        let window = self.settings.novelty_window;
        let recent = retry(&self.retry, "load novelty window", || {
            let store = Arc::clone(&long_term);
            async move { store.recent_entries(window).await }
        })
        .await?;

        let mut promoted = Vec::new();
        for item in &items {
            let importance = self.policy.score(item, &recent);
            if importance < self.settings.promotion_threshold {
                continue;
            }

            let entry = promote(item, importance);
            self.append_entry(&entry).await?;
            debug!(
                "Promoted {} as {} (importance {:.2})",
                item.key(),
                entry.memory_type.as_str(),
                importance
            );
            promoted.push(entry);
        }
        report.promoted = promoted.len();

        report.learnings = self.store_learnings(cluster_learnings(&promoted)).await?;

        info!(
            "Consolidation pass ({} policy): scanned {}, promoted {}, learnings {}",
            self.policy.name(),
            report.scanned,
            report.promoted,
            report.learnings
        );
        Ok(report)
    }

    /// Cluster the recent long-term window into learnings without promoting
    pub async fn batch_learning(&self) -> Result<usize> {
        let long_term = Arc::clone(&self.long_term);
        let window = self.settings.learning_window;
        let entries = retry(&self.retry, "load learning window", || {
            let store = Arc::clone(&long_term);
            async move { store.recent_entries(window).await }
        })
        .await?;

        let eligible: Vec<MemoryEntry> = entries
            .into_iter()
            .filter(|e| e.importance >= self.settings.promotion_threshold)
            .collect();
        let created = self.store_learnings(cluster_learnings(&eligible)).await?;
        info!(
            "Batch learning: {} eligible memories, {} learnings",
            eligible.len(),
            created
        );
        Ok(created)
    }

    /// Run a pass every `interval` until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + self.settings.interval;
        let mut ticker = tokio::time::interval_at(start, self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            "Consolidation service started (every {:?})",
            self.settings.interval
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = self.run_once() => {
                            if let Err(e) = result {
                                error!("Consolidation pass failed: {}", e);
                            }
                        }
                    }
                }
            }
        }

        info!("Consolidation service stopped");
    }

    async fn append_entry(&self, entry: &MemoryEntry) -> Result<()> {
        let store = Arc::clone(&self.long_term);
        retry(&self.retry, "append memory", || {
            let store = Arc::clone(&store);
            async move { store.append(entry).await }
        })
        .await
    }

    async fn store_learnings(&self, learnings: Vec<ConsolidatedLearning>) -> Result<usize> {
        for learning in &learnings {
            let store = Arc::clone(&self.long_term);
            retry(&self.retry, "append learning", || {
                let store = Arc::clone(&store);
                async move { store.append_learning(learning).await }
            })
            .await?;
        }
        Ok(learnings.len())
    }
}
