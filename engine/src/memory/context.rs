//! Memory context for prompts
//!
//! Loads a candidate pool from long-term memory, ranks it by
//! `0.7 * importance + 0.3 * recency`, keeps a bounded active set with a
//! per-type cap, and renders it as grouped markdown for the LLM prompt.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sdk::errors::Result;
use sdk::types::{summarize, ConsolidatedLearning, MemoryEntry, MemoryType};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::retry::{retry, RetryPolicy};
use super::LongTermStore;
use crate::config::MemoryConfig;

/// Rendered when long-term memory holds nothing yet
pub const NO_MEMORY_CONTEXT: &str =
    "No previous memories available. This is a fresh start with no prior experience to draw on.";

const IMPORTANCE_WEIGHT: f64 = 0.7;
const RECENCY_WEIGHT: f64 = 0.3;
const DETAILS_CHARS: usize = 200;

/// Ranking and refresh settings
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub context_size: usize,
    pub per_type_limit: usize,
    pub refresh_iterations: u64,
    pub refresh_interval: ChronoDuration,
    pub candidate_pool: usize,
    pub recency_horizon_hours: f64,
    pub high_importance_threshold: f64,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self::from(&MemoryConfig::default())
    }
}

impl From<&MemoryConfig> for ContextSettings {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            context_size: config.context_size,
            per_type_limit: config.per_type_limit,
            refresh_iterations: config.refresh_iterations,
            refresh_interval: ChronoDuration::hours(config.refresh_hours as i64),
            candidate_pool: config.candidate_pool,
            recency_horizon_hours: config.recency_horizon_hours,
            high_importance_threshold: config.high_importance_threshold,
        }
    }
}

/// A memory with its ranking score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub entry: MemoryEntry,
    pub score: f64,
}

/// Exponential decay in [0, 1]; 1 for entries at or after `now`
pub fn recency_factor(timestamp: DateTime<Utc>, now: DateTime<Utc>, horizon_hours: f64) -> f64 {
    let age_hours = (now - timestamp).num_milliseconds().max(0) as f64 / 3_600_000.0;
    (-age_hours / horizon_hours).exp()
}

pub fn score(entry: &MemoryEntry, now: DateTime<Utc>, horizon_hours: f64) -> f64 {
    IMPORTANCE_WEIGHT * entry.importance
        + RECENCY_WEIGHT * recency_factor(entry.timestamp, now, horizon_hours)
}

fn by_rank(a: &ScoredMemory, b: &ScoredMemory) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.entry.timestamp.cmp(&a.entry.timestamp))
        .then_with(|| a.entry.id.cmp(&b.entry.id))
}

/// Score every candidate and keep the top `context_size`
pub fn select_active(
    candidates: Vec<MemoryEntry>,
    now: DateTime<Utc>,
    settings: &ContextSettings,
) -> Vec<ScoredMemory> {
    let mut scored: Vec<ScoredMemory> = candidates
        .into_iter()
        .map(|entry| ScoredMemory {
            score: score(&entry, now, settings.recency_horizon_hours),
            entry,
        })
        .collect();
    scored.sort_by(by_rank);
    scored.truncate(settings.context_size);
    scored
}

/// Group the active set by type in render order, capping each group
pub fn group_by_type(
    active: &[ScoredMemory],
    per_type_limit: usize,
) -> Vec<(MemoryType, Vec<ScoredMemory>)> {
    let mut groups: Vec<(MemoryType, Vec<ScoredMemory>)> = MemoryType::ALL
        .iter()
        .map(|memory_type| {
            let mut members: Vec<ScoredMemory> = active
                .iter()
                .filter(|m| m.entry.memory_type == *memory_type)
                .cloned()
                .collect();
            members.sort_by(by_rank);
            members.truncate(per_type_limit);
            (*memory_type, members)
        })
        .filter(|(_, members)| !members.is_empty())
        .collect();

    groups.sort_by(|(ta, ma), (tb, mb)| {
        ta.priority()
            .cmp(&tb.priority())
            .then_with(|| by_rank(&ma[0], &mb[0]))
    });
    groups
}

/// `<N>h ago` under a day, `<N>d ago` otherwise
pub fn format_age(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let hours = (now - timestamp).num_hours().max(0);
    if hours < 24 {
        format!("{}h ago", hours)
    } else {
        format!("{}d ago", hours / 24)
    }
}

/// First 200 characters, with an ellipsis only when something was cut
pub fn details_excerpt(content: &str) -> String {
    if content.chars().count() <= DETAILS_CHARS {
        content.to_string()
    } else {
        let cut: String = content.chars().take(DETAILS_CHARS).collect();
        format!("{}...", cut)
    }
}

/// Render grouped memories as prompt text
pub fn render(
    groups: &[(MemoryType, Vec<ScoredMemory>)],
    now: DateTime<Utc>,
    high_importance_threshold: f64,
) -> String {
    if groups.is_empty() {
        return NO_MEMORY_CONTEXT.to_string();
    }

    let mut sections = Vec::with_capacity(groups.len());
    for (memory_type, members) in groups {
        let mut lines = vec![format!(
            "### {} ({} entries):",
            memory_type.label(),
            members.len()
        )];
        for member in members {
            let entry = &member.entry;
            lines.push(format!(
                "- {} ({}, importance: {:.2})",
                entry.summary,
                format_age(entry.timestamp, now),
                entry.importance
            ));
            if entry.importance >= high_importance_threshold
                && !entry.content.is_empty()
                && entry.content != entry.summary
            {
                lines.push(format!("  Details: {}", details_excerpt(&entry.content)));
            }
        }
        sections.push(lines.join("\n"));
    }
    sections.join("\n\n")
}

/// Present a derived learning as a rankable candidate
fn learning_candidate(learning: &ConsolidatedLearning) -> MemoryEntry {
    let mut entry = MemoryEntry::new(
        MemoryType::Learning,
        learning.summary.clone(),
        format!("{}: {}", learning.topic, summarize(&learning.summary, 120)),
        learning.confidence,
    )
    .with_timestamp(learning.created)
    .with_tag("learning");
    entry.id = learning.id.clone();
    entry
}

struct Ranked {
    active: Vec<ScoredMemory>,
    learning_ids: HashSet<String>,
    candidate_count: usize,
}

/// Keeps the rendered memory context current for the scheduler
pub struct MemoryContextBuilder {
    store: Arc<dyn LongTermStore>,
    settings: ContextSettings,
    retry: RetryPolicy,
    active: Vec<ScoredMemory>,
    rendered: String,
    loaded_at: Option<DateTime<Utc>>,
    loaded_iteration: u64,
    force_reload: bool,
}

impl MemoryContextBuilder {
    pub fn new(store: Arc<dyn LongTermStore>, settings: ContextSettings, retry: RetryPolicy) -> Self {
        Self {
            store,
            settings,
            retry,
            active: Vec::new(),
            rendered: NO_MEMORY_CONTEXT.to_string(),
            loaded_at: None,
            loaded_iteration: 0,
            force_reload: false,
        }
    }

    /// Fetch candidates, rank them and re-render
    pub async fn load(&mut self, iteration: u64, now: DateTime<Utc>) -> Result<()> {
        let ranked = self.rank(now).await?;
        let groups = group_by_type(&ranked.active, self.settings.per_type_limit);
        self.rendered = render(&groups, now, self.settings.high_importance_threshold);
        self.loaded_at = Some(now);
        self.loaded_iteration = iteration;
        self.force_reload = false;

        info!(
            "Memory context loaded: {} candidates, {} active, {} groups",
            ranked.candidate_count,
            ranked.active.len(),
            groups.len()
        );

        let touched: Vec<String> = ranked
            .active
            .iter()
            .map(|m| m.entry.id.clone())
            .filter(|id| !ranked.learning_ids.contains(id))
            .collect();
        if let Err(e) = self.store.touch(&touched, now).await {
            warn!("Failed to record memory access: {}", e);
        }
        self.active = ranked.active;

        Ok(())
    }

    /// Rank and render as [`load`](Self::load) would, without recording
    /// access or replacing the cached context
    pub async fn preview(&self, now: DateTime<Utc>) -> Result<(Vec<ScoredMemory>, String)> {
        let ranked = self.rank(now).await?;
        let groups = group_by_type(&ranked.active, self.settings.per_type_limit);
        let rendered = render(&groups, now, self.settings.high_importance_threshold);
        Ok((ranked.active, rendered))
    }

    async fn rank(&self, now: DateTime<Utc>) -> Result<Ranked> {
        let pool = self.settings.candidate_pool;
        let store = Arc::clone(&self.store);
        let entries = retry(&self.retry, "load memory candidates", || {
            let store = Arc::clone(&store);
            async move { store.recent_entries(pool).await }
        })
        .await?;
        let learnings = retry(&self.retry, "load learnings", || {
            let store = Arc::clone(&store);
            async move { store.learnings().await }
        })
        .await?;

        let learning_ids: HashSet<String> = learnings.iter().map(|l| l.id.clone()).collect();
        let mut candidates = entries;
        candidates.extend(learnings.iter().map(learning_candidate));
        let candidate_count = candidates.len();

        Ok(Ranked {
            active: select_active(candidates, now, &self.settings),
            learning_ids,
            candidate_count,
        })
    }

    /// Whether the next call to [`refresh_if_due`](Self::refresh_if_due) reloads
    pub fn is_due(&self, iteration: u64, now: DateTime<Utc>) -> bool {
        match self.loaded_at {
            None => true,
            Some(_) if self.force_reload => true,
            Some(loaded_at) => {
                iteration.saturating_sub(self.loaded_iteration) >= self.settings.refresh_iterations
                    || now - loaded_at >= self.settings.refresh_interval
            }
        }
    }

    /// Reload when due; returns whether a reload happened
    pub async fn refresh_if_due(&mut self, iteration: u64, now: DateTime<Utc>) -> Result<bool> {
        if !self.is_due(iteration, now) {
            return Ok(false);
        }
        debug!("Refreshing memory context at iteration {}", iteration);
        self.load(iteration, now).await?;
        Ok(true)
    }

    /// Drop the cached view so the next refresh reloads
    pub fn invalidate(&mut self) {
        self.force_reload = true;
    }

    pub fn current_context(&self) -> &str {
        &self.rendered
    }

    pub fn active_set(&self) -> &[ScoredMemory] {
        &self.active
    }
}
