//! Importance scoring for consolidation
//!
//! The promotion threshold is fixed by configuration; how an item earns its
//! score is a policy. [`ReferenceImportancePolicy`] is the default.

use sdk::types::{Action, ActionStatus, MemoryEntry, Thought, ThoughtType};
use std::collections::HashSet;

/// Tools whose successful runs count as code changes
pub const CODE_CHANGE_TOOLS: &[&str] = &["write_file"];

/// A short-term record visible to consolidation
#[derive(Debug, Clone)]
pub enum ShortTermItem {
    Thought(Thought),
    Action(Action),
}

impl ShortTermItem {
    /// Short-term key the item was read from
    pub fn key(&self) -> String {
        match self {
            ShortTermItem::Thought(t) => sdk::keys::thought_key(&t.id),
            ShortTermItem::Action(a) => sdk::keys::action_key(&a.id),
        }
    }

    /// One-line description used for novelty checks and summaries
    pub fn summary(&self) -> String {
        match self {
            ShortTermItem::Thought(t) => t.content.summary(160),
            ShortTermItem::Action(a) => {
                let detail = a
                    .output
                    .as_deref()
                    .map(|o| sdk::types::summarize(o, 120))
                    .unwrap_or_default();
                if detail.is_empty() {
                    format!("{} {}", a.name, a.status)
                } else {
                    format!("{} {}: {}", a.name, a.status, detail)
                }
            }
        }
    }
}

/// Scores a short-term item in [0, 1]
pub trait ImportancePolicy: Send + Sync {
    fn name(&self) -> &str;

    /// `recent` holds the newest long-term entries, for novelty checks
    fn score(&self, item: &ShortTermItem, recent: &[MemoryEntry]) -> f64;
}

/// Default heuristic
///
/// Starts from a low base and adds boosts for decision/reflection thoughts,
/// failed tool calls, terminal action outcomes and novelty relative to the
/// newest long-term entries. Plain observations stay below the default
/// promotion threshold unless something about them stands out.
#[derive(Debug, Clone)]
pub struct ReferenceImportancePolicy {
    pub base: f64,
    pub decision_boost: f64,
    pub planning_boost: f64,
    pub reasoning_boost: f64,
    pub failure_boost: f64,
    pub tool_failure_boost: f64,
    pub success_boost: f64,
    pub code_change_boost: f64,
    pub novelty_boost: f64,
    /// Word-set Jaccard similarity at or above which an item is not novel
    pub similarity_cutoff: f64,
}

impl Default for ReferenceImportancePolicy {
    fn default() -> Self {
        Self {
            base: 0.2,
            decision_boost: 0.35,
            planning_boost: 0.2,
            reasoning_boost: 0.1,
            failure_boost: 0.45,
            tool_failure_boost: 0.3,
            success_boost: 0.2,
            code_change_boost: 0.15,
            novelty_boost: 0.15,
            similarity_cutoff: 0.6,
        }
    }
}

impl ReferenceImportancePolicy {
    fn thought_score(&self, thought: &Thought) -> f64 {
        let mut score = self.base;
        score += match thought.thought_type {
            ThoughtType::Decision | ThoughtType::Reflection => self.decision_boost,
            ThoughtType::Planning => self.planning_boost,
            ThoughtType::Reasoning => self.reasoning_boost,
            ThoughtType::Observation => 0.0,
        };
        if thought.has_failed_tool_call() {
            score += self.tool_failure_boost;
        }
        score
    }

    fn action_score(&self, action: &Action) -> f64 {
        let mut score = self.base;
        match action.status {
            ActionStatus::Failed => score += self.failure_boost,
            ActionStatus::Completed => {
                score += self.success_boost;
                if CODE_CHANGE_TOOLS.contains(&action.name.as_str()) {
                    score += self.code_change_boost;
                }
            }
            ActionStatus::Pending | ActionStatus::Running => {}
        }
        if action.tool_calls.iter().any(|c| !c.succeeded) {
            score += self.tool_failure_boost;
        }
        score
    }

    /// Earlier promotions of the same item are not compared against
    fn is_novel(&self, item: &ShortTermItem, recent: &[MemoryEntry]) -> bool {
        let key = item.key();
        let words = word_set(&item.summary());
        !recent
            .iter()
            .filter(|entry| entry.source_id.as_deref() != Some(key.as_str()))
            .any(|entry| jaccard(&words, &word_set(&entry.summary)) >= self.similarity_cutoff)
    }
}

impl ImportancePolicy for ReferenceImportancePolicy {
    fn name(&self) -> &str {
        "reference"
    }

    fn score(&self, item: &ShortTermItem, recent: &[MemoryEntry]) -> f64 {
        let mut score = match item {
            ShortTermItem::Thought(t) => self.thought_score(t),
            ShortTermItem::Action(a) => self.action_score(a),
        };
        if self.is_novel(item, recent) {
            score += self.novelty_boost;
        }
        score.clamp(0.0, 1.0)
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::{MemoryType, ThoughtContent, ToolCallRecord};

    fn thought(thought_type: ThoughtType, text: &str) -> ShortTermItem {
        ShortTermItem::Thought(Thought::new(
            thought_type,
            ThoughtContent::PlainText {
                text: text.to_string(),
            },
        ))
    }

    fn action(name: &str, status: ActionStatus) -> ShortTermItem {
        let mut action = Action::pending(name, "{}");
        action.status = status;
        ShortTermItem::Action(action)
    }

    #[test]
    fn test_decisions_outrank_observations() {
        let policy = ReferenceImportancePolicy::default();
        let decision = policy.score(&thought(ThoughtType::Decision, "ship the parser"), &[]);
        let observation = policy.score(&thought(ThoughtType::Observation, "the sky"), &[]);

        assert!(decision >= 0.5);
        assert!(observation < 0.5);
    }

    #[test]
    fn test_failures_are_promoted() {
        let policy = ReferenceImportancePolicy::default();
        let recent = vec![MemoryEntry::new(
            MemoryType::Error,
            "",
            "read_file failed",
            0.6,
        )];
        // Not novel, still above threshold
        let score = policy.score(&action("read_file", ActionStatus::Failed), &recent);
        assert!(score >= 0.5);
    }

    #[test]
    fn test_failed_tool_call_boosts_thought() {
        let policy = ReferenceImportancePolicy::default();
        let plain = Thought::observation("looked around");
        let failed = plain.clone().with_tool_calls(vec![ToolCallRecord {
            id: "c1".into(),
            name: "list_dir".into(),
            arguments: "{}".into(),
            succeeded: false,
            output: Some("no such dir".into()),
        }]);

        let a = policy.score(&ShortTermItem::Thought(plain), &[]);
        let b = policy.score(&ShortTermItem::Thought(failed), &[]);
        assert!(b > a);
    }

    #[test]
    fn test_novelty_boost() {
        let policy = ReferenceImportancePolicy::default();
        let item = thought(ThoughtType::Reasoning, "compare the two parsers");
        let seen = vec![MemoryEntry::new(
            MemoryType::Observation,
            "",
            "compare the two parsers",
            0.5,
        )];

        let novel = policy.score(&item, &[]);
        let repeated = policy.score(&item, &seen);
        assert!((novel - repeated - policy.novelty_boost).abs() < 1e-9);
    }

    #[test]
    fn test_own_promotion_keeps_novelty() {
        let policy = ReferenceImportancePolicy::default();
        let item = action("read_file", ActionStatus::Completed);
        let first = policy.score(&item, &[]);

        let earlier = MemoryEntry::new(MemoryType::Success, "", item.summary(), first)
            .with_source(item.key());
        assert!((policy.score(&item, &[earlier]) - first).abs() < 1e-9);
        assert!(first >= 0.5);
    }

    #[test]
    fn test_jaccard() {
        let a = word_set("Read the FILE");
        let b = word_set("read file");
        assert!((jaccard(&a, &b) - 2.0 / 3.0).abs() < 1e-9);
    }
}
