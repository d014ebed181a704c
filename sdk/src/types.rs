//! Agent entity types
//!
//! These are the records the agent writes into short-term and long-term memory.
//! The reader process deserializes the same types, so any change here is a
//! change to the on-disk contract.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::EngineError;

/// Number of thoughts kept in the in-process quick view
pub const MAX_RECENT_THOUGHTS: usize = 20;

/// Number of actions kept in the in-process quick view
pub const MAX_RECENT_ACTIONS: usize = 15;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Scheduler status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Thinking,
    Acting,
    Paused,
    Throttled,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Thinking => "thinking",
            AgentStatus::Acting => "acting",
            AgentStatus::Paused => "paused",
            AgentStatus::Throttled => "throttled",
            AgentStatus::Error => "error",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of reasoning step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtType {
    Observation,
    Planning,
    Reasoning,
    Decision,
    Reflection,
}

impl ThoughtType {
    pub fn as_str(&self) -> &str {
        match self {
            ThoughtType::Observation => "observation",
            ThoughtType::Planning => "planning",
            ThoughtType::Reasoning => "reasoning",
            ThoughtType::Decision => "decision",
            ThoughtType::Reflection => "reflection",
        }
    }
}

impl FromStr for ThoughtType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "observation" => Ok(ThoughtType::Observation),
            "planning" | "plan" => Ok(ThoughtType::Planning),
            "reasoning" => Ok(ThoughtType::Reasoning),
            "decision" => Ok(ThoughtType::Decision),
            "reflection" => Ok(ThoughtType::Reflection),
            other => Err(EngineError::Serialization(format!(
                "unknown thought type '{}'",
                other
            ))),
        }
    }
}

/// Thought body, classified once when the thought is written
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThoughtContent {
    PlainText {
        text: String,
    },
    Structured {
        reasoning: String,
        #[serde(default)]
        actions: Vec<String>,
    },
}

/// JSON shape the model may answer with
#[derive(Deserialize)]
struct StructuredOutput {
    reasoning: String,
    #[serde(default)]
    actions: Vec<serde_json::Value>,
    #[serde(default, rename = "type")]
    thought_type: Option<String>,
}

impl ThoughtContent {
    /// Classify raw model output.
    ///
    /// A JSON object with a `reasoning` string becomes `Structured`; anything
    /// else is kept verbatim as `PlainText`. The optional `type` field of a
    /// structured body is returned alongside.
    pub fn classify(raw: &str) -> (Self, Option<ThoughtType>) {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            if let Ok(parsed) = serde_json::from_str::<StructuredOutput>(trimmed) {
                let actions = parsed
                    .actions
                    .into_iter()
                    .map(|a| match a {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect();
                let thought_type = parsed
                    .thought_type
                    .and_then(|t| ThoughtType::from_str(&t).ok());
                return (
                    ThoughtContent::Structured {
                        reasoning: parsed.reasoning,
                        actions,
                    },
                    thought_type,
                );
            }
        }
        (
            ThoughtContent::PlainText {
                text: raw.to_string(),
            },
            None,
        )
    }

    /// Full text of the thought
    pub fn text(&self) -> String {
        match self {
            ThoughtContent::PlainText { text } => text.clone(),
            ThoughtContent::Structured { reasoning, actions } => {
                if actions.is_empty() {
                    reasoning.clone()
                } else {
                    format!("{}\nPlanned actions: {}", reasoning, actions.join("; "))
                }
            }
        }
    }

    /// One-line summary, at most `max_chars` characters
    pub fn summary(&self, max_chars: usize) -> String {
        let base = match self {
            ThoughtContent::PlainText { text } => text.as_str(),
            ThoughtContent::Structured { reasoning, .. } => reasoning.as_str(),
        };
        summarize(base, max_chars)
    }
}

/// First line of `text`, cut to `max_chars` characters
pub fn summarize(text: &str, max_chars: usize) -> String {
    let first_line = text.trim().lines().next().unwrap_or_default();
    if first_line.chars().count() <= max_chars {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

/// Record of one tool call made during a thought or action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// One reasoning step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thought {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub content: ThoughtContent,
    #[serde(rename = "type")]
    pub thought_type: ThoughtType,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
}

impl Thought {
    pub fn new(thought_type: ThoughtType, content: ThoughtContent) -> Self {
        Self {
            id: new_id(),
            timestamp: Utc::now(),
            content,
            thought_type,
            tool_calls: Vec::new(),
        }
    }

    /// Plain text observation
    pub fn observation(text: impl Into<String>) -> Self {
        Self::new(
            ThoughtType::Observation,
            ThoughtContent::PlainText { text: text.into() },
        )
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRecord>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn has_failed_tool_call(&self) -> bool {
        self.tool_calls.iter().any(|tc| !tc.succeeded)
    }
}

/// Lifecycle of an action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Running => "running",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed)
    }

    /// Status never moves backwards.
    ///
    /// Terminal states may be rewritten to another terminal state, but never to
    /// `Pending` or `Running`; `Running` never returns to `Pending`.
    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        match (self, next) {
            (from, to) if from.is_terminal() => to.is_terminal(),
            (ActionStatus::Running, ActionStatus::Pending) => false,
            _ => true,
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tool invocation outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub input: String,
    #[serde(default)]
    pub output: Option<String>,
    pub status: ActionStatus,
    /// When `status` last changed; absent until the first update
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
}

impl Action {
    /// New action in `Pending` state
    pub fn pending(name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            timestamp: Utc::now(),
            name: name.into(),
            input: input.into(),
            output: None,
            status: ActionStatus::Pending,
            updated_at: None,
            tool_calls: Vec::new(),
        }
    }

    /// Time of the latest status this record carries
    pub fn status_time(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.timestamp)
    }
}

/// Category of a durable memory
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Observation,
    Learning,
    CodeChange,
    Decision,
    Reflection,
    Error,
    Success,
}

impl MemoryType {
    pub const ALL: [MemoryType; 7] = [
        MemoryType::Learning,
        MemoryType::Reflection,
        MemoryType::Success,
        MemoryType::Decision,
        MemoryType::CodeChange,
        MemoryType::Observation,
        MemoryType::Error,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            MemoryType::Observation => "observation",
            MemoryType::Learning => "learning",
            MemoryType::CodeChange => "code_change",
            MemoryType::Decision => "decision",
            MemoryType::Reflection => "reflection",
            MemoryType::Error => "error",
            MemoryType::Success => "success",
        }
    }

    /// Heading used when rendering memory context
    pub fn label(&self) -> &str {
        match self {
            MemoryType::Observation => "Observation",
            MemoryType::Learning => "Learning",
            MemoryType::CodeChange => "CodeChange",
            MemoryType::Decision => "Decision",
            MemoryType::Reflection => "Reflection",
            MemoryType::Error => "Error",
            MemoryType::Success => "Success",
        }
    }

    /// Render priority, lower first
    pub fn priority(&self) -> usize {
        Self::ALL
            .iter()
            .position(|t| t == self)
            .unwrap_or(Self::ALL.len())
    }
}

impl FromStr for MemoryType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observation" => Ok(MemoryType::Observation),
            "learning" => Ok(MemoryType::Learning),
            "code_change" => Ok(MemoryType::CodeChange),
            "decision" => Ok(MemoryType::Decision),
            "reflection" => Ok(MemoryType::Reflection),
            "error" => Ok(MemoryType::Error),
            "success" => Ok(MemoryType::Success),
            other => Err(EngineError::Serialization(format!(
                "unknown memory type '{}'",
                other
            ))),
        }
    }
}

/// A unit of durable memory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    pub summary: String,
    pub importance: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
    /// Short-term key this entry was promoted from, if any
    #[serde(default)]
    pub source_id: Option<String>,
}

impl MemoryEntry {
    /// Create an entry; importance is clamped to [0, 1]
    pub fn new(
        memory_type: MemoryType,
        content: impl Into<String>,
        summary: impl Into<String>,
        importance: f64,
    ) -> Self {
        Self {
            id: new_id(),
            timestamp: Utc::now(),
            memory_type,
            content: content.into(),
            summary: summary.into(),
            importance: clamp_unit(importance),
            tags: BTreeSet::new(),
            access_count: 0,
            last_accessed: None,
            source_id: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}

/// Derived insight spanning several memories
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsolidatedLearning {
    pub id: String,
    pub created: DateTime<Utc>,
    pub topic: String,
    pub summary: String,
    pub source_memory_ids: Vec<String>,
    pub confidence: f64,
}

impl ConsolidatedLearning {
    pub fn new(
        topic: impl Into<String>,
        summary: impl Into<String>,
        source_memory_ids: Vec<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: new_id(),
            created: Utc::now(),
            topic: topic.into(),
            summary: summary.into(),
            source_memory_ids,
            confidence: clamp_unit(confidence),
        }
    }
}

/// Per-day consumption counter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageRecord {
    pub date: NaiveDate,
    pub loop_count: u64,
    pub estimated_tokens: u64,
}

impl UsageRecord {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            loop_count: 0,
            estimated_tokens: 0,
        }
    }
}

/// Snapshot of the running agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentState {
    pub id: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub current_goal: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub current_prompt: String,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub iteration: u64,
    #[serde(default)]
    pub recent_thoughts: Vec<Thought>,
    #[serde(default)]
    pub recent_actions: Vec<Action>,
}

impl AgentState {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            status: AgentStatus::Idle,
            current_goal: None,
            goals: Vec::new(),
            current_prompt: prompt.into(),
            last_updated: Utc::now(),
            iteration: 0,
            recent_thoughts: Vec::new(),
            recent_actions: Vec::new(),
        }
    }

    /// Append to the bounded thought view, dropping the oldest
    pub fn push_thought(&mut self, thought: Thought) {
        self.recent_thoughts.push(thought);
        if self.recent_thoughts.len() > MAX_RECENT_THOUGHTS {
            let excess = self.recent_thoughts.len() - MAX_RECENT_THOUGHTS;
            self.recent_thoughts.drain(..excess);
        }
    }

    /// Append to the bounded action view, dropping the oldest
    pub fn push_action(&mut self, action: Action) {
        self.recent_actions.push(action);
        if self.recent_actions.len() > MAX_RECENT_ACTIONS {
            let excess = self.recent_actions.len() - MAX_RECENT_ACTIONS;
            self.recent_actions.drain(..excess);
        }
    }

    pub fn action_mut(&mut self, id: &str) -> Option<&mut Action> {
        self.recent_actions.iter_mut().find(|a| a.id == id)
    }

    /// Recompute `current_goal` from the goal list
    pub fn sync_current_goal(&mut self) {
        self.current_goal = self.goals.first().cloned();
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
