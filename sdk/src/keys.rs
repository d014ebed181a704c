//! Short-term key namespace
//!
//! The agent is the only writer of these keys; the reader process polls them.

/// Current agent state snapshot
pub const CURRENT_STATE_KEY: &str = "agent:current-state";

/// Glob matching every thought record
pub const THOUGHT_PATTERN: &str = "thought:*";

/// Glob matching every action record
pub const ACTION_PATTERN: &str = "action:*";

pub fn thought_key(id: &str) -> String {
    format!("thought:{}", id)
}

pub fn action_key(id: &str) -> String {
    format!("action:{}", id)
}
