//! Kestrel SDK
//!
//! Shared contract between the agent process and anything that reads its
//! state: entity types, the short-term key namespace, steering commands and
//! the error taxonomy.

/// Steering command types
pub mod commands;

/// Error types and handling
pub mod errors;

/// Short-term key namespace
pub mod keys;

/// Agent entity types
pub mod types;

// Re-export commonly used types
pub use commands::SteeringCommand;
pub use errors::{EngineError, EngineErrorExt};
pub use types::{
    Action, ActionStatus, AgentState, AgentStatus, ConsolidatedLearning, MemoryEntry, MemoryType,
    Thought, ThoughtContent, ThoughtType, ToolCallRecord, UsageRecord,
};
