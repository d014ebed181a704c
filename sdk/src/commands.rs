//! Steering commands
//!
//! Commands are produced by an operator (CLI, dashboard) and consumed by the
//! scheduler, which drains one batch per iteration.

use serde::{Deserialize, Serialize};

/// Operator command for the running agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SteeringCommand {
    UpdatePrompt(String),
    PauseAgent,
    ResumeAgent,
    TriggerBatchLearning,
    TriggerMemoryConsolidation,
    ApproveCodeChange(String),
    RejectCodeChange(String),
    AddGoal(String),
    RemoveGoal(String),
    QueryState,
    ResetMemory,
    ChatWithAgent(String),
}

impl SteeringCommand {
    /// Stable name used in logs and the queue table
    pub fn name(&self) -> &str {
        match self {
            SteeringCommand::UpdatePrompt(_) => "update_prompt",
            SteeringCommand::PauseAgent => "pause_agent",
            SteeringCommand::ResumeAgent => "resume_agent",
            SteeringCommand::TriggerBatchLearning => "trigger_batch_learning",
            SteeringCommand::TriggerMemoryConsolidation => "trigger_memory_consolidation",
            SteeringCommand::ApproveCodeChange(_) => "approve_code_change",
            SteeringCommand::RejectCodeChange(_) => "reject_code_change",
            SteeringCommand::AddGoal(_) => "add_goal",
            SteeringCommand::RemoveGoal(_) => "remove_goal",
            SteeringCommand::QueryState => "query_state",
            SteeringCommand::ResetMemory => "reset_memory",
            SteeringCommand::ChatWithAgent(_) => "chat_with_agent",
        }
    }
}
