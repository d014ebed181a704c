//! Prompt assembly
//!
//! Each iteration sends: a system message (role, response format, tools and
//! the rendered memory context), the rolling conversation window, and a user
//! message carrying the goal, any operator chat and the standing prompt.

use sdk::types::AgentState;

use crate::llm::Message;
use crate::tools::ToolRegistry;

const RESPONSE_FORMAT: &str = r#"Respond with a single JSON object:
{"type": "observation|planning|reasoning|decision|reflection", "reasoning": "your thinking", "actions": ["short description of each next step"], "tool_calls": [{"function": "tool_name", "arguments": {}}]}
Omit "tool_calls" when no tool is needed. Tool results arrive in the next iteration."#;

/// Everything the prompt is built from
pub struct PromptInput<'a> {
    pub state: &'a AgentState,
    pub memory_context: &'a str,
    pub tools: &'a ToolRegistry,
    pub history: &'a [Message],
    pub operator_messages: &'a [String],
}

pub fn system_prompt(tools: &ToolRegistry, memory_context: &str) -> String {
    [
        "You are Kestrel, an autonomous agent that works continuously toward its goals.",
        "Each response is one step. Think briefly, then act with tools when useful.",
        "",
        RESPONSE_FORMAT,
        "",
        tools.describe().as_str(),
        "",
        "## Memory Context",
        memory_context,
    ]
    .join("\n")
}

pub fn user_prompt(state: &AgentState, operator_messages: &[String]) -> String {
    let mut sections = Vec::new();

    sections.push(format!("Iteration {}.", state.iteration));

    match &state.current_goal {
        Some(goal) => sections.push(format!("Current goal: {}", goal)),
        None => sections.push("No goal is set. Choose something useful to do.".to_string()),
    }
    if state.goals.len() > 1 {
        let rest: Vec<String> = state.goals[1..].iter().map(|g| format!("- {}", g)).collect();
        sections.push(format!("Other goals:\n{}", rest.join("\n")));
    }

    if !operator_messages.is_empty() {
        let lines: Vec<String> = operator_messages
            .iter()
            .map(|m| format!("- {}", m))
            .collect();
        sections.push(format!("Operator messages:\n{}", lines.join("\n")));
    }

    if !state.current_prompt.trim().is_empty() {
        sections.push(state.current_prompt.clone());
    }

    sections.join("\n\n")
}

pub fn build_messages(input: &PromptInput<'_>) -> Vec<Message> {
    let mut messages = Vec::with_capacity(input.history.len() + 2);
    messages.push(Message::system(system_prompt(
        input.tools,
        input.memory_context,
    )));
    messages.extend(input.history.iter().cloned());
    messages.push(Message::user(user_prompt(
        input.state,
        input.operator_messages,
    )));
    messages
}
