//! LLM collaborator
//!
//! The scheduler talks to the model through the [`LLMProvider`] trait. A
//! provider returns the raw completion text together with any tool calls
//! parsed out of it and, when the backend reports it, token usage.

use async_trait::async_trait;
use sdk::errors::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod ollama;

pub use ollama::OllamaProvider;

/// Characters per token when the provider does not report usage
pub const CHARS_PER_TOKEN: usize = 4;

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system, tool)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,

    /// Optional tool call ID for tool result messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Token counts for one completion
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Estimate usage at one token per [`CHARS_PER_TOKEN`] characters
    pub fn estimate(messages: &[Message], completion: &str) -> Self {
        let prompt_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        Self {
            prompt_tokens: (prompt_chars / CHARS_PER_TOKEN) as u64,
            completion_tokens: (completion.chars().count() / CHARS_PER_TOKEN) as u64,
        }
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LLMResponse {
    /// Raw completion text
    pub content: String,

    /// Tool calls requested by the model, in the order they appeared
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Usage reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl LLMResponse {
    /// Build a response from completion text, extracting tool calls
    pub fn from_content(content: impl Into<String>, usage: Option<TokenUsage>) -> Self {
        let content = content.into();
        let tool_calls = parse_tool_calls(&content);
        Self {
            content,
            tool_calls,
            usage,
        }
    }

    /// Tokens to charge against the daily budget
    pub fn tokens_used(&self, prompt: &[Message]) -> u64 {
        self.usage
            .unwrap_or_else(|| TokenUsage::estimate(prompt, &self.content))
            .total()
    }
}

/// Tool call request from the LLM
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,

    /// Name of the tool to call
    pub name: String,

    /// Arguments to pass to the tool (JSON string)
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    fn generated(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self::new(format!("call_{}", uuid::Uuid::new_v4()), name, arguments)
    }
}

/// Chat model the scheduler thinks with
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    /// Generate a completion for the conversation
    ///
    /// Transient failures (rate limits, server errors, timeouts) are reported
    /// as errors whose `is_transient()` is true so the caller may retry.
    async fn generate(&self, messages: &[Message]) -> Result<LLMResponse>;

    /// Check if the provider is currently reachable
    async fn check_health(&self) -> bool {
        true
    }
}

/// Parse every tool call out of completion text.
///
/// Handles several model output formats, using the first that yields calls:
/// 1. Raw JSON: `{"function": "...", "arguments": {...}}`, a list of those,
///    or `{"tool_calls": [...]}`
/// 2. Fenced JSON blocks (with or without trailing prose)
/// 3. `<tool_call>name({...})</tool_call>` markers, any number of them
/// 4. `{"function": ...}` objects embedded in prose
pub fn parse_tool_calls(content: &str) -> Vec<ToolCall> {
    let trimmed = content.trim();

    // Pattern 1: entire content is JSON
    let calls = calls_from_json(trimmed);
    if !calls.is_empty() {
        return calls;
    }

    // Pattern 2: fenced blocks
    let calls: Vec<ToolCall> = fenced_blocks(trimmed)
        .into_iter()
        .flat_map(|body| calls_from_json(body.trim()))
        .collect();
    if !calls.is_empty() {
        return calls;
    }

    // Pattern 3: <tool_call> markers
    let calls = marker_calls(trimmed);
    if !calls.is_empty() {
        return calls;
    }

    // Pattern 4: embedded objects
    let mut calls = Vec::new();
    let mut rest = trimmed;
    while let Some(pos) = rest.find("{\"function\"") {
        let candidate = &rest[pos..];
        match extract_balanced_json(candidate) {
            Some(json_str) => {
                calls.extend(calls_from_json(json_str));
                rest = &candidate[json_str.len()..];
            }
            None => break,
        }
    }
    calls
}

/// Tool calls in a JSON document, if it has one of the recognized shapes
fn calls_from_json(s: &str) -> Vec<ToolCall> {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(s) else {
        return Vec::new();
    };

    match &json {
        serde_json::Value::Array(items) => items.iter().filter_map(call_from_value).collect(),
        serde_json::Value::Object(map) => match map.get("tool_calls") {
            Some(serde_json::Value::Array(items)) => {
                items.iter().filter_map(call_from_value).collect()
            }
            _ => call_from_value(&json).into_iter().collect(),
        },
        _ => Vec::new(),
    }
}

/// `{"function": name, "arguments": {...}}`, or the OpenAI-style
/// `{"function": {"name": ..., "arguments": ...}}`
fn call_from_value(value: &serde_json::Value) -> Option<ToolCall> {
    let function = value.get("function")?;
    let (name, arguments) = match function {
        serde_json::Value::String(name) => (name.as_str(), value.get("arguments")?),
        serde_json::Value::Object(inner) => (
            inner.get("name")?.as_str()?,
            inner.get("arguments").or_else(|| value.get("arguments"))?,
        ),
        _ => return None,
    };

    let arguments = match arguments {
        serde_json::Value::String(raw) => raw.clone(),
        other => other.to_string(),
    };
    Some(ToolCall::generated(name, arguments))
}

/// Bodies of every markdown code fence in the text
fn fenced_blocks(content: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut offset = 0;

    while let Some(start_rel) = content[offset..].find("```") {
        let fence_start = offset + start_rel;
        let after_opening = fence_start + 3;

        // Skip the language tag line (e.g. "json\n")
        let Some(newline) = content[after_opening..].find('\n') else {
            break;
        };
        let body_start = after_opening + newline + 1;

        let Some(closing) = content[body_start..].find("```") else {
            break;
        };
        let body_end = body_start + closing;

        if body_start < body_end {
            blocks.push(&content[body_start..body_end]);
        }
        offset = body_end + 3;
    }
    blocks
}

fn marker_calls(content: &str) -> Vec<ToolCall> {
    const OPEN: &str = "<tool_call>";
    const CLOSE: &str = "</tool_call>";

    let mut calls = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find(OPEN) {
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find(CLOSE) else {
            break;
        };
        let inner = after[..end].trim();

        if inner.starts_with('{') {
            calls.extend(calls_from_json(inner));
        } else if let Some(paren_pos) = inner.find('(') {
            let tool_name = inner[..paren_pos].trim();
            let args_end = inner.rfind(')').unwrap_or(inner.len());
            if !tool_name.is_empty() && args_end > paren_pos {
                calls.push(ToolCall::generated(
                    tool_name,
                    inner[paren_pos + 1..args_end].trim(),
                ));
            }
        }

        rest = &after[end + CLOSE.len()..];
    }
    calls
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.tool_call_id, None);

        let tool_msg = Message::tool_result("result", "call_123");
        assert_eq!(tool_msg.role, MessageRole::Tool);
        assert_eq!(tool_msg.tool_call_id, Some("call_123".to_string()));
    }

    #[test]
    fn test_parse_raw_json() {
        let calls = parse_tool_calls(r#"{"function": "read_file", "arguments": {"path": "a.txt"}}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments, r#"{"path":"a.txt"}"#);
    }

    #[test]
    fn test_parse_tool_calls_array() {
        let content = r#"{"tool_calls": [
            {"function": "read_file", "arguments": {"path": "a"}},
            {"function": {"name": "list_dir", "arguments": "{\"path\": \".\"}"}}
        ]}"#;
        let calls = parse_tool_calls(content);
        let names: Vec<_> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["read_file", "list_dir"]);
        assert_eq!(calls[1].arguments, r#"{"path": "."}"#);
    }

    #[test]
    fn test_parse_fenced_json_with_trailing_prose() {
        let content = "Let me look.\n```json\n{\"function\": \"list_dir\", \"arguments\": {}}\n```\nThen decide.";
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "list_dir");
    }

    #[test]
    fn test_parse_multiple_markers() {
        let content = r#"<tool_call>read_file({"path": "a"})</tool_call>
            and <tool_call>read_file({"path": "b"})</tool_call>"#;
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 2);
        assert!(calls[1].arguments.contains("\"b\""));
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn test_parse_embedded_json() {
        let content = r#"I will read it: {"function": "read_file", "arguments": {"path": "x}"}} now"#;
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].arguments.contains("x}"));
    }

    #[test]
    fn test_structured_thought_is_not_a_tool_call() {
        let content = r#"{"type": "planning", "reasoning": "next", "actions": ["read"]}"#;
        assert!(parse_tool_calls(content).is_empty());
        assert!(parse_tool_calls("just prose").is_empty());
    }

    #[test]
    fn test_tokens_used_falls_back_to_estimate() {
        let prompt = vec![Message::system("x".repeat(400))];
        let response = LLMResponse::from_content("y".repeat(40), None);
        assert_eq!(response.tokens_used(&prompt), 110);

        let reported = LLMResponse::from_content(
            "y",
            Some(TokenUsage {
                prompt_tokens: 7,
                completion_tokens: 3,
            }),
        );
        assert_eq!(reported.tokens_used(&prompt), 10);
    }
}
