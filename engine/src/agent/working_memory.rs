//! Rolling conversation window
//!
//! Carries the agent's own recent exchanges (its replies, tool results and
//! operator chat) from one iteration to the next. The system prompt is
//! rebuilt every iteration and is not stored here. When the estimated size
//! passes the token limit the oldest messages are dropped, keeping at least
//! the latest exchange.

use crate::llm::{Message, CHARS_PER_TOKEN};

/// Default context limit in tokens
pub const DEFAULT_CONTEXT_LIMIT: usize = 8000;

/// Per-message allowance for role and framing
const MESSAGE_OVERHEAD_TOKENS: usize = 10;

/// Messages always kept regardless of size
const MIN_RETAINED: usize = 2;

#[derive(Debug, Clone)]
pub struct WorkingMemory {
    messages: Vec<Message>,
    context_limit: usize,
    token_count: usize,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_CONTEXT_LIMIT)
    }

    pub fn with_limit(context_limit: usize) -> Self {
        Self {
            messages: Vec::new(),
            context_limit,
            token_count: 0,
        }
    }

    /// Append a message, trimming the oldest ones past the limit
    pub fn add_message(&mut self, message: Message) {
        self.token_count += Self::estimate_tokens(&message);
        self.messages.push(message);

        while self.token_count > self.context_limit && self.messages.len() > MIN_RETAINED {
            let removed = self.messages.remove(0);
            self.token_count = self
                .token_count
                .saturating_sub(Self::estimate_tokens(&removed));
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn context_limit(&self) -> usize {
        self.context_limit
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.token_count = 0;
    }

    fn estimate_tokens(message: &Message) -> usize {
        let chars = message.content.len()
            + message.tool_call_id.as_ref().map(|id| id.len()).unwrap_or(0);
        chars.div_ceil(CHARS_PER_TOKEN) + MESSAGE_OVERHEAD_TOKENS
    }
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageRole;

    #[test]
    fn test_estimate_tokens() {
        // 12 chars -> 3 tokens + overhead
        let msg = Message::user("Hello world!");
        assert_eq!(WorkingMemory::estimate_tokens(&msg), 13);

        let tool = Message::tool_result("abcd", "call");
        assert_eq!(WorkingMemory::estimate_tokens(&tool), 12);
    }

    #[test]
    fn test_trimming_drops_oldest() {
        let mut memory = WorkingMemory::with_limit(100);
        for i in 0..10 {
            memory.add_message(Message::user(format!("{}{}", i, "x".repeat(99))));
        }

        assert!(memory.token_count() <= 100 || memory.messages().len() == MIN_RETAINED);
        let last = memory.messages().last().unwrap();
        assert!(last.content.starts_with('9'));
        assert!(!memory.messages().iter().any(|m| m.content.starts_with('0')));
    }

    #[test]
    fn test_latest_exchange_survives_oversize() {
        let mut memory = WorkingMemory::with_limit(10);
        memory.add_message(Message::assistant("a".repeat(400)));
        memory.add_message(Message::tool_result("b".repeat(400), "call_1"));

        assert_eq!(memory.messages().len(), 2);
        assert_eq!(memory.messages()[0].role, MessageRole::Assistant);
    }

    #[test]
    fn test_clear() {
        let mut memory = WorkingMemory::new();
        memory.add_message(Message::user("hi"));
        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.token_count(), 0);
        assert_eq!(memory.context_limit(), DEFAULT_CONTEXT_LIMIT);
    }
}
