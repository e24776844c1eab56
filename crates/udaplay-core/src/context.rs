//! Working Context
//!
//! The message sequence handed to the language model on every `Deciding`
//! step: system prompt, recalled memory, the user's question, and the
//! decisions/observations accumulated during the turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{MemoryRecord, RecalledMemory};

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result (injected as context)
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A single message in the working context
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    pub content: String,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Tool call this message answers (tool messages only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Estimate token count (rough approximation)
    pub fn estimate_tokens(&self) -> u32 {
        // ~4 characters per token, +4 for role overhead
        u32::try_from(self.content.len() / 4).unwrap_or(u32::MAX).saturating_add(4)
    }
}

/// Default context budget in estimated tokens
pub const DEFAULT_MAX_CONTEXT_TOKENS: u32 = 8192;

/// Message sequence for one turn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkingContext {
    messages: Vec<Message>,

    max_context_tokens: u32,
}

impl Default for WorkingContext {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
        }
    }
}

impl WorkingContext {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let mut ctx = Self::default();
        ctx.push(Message::system(system_prompt));
        ctx
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_context_tokens: u32) -> Self {
        self.max_context_tokens = max_context_tokens;
        self
    }

    /// Inject recalled memory as a system block.
    ///
    /// Short-term records are the session's recent exchanges (oldest first);
    /// long-term records are prior facts ordered by similarity.
    pub fn push_memory(&mut self, short_term: &[MemoryRecord], long_term: &[RecalledMemory]) {
        if short_term.is_empty() && long_term.is_empty() {
            return;
        }

        let mut block = String::new();
        if !short_term.is_empty() {
            block.push_str("## Earlier in this conversation\n");
            for record in short_term {
                block.push_str("- ");
                block.push_str(&record.content);
                block.push('\n');
            }
        }
        if !long_term.is_empty() {
            if !block.is_empty() {
                block.push('\n');
            }
            block.push_str("## Remembered from previous sessions\n");
            for recalled in long_term {
                block.push_str(&format!(
                    "- ({:.2}) {}\n",
                    recalled.similarity, recalled.record.content
                ));
            }
        }

        self.push(Message::system(block.trim_end()));
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The user question (first user message)
    pub fn question(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    pub fn estimate_tokens(&self) -> u32 {
        self.messages.iter().map(Message::estimate_tokens).sum()
    }

    /// Drop the oldest observations until the context fits.
    ///
    /// System messages, the question and the most recent message are kept.
    pub fn truncate_to_fit(&mut self) {
        while self.estimate_tokens() > self.max_context_tokens {
            let question_idx = self.messages.iter().position(|m| m.role == Role::User);
            let last_idx = self.messages.len().saturating_sub(1);
            let removable = self.messages.iter().enumerate().position(|(i, m)| {
                m.role != Role::System && Some(i) != question_idx && i != last_idx
            });
            match removable {
                Some(pos) => {
                    self.messages.remove(pos);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
