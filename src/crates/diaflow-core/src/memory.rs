//! Per-person conversational memory with scoped retention policies
//!
//! LLM nodes speak as a **person**; every person carries an ordered
//! message log for the lifetime of the execution. Before building the
//! message array for an invocation, the engine applies the node's
//! configured retention rule:
//!
//! | rule | effect |
//! |------|--------|
//! | `no_forget` | keep the full history |
//! | `on_every_turn` | clear the person's history before each invocation |
//! | `forget_own` | drop messages the person itself sent within the current execution |
//!
//! # Concurrency
//!
//! Memory is partitioned by person id; writes to a partition are
//! serialized under a single `parking_lot::Mutex`. Reads return owned
//! copies so no lock is held across handler awaits.
//!
//! # Examples
//!
//! ```rust
//! use diaflow_core::memory::{ConversationMemory, Message, MessageRole};
//!
//! let memory = ConversationMemory::new();
//! memory.append("alice", Message::user("hello"));
//! memory.append("alice", Message::assistant("hi!").with_sender("alice"));
//!
//! let summary = memory.summary("alice");
//! assert_eq!(summary.message_count, 2);
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One entry of a person's message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Node that produced the message, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Execution the message belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    /// Person that authored the message (for `forget_own` scoping)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Token count, when the provider reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            node_id: None,
            execution_id: None,
            sender: None,
            token_count: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_execution(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_token_count(mut self, tokens: u32) -> Self {
        self.token_count = Some(tokens);
        self
    }
}

/// Cheap history statistics for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub message_count: usize,
    /// Reported token counts where present, otherwise a chars/4 estimate
    pub approx_token_count: u64,
}

/// Per-execution, per-person message log.
#[derive(Debug)]
pub struct ConversationMemory {
    partitions: Mutex<HashMap<String, Vec<Message>>>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self {
            partitions: Mutex::new(HashMap::new()),
        }
    }

    /// Append a message to a person's log.
    pub fn append(&self, person_id: &str, message: Message) {
        self.partitions
            .lock()
            .entry(person_id.to_string())
            .or_default()
            .push(message);
    }

    /// Owned copy of a person's history, in insertion order.
    pub fn history(&self, person_id: &str) -> Vec<Message> {
        self.partitions
            .lock()
            .get(person_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Clear a person's entire history.
    pub fn forget_for_person(&self, person_id: &str) {
        self.partitions.lock().remove(person_id);
    }

    /// Drop messages the person itself sent, scoped to one execution.
    pub fn forget_own_messages(&self, person_id: &str, execution_id: &str) {
        let mut partitions = self.partitions.lock();
        if let Some(log) = partitions.get_mut(person_id) {
            log.retain(|m| {
                !(m.sender.as_deref() == Some(person_id)
                    && m.execution_id.as_deref() == Some(execution_id))
            });
        }
    }

    /// History statistics for a person.
    pub fn summary(&self, person_id: &str) -> ConversationSummary {
        let partitions = self.partitions.lock();
        let log = partitions.get(person_id);
        let message_count = log.map(Vec::len).unwrap_or(0);
        let approx_token_count = log
            .into_iter()
            .flatten()
            .map(|m| {
                m.token_count
                    .map(u64::from)
                    .unwrap_or_else(|| (m.content.len() as u64).div_ceil(4))
            })
            .sum();
        ConversationSummary {
            message_count,
            approx_token_count,
        }
    }

    /// Apply a retention rule ahead of an LLM invocation.
    pub fn apply_rule(
        &self,
        person_id: &str,
        rule: crate::nodes::ContextCleaningRule,
        execution_id: &str,
    ) {
        use crate::nodes::ContextCleaningRule;
        match rule {
            ContextCleaningRule::NoForget => {}
            ContextCleaningRule::OnEveryTurn => self.forget_for_person(person_id),
            ContextCleaningRule::ForgetOwn => self.forget_own_messages(person_id, execution_id),
        }
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new()
    }
}
