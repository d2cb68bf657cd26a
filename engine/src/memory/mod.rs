//! Conversation memory
//!
//! Manages the ordered log of conversation turns handed to the LLM. The
//! memory is capacity-bounded: once the configured number of non-system
//! turns is reached, the oldest turn is evicted (FIFO). The system preamble
//! is pinned separately and is never evicted; it is always first in any
//! snapshot handed to the reasoning step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::errors::AssistantError;

/// Role of a turn's author
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User turn
    User,

    /// Assistant turn
    Assistant,

    /// System turn (instruction preamble)
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// One message in a conversation. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    /// Role of the turn's author
    pub role: Role,

    /// Content of the turn
    pub content: String,

    /// When the turn was recorded
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new system turn
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Capacity-bounded conversation history
///
/// The capacity bounds the number of non-system turns; the pinned system
/// preamble does not count against it.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    /// Pinned instruction preamble, never evicted
    preamble: Option<Turn>,

    /// Ordered non-system turns, oldest first
    turns: VecDeque<Turn>,

    /// Maximum number of non-system turns retained
    capacity: usize,
}

impl ConversationMemory {
    /// Create a new memory with the given capacity
    ///
    /// Fails with a configuration error if `capacity` is zero: a memory that
    /// can hold no turns cannot supply context and refusing at construction
    /// keeps the failure at startup.
    pub fn new(capacity: usize) -> Result<Self, AssistantError> {
        if capacity == 0 {
            return Err(AssistantError::Config(
                "memory capacity must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            preamble: None,
            turns: VecDeque::new(),
            capacity,
        })
    }

    /// Create a new memory with the given capacity and system preamble
    pub fn with_preamble(
        capacity: usize,
        system_prompt: impl Into<String>,
    ) -> Result<Self, AssistantError> {
        let mut memory = Self::new(capacity)?;
        memory.append(Turn::system(system_prompt));
        Ok(memory)
    }

    /// Append a turn to the tail
    ///
    /// A system turn replaces the pinned preamble. Any other turn is pushed
    /// to the tail; if the capacity is exceeded, the oldest non-system turn
    /// is evicted.
    pub fn append(&mut self, turn: Turn) {
        if turn.role == Role::System {
            self.preamble = Some(turn);
            return;
        }

        self.turns.push_back(turn);
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }

    /// Return an ordered copy of the history, preamble first
    ///
    /// The copy is detached from the memory: later appends never mutate a
    /// snapshot already handed out.
    pub fn snapshot(&self) -> Vec<Turn> {
        let mut turns = Vec::with_capacity(self.turns.len() + 1);
        if let Some(preamble) = &self.preamble {
            turns.push(preamble.clone());
        }
        turns.extend(self.turns.iter().cloned());
        turns
    }

    /// Number of non-system turns currently held
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the memory holds no non-system turns
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all non-system turns, keeping the preamble
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
