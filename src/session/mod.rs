//! Conversation history
//!
//! The caller owns the history: it goes into `ask` and comes back with the
//! new turn appended. Nothing is kept between calls inside the engine.
use crate::agent::AgentStatus;
use crate::error::{CodePalError, Result};
use crate::storage::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// One question and its answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    pub status: AgentStatus,
    pub asked_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>, status: AgentStatus) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            status,
            asked_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    /// Unique conversation identifier
    pub id: Uuid,

    /// When the first question was asked
    pub started_at: DateTime<Utc>,

    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The last `n` turns, oldest first
    pub fn recent(&self, n: usize) -> &[Turn] {
        &self.turns[self.turns.len().saturating_sub(n)..]
    }

    /// Save conversation to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CodePalError::Io {
                source: e,
                context: format!("Failed to create history directory: {}", parent.display()),
            })?;
        }

        let content = serde_json::to_string_pretty(self).map_err(|e| CodePalError::Json {
            source: e,
            context: "Failed to serialize conversation history".to_string(),
        })?;
        write_atomic(path, content.as_bytes()).map_err(|e| CodePalError::Io {
            source: e,
            context: format!("Failed to write history file: {}", path.display()),
        })?;

        Ok(())
    }

    /// Load conversation from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CodePalError::Io {
            source: e,
            context: format!("Failed to read history file: {}", path.display()),
        })?;
        let history = serde_json::from_str(&content).map_err(|e| CodePalError::Json {
            source: e,
            context: format!("Failed to parse history file: {}", path.display()),
        })?;

        Ok(history)
    }

    /// Load the file if it exists, else start a new conversation
    pub fn load_or_new(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}
