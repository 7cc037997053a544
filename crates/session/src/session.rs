//! The session aggregate: one conversation's ordered turn history.

use chrono::{DateTime, Utc};
use cxloop_core::turn::{SessionId, Turn};
use serde::Serialize;

/// A single ongoing conversation.
///
/// Turns can only be appended; the history is never reordered or trimmed.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: SessionId,
    turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            turns: Vec::new(),
            created_at: now,
            last_accessed: now,
        }
    }

    pub(crate) fn push(&mut self, turn: Turn) {
        self.last_accessed = Utc::now();
        self.turns.push(turn);
    }

    /// All turns, oldest first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Lightweight metadata about a session, readable without its lock.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    /// Whether this call created the session
    pub created: bool,
}
