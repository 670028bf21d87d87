//! Memory record types
//!
//! A memory namespace is shared by all sessions of one user. History entries
//! carry their session id so the history window can be cut per session, while
//! long-term facts are visible to every session of the user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Speaker of a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One row of a memory table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryRecord {
    /// A conversational turn
    History {
        session_id: String,
        role: Role,
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// A derived long-term fact about the user
    Fact {
        id: Uuid,
        content: String,
        created_at: DateTime<Utc>,
    },
}

impl MemoryRecord {
    /// New history entry stamped now
    pub fn history(session_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self::History {
            session_id: session_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// New long-term fact stamped now
    pub fn fact(content: impl Into<String>) -> Self {
        Self::Fact {
            id: Uuid::new_v4(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// A history turn as handed to the reasoning engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}
