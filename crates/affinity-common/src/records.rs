use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::emotion::Emotion;
use crate::types::{CharacterId, UserId};

/// The four record kinds the persistence layer owns.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Profile,
    Progress,
    Chat,
    Memory,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Progress => "progress",
            Self::Chat => "chat",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

/// Per-character save state, unique per `(user_id, character_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub user_id: UserId,
    pub character_id: CharacterId,
    /// Always within `0..=100`.
    pub affection_level: i32,
    #[serde(default)]
    pub current_emotion: Emotion,
    #[serde(default)]
    pub nsfw_enabled: bool,
    #[serde(default)]
    pub total_interactions: u32,
    pub updated_at: DateTime<Utc>,
}

/// Write payload for a progress upsert. `affection_level` may be out of range; it is clamped on write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub affection_level: i32,
    #[serde(default)]
    pub current_emotion: Emotion,
    #[serde(default)]
    pub nsfw_enabled: bool,
    #[serde(default)]
    pub total_interactions: u32,
}

impl ProgressUpdate {
    pub fn into_record(
        self,
        user_id: UserId,
        character_id: CharacterId,
        updated_at: DateTime<Utc>,
    ) -> ProgressRecord {
        ProgressRecord {
            user_id,
            character_id,
            affection_level: self.affection_level,
            current_emotion: self.current_emotion,
            nsfw_enabled: self.nsfw_enabled,
            total_interactions: self.total_interactions,
            updated_at,
        }
    }
}

/// One logical chat turn. Either side may be missing until its partner is paired in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub user_id: UserId,
    pub character_id: CharacterId,
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default)]
    pub character_response: Option<String>,
    #[serde(default)]
    pub emotion: Emotion,
    pub timestamp: DateTime<Utc>,
}

impl ChatEntry {
    pub fn from_message(user_id: UserId, character_id: CharacterId, message: &ChatMessage) -> Self {
        let (user_input, character_response) = if message.is_user {
            (Some(message.text.clone()), None)
        } else {
            (None, Some(message.text.clone()))
        };

        Self {
            user_id,
            character_id,
            user_input,
            character_response,
            emotion: message.emotion,
            timestamp: message.timestamp,
        }
    }
}

/// A single message as produced by the chat screen, before pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub text: String,
    pub is_user: bool,
    #[serde(default)]
    pub emotion: Emotion,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_user: true,
            emotion: Emotion::Neutral,
            timestamp: Utc::now(),
        }
    }

    pub fn character(text: impl Into<String>, emotion: Emotion) -> Self {
        Self {
            text: text.into(),
            is_user: false,
            emotion,
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_emotion(mut self, emotion: Emotion) -> Self {
        self.emotion = emotion;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: i64,
    pub user_id: UserId,
    pub character_id: CharacterId,
    pub memory_type: String,
    pub memory_content: String,
    pub importance_score: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert shape for a memory before the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMemory {
    pub memory_type: String,
    pub memory_content: String,
    pub importance_score: u32,
}

impl NewMemory {
    pub fn general(content: impl Into<String>) -> Self {
        Self {
            memory_type: "general".to_string(),
            memory_content: content.into(),
            importance_score: 1,
        }
    }

    pub fn with_importance(mut self, importance_score: u32) -> Self {
        self.importance_score = importance_score;
        self
    }

    pub fn with_type(mut self, memory_type: impl Into<String>) -> Self {
        self.memory_type = memory_type.into();
        self
    }
}

/// Retention sweep parameters. `min_importance` only applies to memories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepRequest {
    pub kind: RecordKind,
    pub older_than_secs: u64,
    #[serde(default)]
    pub min_importance: Option<u32>,
}

impl SweepRequest {
    pub fn chat(older_than: std::time::Duration) -> Self {
        Self {
            kind: RecordKind::Chat,
            older_than_secs: older_than.as_secs(),
            min_importance: None,
        }
    }

    pub fn memory(older_than: std::time::Duration, min_importance: u32) -> Self {
        Self {
            kind: RecordKind::Memory,
            older_than_secs: older_than.as_secs(),
            min_importance: Some(min_importance),
        }
    }

    /// Entries created strictly before this instant are eligible.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = i64::try_from(self.older_than_secs).unwrap_or(i64::MAX);
        chrono::Duration::try_seconds(secs)
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
