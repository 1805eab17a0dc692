//! JSON bodies exchanged between the remote store client and the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::emotion::Emotion;
use crate::records::{ProgressUpdate, RecordKind};
use crate::types::UserId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveProgressRequest {
    pub user_id: UserId,
    pub character: String,
    pub progress: ProgressUpdate,
}

/// `userId` is optional on the wire so the API can answer 403 rather than a parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveChatRequest {
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub character: String,
    pub message: String,
    #[serde(default)]
    pub is_user: bool,
    #[serde(default)]
    pub emotion: Option<Emotion>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMemoryRequest {
    pub user_id: UserId,
    pub character: String,
    /// Memory content.
    pub memory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance_score: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMemoryRequest {
    pub memory_content: String,
    pub importance_score: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepBody {
    pub user_id: UserId,
    pub kind: RecordKind,
    pub older_than_secs: u64,
    #[serde(default)]
    pub min_importance: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResponse {
    pub removed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<usize>,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            removed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
