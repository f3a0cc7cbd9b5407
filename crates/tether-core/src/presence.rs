use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, DeviceId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Active,
    Idle,
    Typing,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Typing => "typing",
            Self::Offline => "offline",
        }
    }
}

/// Cache key for a presence row: one row per user and device.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PresenceKey {
    pub user_id: UserId,
    pub device_id: DeviceId,
}

/// Per-user, per-device presence as echoed back by the sync channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRow {
    pub user_id: UserId,
    pub device_id: DeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: PresenceStatus,
    pub last_seen_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_position: Option<u32>,
}

impl PresenceRow {
    pub fn key(&self) -> PresenceKey {
        PresenceKey {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.status != PresenceStatus::Offline
    }

    /// The draft text, if present and non-empty.
    pub fn draft_text(&self) -> Option<&str> {
        self.draft.as_deref().filter(|d| !d.is_empty())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentTriggers {
    All,
    UserMessages,
}

/// An agent attached to a session. Read-only from this side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPresenceRow {
    pub agent_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<AgentTriggers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_message_id: Option<String>,
}

/// A collaborator's in-progress draft.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftView {
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub text: String,
}
