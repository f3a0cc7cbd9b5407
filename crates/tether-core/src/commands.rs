use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::CommandId;

/// Status of a remote command as recorded by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Claimed,
    Executing,
    Success,
    Failed,
    Timeout,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout)
    }
}

/// A request to update one command on the backend of record.
///
/// Delivery may repeat the same update, so the backend must treat it as
/// idempotent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandUpdate {
    pub id: CommandId,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl CommandUpdate {
    pub fn new(id: CommandId, status: CommandStatus) -> Self {
        Self {
            id,
            status,
            claimed_by: None,
            claimed_at: None,
            result: None,
            error: None,
            executed_at: None,
        }
    }

    /// Mark the command claimed by a device, stamped now.
    pub fn claimed(id: CommandId, device: impl Into<String>) -> Self {
        Self {
            claimed_by: Some(device.into()),
            claimed_at: Some(Utc::now()),
            ..Self::new(id, CommandStatus::Claimed)
        }
    }

    pub fn succeeded(id: CommandId, result: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            result: Some(result),
            executed_at: Some(Utc::now()),
            ..Self::new(id, CommandStatus::Success)
        }
    }

    pub fn failed(id: CommandId, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            executed_at: Some(Utc::now()),
            ..Self::new(id, CommandStatus::Failed)
        }
    }
}
