use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Execution phase transitions reported by a session's watcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEventType {
    Start,
    PermissionRequest,
    Stop,
}

impl LifecycleEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::PermissionRequest => "PermissionRequest",
            Self::Stop => "Stop",
        }
    }
}

impl std::fmt::Display for LifecycleEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle notification for one session. Consumed once by the
/// orchestrator and forwarded to any external listener.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub session_id: SessionId,
    pub event_type: LifecycleEventType,
}

impl LifecycleEvent {
    pub fn new(session_id: SessionId, event_type: LifecycleEventType) -> Self {
        Self {
            session_id,
            event_type,
        }
    }

    pub fn start(session_id: SessionId) -> Self {
        Self::new(session_id, LifecycleEventType::Start)
    }

    pub fn permission_request(session_id: SessionId) -> Self {
        Self::new(session_id, LifecycleEventType::PermissionRequest)
    }

    pub fn stop(session_id: SessionId) -> Self {
        Self::new(session_id, LifecycleEventType::Stop)
    }

    pub fn is_stop(&self) -> bool {
        self.event_type == LifecycleEventType::Stop
    }
}
