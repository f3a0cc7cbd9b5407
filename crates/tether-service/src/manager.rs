//! Contract of the external agent manager and its per-session watchers.
//!
//! The manager's internals live elsewhere; the orchestrator only relies on
//! what is declared here.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use tether_core::events::LifecycleEvent;
use tether_core::ids::{DeviceId, OrganizationId, SessionId};
use tether_core::messages::DigestEntry;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("agent manager failed to start: {0}")]
    Start(String),

    #[error("session {session_id}: {message}")]
    Session { session_id: SessionId, message: String },

    #[error("failed to post title: {0}")]
    Title(String),
}

/// Everything a manager needs to run on behalf of one organization.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub device_id: DeviceId,
    pub organization_id: OrganizationId,
    pub api_url: String,
    /// Every lifecycle event of every watcher, in emission order per session.
    pub events: mpsc::UnboundedSender<LifecycleEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WatcherStatus {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WatcherStatus {
    pub fn ready() -> Self {
        Self {
            ready: true,
            reason: None,
        }
    }

    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self {
            ready: false,
            reason: Some(reason.into()),
        }
    }
}

/// The session side of a watcher.
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// The conversation so far, oldest first.
    fn message_digest(&self) -> Vec<DigestEntry>;

    async fn post_title(&self, title: &str) -> Result<(), ManagerError>;
}

/// Owns the watchers of one organization. At most one live watcher per
/// session id.
#[async_trait]
pub trait AgentManager: Send + Sync {
    async fn start(&self) -> Result<(), ManagerError>;

    /// Re-scope in place. Watchers outside the new organization go away.
    async fn restart(&self, organization_id: OrganizationId, device_id: DeviceId) -> Result<(), ManagerError>;

    async fn stop(&self);

    fn organization_id(&self) -> OrganizationId;

    fn has_watcher(&self, session_id: &SessionId) -> bool;

    /// Idempotent: an existing watcher is reported ready.
    async fn ensure_watcher(&self, session_id: &SessionId, cwd: Option<&Path>) -> WatcherStatus;

    fn watcher(&self, session_id: &SessionId) -> Option<Arc<dyn SessionHost>>;
}

pub trait ManagerFactory: Send + Sync {
    fn create(&self, config: ManagerConfig) -> Arc<dyn AgentManager>;
}
