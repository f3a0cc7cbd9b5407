//! In-process agent manager for tests and local runs.
//!
//! Sessions are registered in a catalog against the organization that owns
//! them; a manager only creates watchers for sessions of its current
//! organization.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use tether_core::events::LifecycleEvent;
use tether_core::ids::{DeviceId, OrganizationId, SessionId};
use tether_core::messages::DigestEntry;

use crate::manager::{AgentManager, ManagerConfig, ManagerError, ManagerFactory, SessionHost, WatcherStatus};

pub const SESSION_NOT_FOUND: &str = "Session not found in organization";

/// Session host with a settable digest that records posted titles.
#[derive(Default)]
pub struct MockSessionHost {
    digest: Mutex<Vec<DigestEntry>>,
    titles: Mutex<Vec<String>>,
    fail_posts: bool,
}

impl MockSessionHost {
    pub fn new(digest: Vec<DigestEntry>) -> Self {
        Self {
            digest: Mutex::new(digest),
            ..Self::default()
        }
    }

    pub fn failing_posts(mut self) -> Self {
        self.fail_posts = true;
        self
    }

    pub fn set_digest(&self, digest: Vec<DigestEntry>) {
        *self.digest.lock() = digest;
    }

    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().clone()
    }
}

#[async_trait]
impl SessionHost for MockSessionHost {
    fn message_digest(&self) -> Vec<DigestEntry> {
        self.digest.lock().clone()
    }

    async fn post_title(&self, title: &str) -> Result<(), ManagerError> {
        if self.fail_posts {
            return Err(ManagerError::Title("host rejected title".into()));
        }
        self.titles.lock().push(title.to_string());
        Ok(())
    }
}

/// Which organization each known session belongs to.
pub type SessionCatalog = Arc<DashMap<SessionId, OrganizationId>>;

pub struct MockAgentManager {
    organization_id: RwLock<OrganizationId>,
    device_id: RwLock<DeviceId>,
    catalog: SessionCatalog,
    watchers: DashMap<SessionId, (Arc<MockSessionHost>, Option<PathBuf>)>,
    events: mpsc::UnboundedSender<LifecycleEvent>,
    running: AtomicBool,
    starts: AtomicUsize,
    restarts: AtomicUsize,
    stops: AtomicUsize,
}

impl MockAgentManager {
    pub fn new(config: ManagerConfig, catalog: SessionCatalog) -> Self {
        Self {
            organization_id: RwLock::new(config.organization_id),
            device_id: RwLock::new(config.device_id),
            catalog,
            watchers: DashMap::new(),
            events: config.events,
            running: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// Report a lifecycle event as a watcher would.
    pub fn emit(&self, event: LifecycleEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn host(&self, session_id: &SessionId) -> Option<Arc<MockSessionHost>> {
        self.watchers.get(session_id).map(|w| Arc::clone(&w.0))
    }

    pub fn watcher_cwd(&self, session_id: &SessionId) -> Option<PathBuf> {
        self.watchers.get(session_id).and_then(|w| w.1.clone())
    }

    fn belongs_here(&self, session_id: &SessionId) -> bool {
        let org = self.organization_id.read().clone();
        self.catalog.get(session_id).is_some_and(|owner| *owner == org)
    }
}

#[async_trait]
impl AgentManager for MockAgentManager {
    async fn start(&self) -> Result<(), ManagerError> {
        let _ = self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn restart(&self, organization_id: OrganizationId, device_id: DeviceId) -> Result<(), ManagerError> {
        let _ = self.restarts.fetch_add(1, Ordering::SeqCst);
        *self.organization_id.write() = organization_id;
        *self.device_id.write() = device_id;
        self.watchers.retain(|session_id, _| {
            let org = self.organization_id.read();
            self.catalog.get(session_id).is_some_and(|owner| *owner == *org)
        });
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        let _ = self.stops.fetch_add(1, Ordering::SeqCst);
        self.watchers.clear();
        self.running.store(false, Ordering::SeqCst);
    }

    fn organization_id(&self) -> OrganizationId {
        self.organization_id.read().clone()
    }

    fn has_watcher(&self, session_id: &SessionId) -> bool {
        self.watchers.contains_key(session_id)
    }

    async fn ensure_watcher(&self, session_id: &SessionId, cwd: Option<&Path>) -> WatcherStatus {
        if self.watchers.contains_key(session_id) {
            return WatcherStatus::ready();
        }
        if !self.belongs_here(session_id) {
            return WatcherStatus::not_ready(SESSION_NOT_FOUND);
        }
        let _ = self
            .watchers
            .entry(session_id.clone())
            .or_insert_with(|| (Arc::new(MockSessionHost::default()), cwd.map(Path::to_path_buf)));
        WatcherStatus::ready()
    }

    fn watcher(&self, session_id: &SessionId) -> Option<Arc<dyn SessionHost>> {
        self.watchers
            .get(session_id)
            .map(|w| Arc::clone(&w.0) as Arc<dyn SessionHost>)
    }
}

/// Creates [`MockAgentManager`]s over a shared catalog and keeps every one
/// it made for inspection.
#[derive(Default)]
pub struct MockManagerFactory {
    catalog: SessionCatalog,
    created: Mutex<Vec<Arc<MockAgentManager>>>,
}

impl MockManagerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session_id` as owned by `organization_id`.
    pub fn add_session(&self, session_id: SessionId, organization_id: OrganizationId) {
        let _ = self.catalog.insert(session_id, organization_id);
    }

    pub fn created(&self) -> Vec<Arc<MockAgentManager>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<MockAgentManager>> {
        self.created.lock().last().cloned()
    }
}

impl ManagerFactory for MockManagerFactory {
    fn create(&self, config: ManagerConfig) -> Arc<dyn AgentManager> {
        let manager = Arc::new(MockAgentManager::new(config, Arc::clone(&self.catalog)));
        self.created.lock().push(Arc::clone(&manager));
        manager
    }
}
