//! Session orchestrator: the single owner of the active agent manager.
//!
//! `start`/`stop` are the only mutators of the manager slot and are
//! serialized by an async lock. Each manager gets one dispatcher task that
//! drains its lifecycle events in order, forwards them to subscribers, and
//! launches a tracked title task for every `Stop`.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};

use tether_auth::{AuthStatus, OAuthCompletion, OAuthFlow, OAuthStart};
use tether_core::events::LifecycleEvent;
use tether_core::ids::{DeviceId, OrganizationId, SessionId};
use tether_settings::TetherSettings;

use crate::errors::ServiceError;
use crate::manager::{AgentManager, ManagerConfig, ManagerFactory, WatcherStatus};
use crate::title::{TitleOutcome, TitlePolicy};

pub const NOT_STARTED_REASON: &str = "Chat service is not started";
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub device_id: DeviceId,
    pub api_url: String,
}

impl OrchestratorConfig {
    /// An empty configured device id mints a fresh one.
    pub fn from_settings(settings: &TetherSettings) -> Self {
        let device_id = if settings.service.device_id.is_empty() {
            DeviceId::new()
        } else {
            DeviceId::from_raw(settings.service.device_id.as_str())
        };
        Self {
            device_id,
            api_url: settings.service.api_url.clone(),
        }
    }
}

type ManagerSlot = Arc<RwLock<Option<Arc<dyn AgentManager>>>>;

pub struct SessionOrchestrator {
    config: OrchestratorConfig,
    factory: Arc<dyn ManagerFactory>,
    titles: Arc<TitlePolicy>,
    oauth: OAuthFlow,
    lifecycle: Mutex<()>,
    manager: ManagerSlot,
    events: broadcast::Sender<LifecycleEvent>,
    dispatchers: TaskTracker,
    title_tasks: TaskTracker,
    cancel: CancellationToken,
}

impl SessionOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        factory: Arc<dyn ManagerFactory>,
        titles: TitlePolicy,
        oauth: OAuthFlow,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            factory,
            titles: Arc::new(titles),
            oauth,
            lifecycle: Mutex::new(()),
            manager: Arc::new(RwLock::new(None)),
            events,
            dispatchers: TaskTracker::new(),
            title_tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Every lifecycle event of every session, as emitted.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Start for `organization_id`, or re-scope the running manager in place.
    pub async fn start(&self, organization_id: OrganizationId) -> Result<(), ServiceError> {
        let _guard = self.lifecycle.lock().await;

        let existing = self.manager.read().clone();
        if let Some(manager) = existing {
            info!(organization_id = %organization_id, "restarting agent manager");
            manager.restart(organization_id, self.config.device_id.clone()).await?;
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let manager = self.factory.create(ManagerConfig {
            device_id: self.config.device_id.clone(),
            organization_id: organization_id.clone(),
            api_url: self.config.api_url.clone(),
            events: tx,
        });
        self.spawn_dispatcher(rx);

        // Published before `start` completes so early events can find it.
        *self.manager.write() = Some(Arc::clone(&manager));
        if let Err(e) = manager.start().await {
            *self.manager.write() = None;
            manager.stop().await;
            return Err(e.into());
        }
        info!(organization_id = %organization_id, device_id = %self.config.device_id, "agent manager started");
        Ok(())
    }

    /// Stop and release the manager. No-op when not started.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        let manager = self.manager.write().take();
        if let Some(manager) = manager {
            manager.stop().await;
            info!("agent manager stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.manager.read().is_some()
    }

    pub fn organization_id(&self) -> Result<OrganizationId, ServiceError> {
        self.current().map(|m| m.organization_id()).ok_or(ServiceError::NotStarted)
    }

    pub fn has_watcher(&self, session_id: &SessionId) -> bool {
        self.current().is_some_and(|m| m.has_watcher(session_id))
    }

    pub async fn ensure_watcher(&self, session_id: &SessionId, cwd: Option<&Path>) -> WatcherStatus {
        match self.current() {
            Some(manager) => manager.ensure_watcher(session_id, cwd).await,
            None => WatcherStatus::not_ready(NOT_STARTED_REASON),
        }
    }

    /// Run the title policy for one session now.
    pub async fn generate_title(&self, session_id: &SessionId) -> Result<TitleOutcome, ServiceError> {
        let manager = self.current().ok_or(ServiceError::NotStarted)?;
        let Some(host) = manager.watcher(session_id) else {
            return Ok(TitleOutcome::Skipped);
        };
        Ok(self.titles.title_contained(host.as_ref()).await)
    }

    pub fn auth_status(&self) -> AuthStatus {
        self.oauth.status()
    }

    pub fn start_oauth(&self) -> OAuthStart {
        self.oauth.start()
    }

    pub fn cancel_oauth(&self) -> bool {
        self.oauth.cancel()
    }

    pub async fn complete_oauth(&self, code: &str) -> Result<OAuthCompletion, ServiceError> {
        Ok(self.oauth.complete(code).await?)
    }

    /// Wait for in-flight title tasks.
    pub async fn flush_titles(&self) {
        self.title_tasks.close();
        self.title_tasks.wait().await;
        self.title_tasks.reopen();
    }

    /// Stop the manager, drain queued events, then join all background work.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.cancel.cancel();
        self.dispatchers.close();
        self.dispatchers.wait().await;
        self.title_tasks.close();
        self.title_tasks.wait().await;
        debug!("orchestrator shut down");
    }

    fn current(&self) -> Option<Arc<dyn AgentManager>> {
        self.manager.read().clone()
    }

    fn spawn_dispatcher(&self, mut rx: mpsc::UnboundedReceiver<LifecycleEvent>) {
        let events = self.events.clone();
        let slot = Arc::clone(&self.manager);
        let titles = Arc::clone(&self.titles);
        let title_tasks = self.title_tasks.clone();
        let cancel = self.cancel.clone();

        let _ = self.dispatchers.spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    () = cancel.cancelled() => break,
                };

                if event.is_stop() {
                    let host = slot.read().as_ref().and_then(|m| m.watcher(&event.session_id));
                    match host {
                        Some(host) => {
                            let titles = Arc::clone(&titles);
                            let span = tracing::info_span!("title", session_id = %event.session_id);
                            let _ = title_tasks.spawn(
                                async move {
                                    let _ = titles.title_contained(host.as_ref()).await;
                                }
                                .instrument(span),
                            );
                        }
                        None => debug!(session_id = %event.session_id, "no watcher to title"),
                    }
                }

                if events.send(event).is_err() {
                    debug!("no lifecycle subscribers");
                }
            }
            debug!("lifecycle dispatcher stopped");
        });
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        if self.manager.read().is_some() {
            warn!("orchestrator dropped while started; call shutdown() to stop the manager");
        }
        self.cancel.cancel();
    }
}
