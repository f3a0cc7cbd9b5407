//! Presence and agent rows for one session.
//!
//! Reads go through two observable caches fed by the sync channel. Writes are
//! fire-and-forget POSTs to the presence proxy; they never touch the local
//! cache, which only changes when the remote echoes the new row back.

use reqwest::header::HeaderMap;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use tether_core::ids::{AgentId, DeviceId, SessionId, UserId};
use tether_core::presence::{AgentPresenceRow, DraftView, PresenceKey, PresenceRow, PresenceStatus};
use tether_settings::TetherSettings;

use crate::cache::{CacheChange, ObservableCache, Subscription};
use crate::errors::SyncError;

#[derive(Clone, Debug, Default)]
pub struct PresenceConfig {
    pub proxy_url: Option<String>,
    pub session_id: Option<SessionId>,
    /// Sent with every write, e.g. the caller's session cookie or bearer.
    pub headers: HeaderMap,
}

impl PresenceConfig {
    /// Writes for `session_id` go to the configured proxy, if any.
    pub fn from_settings(settings: &TetherSettings, session_id: SessionId, headers: HeaderMap) -> Self {
        Self {
            proxy_url: settings.presence.proxy_url.clone(),
            session_id: Some(session_id),
            headers,
        }
    }
}

/// A batch from the sync channel.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncMessage {
    Presence(Vec<CacheChange<PresenceKey, PresenceRow>>),
    Agents(Vec<CacheChange<AgentId, AgentPresenceRow>>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PresenceWrite {
    user_id: UserId,
    device_id: DeviceId,
    status: PresenceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    draft: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor_position: Option<u32>,
}

pub struct PresenceSync {
    presence: ObservableCache<PresenceKey, PresenceRow>,
    agents: ObservableCache<AgentId, AgentPresenceRow>,
    config: PresenceConfig,
    client: reqwest::Client,
    writes: TaskTracker,
    ingest: TaskTracker,
    cancel: CancellationToken,
}

impl PresenceSync {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            presence: ObservableCache::new(),
            agents: ObservableCache::new(),
            config,
            client: reqwest::Client::new(),
            writes: TaskTracker::new(),
            ingest: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn subscribe_presence(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.presence.subscribe(callback)
    }

    pub fn subscribe_agents(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.agents.subscribe(callback)
    }

    /// Visible presence rows. Offline rows stay cached but are not listed.
    pub fn snapshot(&self) -> Vec<PresenceRow> {
        self.presence
            .snapshot()
            .values()
            .filter(|row| row.is_visible())
            .cloned()
            .collect()
    }

    pub fn agents_snapshot(&self) -> Vec<AgentPresenceRow> {
        self.agents.snapshot().values().cloned().collect()
    }

    /// In-progress drafts of visible users.
    pub fn drafts(&self) -> Vec<DraftView> {
        self.presence
            .snapshot()
            .values()
            .filter(|row| row.is_visible())
            .filter_map(|row| {
                row.draft_text().map(|text| DraftView {
                    user_id: row.user_id.clone(),
                    name: row.name.clone(),
                    text: text.to_string(),
                })
            })
            .collect()
    }

    pub fn apply_presence(&self, changes: Vec<CacheChange<PresenceKey, PresenceRow>>) -> usize {
        self.presence.apply(changes)
    }

    pub fn apply_agents(&self, changes: Vec<CacheChange<AgentId, AgentPresenceRow>>) -> usize {
        self.agents.apply(changes)
    }

    pub fn apply(&self, message: SyncMessage) -> usize {
        match message {
            SyncMessage::Presence(changes) => self.apply_presence(changes),
            SyncMessage::Agents(changes) => self.apply_agents(changes),
        }
    }

    /// Feed the caches from a sync channel until it closes or shutdown.
    pub fn spawn_ingest(&self, mut rx: mpsc::Receiver<SyncMessage>) -> tokio::task::JoinHandle<()> {
        let presence = self.presence.clone();
        let agents = self.agents.clone();
        let cancel = self.cancel.clone();

        self.ingest.spawn(async move {
            loop {
                let message = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    message = rx.recv() => message,
                };
                match message {
                    Some(SyncMessage::Presence(changes)) => {
                        let _ = presence.apply(changes);
                    }
                    Some(SyncMessage::Agents(changes)) => {
                        let _ = agents.apply(changes);
                    }
                    None => break,
                }
            }
            debug!("presence ingest stopped");
        })
    }

    /// Announce a status change. `offline` logs the device out.
    pub fn update_status(&self, user_id: &UserId, device_id: &DeviceId, status: PresenceStatus) -> bool {
        let action = if status == PresenceStatus::Offline { "logout" } else { "login" };
        self.post(
            action,
            PresenceWrite {
                user_id: user_id.clone(),
                device_id: device_id.clone(),
                status,
                draft: None,
                cursor_position: None,
            },
        )
    }

    /// Publish the current draft; the device is marked as typing.
    pub fn update_draft(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        text: &str,
        cursor_position: Option<u32>,
    ) -> bool {
        self.post(
            "login",
            PresenceWrite {
                user_id: user_id.clone(),
                device_id: device_id.clone(),
                status: PresenceStatus::Typing,
                draft: Some(text.to_string()),
                cursor_position,
            },
        )
    }

    /// Returns whether a write was dispatched. Without a proxy URL, a session
    /// id or a Tokio runtime nothing is sent.
    fn post(&self, action: &'static str, body: PresenceWrite) -> bool {
        let url = match self.endpoint(action) {
            Ok(url) => url,
            Err(_) => return false,
        };
        let Ok(runtime) = Handle::try_current() else {
            error!(action, user_id = %body.user_id, "presence write outside a tokio runtime, dropped");
            return false;
        };
        let request = self
            .client
            .post(url)
            .headers(self.config.headers.clone())
            .json(&body);

        let write = async move {
            let result = match request.send().await {
                Ok(resp) if resp.status().is_success() => Ok(()),
                Ok(resp) => Err(SyncError::from_response(resp).await),
                Err(e) => Err(SyncError::from(e)),
            };
            if let Err(e) = result {
                error!(
                    action,
                    user_id = %body.user_id,
                    device_id = %body.device_id,
                    status = body.status.as_str(),
                    error = %e,
                    "presence write failed"
                );
            }
        };
        let _ = self.writes.spawn_on(write, &runtime);
        true
    }

    fn endpoint(&self, action: &str) -> Result<String, SyncError> {
        match (&self.config.proxy_url, &self.config.session_id) {
            (Some(proxy), Some(session)) if !proxy.is_empty() => Ok(format!(
                "{}/v1/sessions/{session}/{action}",
                proxy.trim_end_matches('/')
            )),
            _ => Err(SyncError::MissingEndpoint),
        }
    }

    /// Wait for in-flight writes. Ingestion keeps running.
    pub async fn flush(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    /// Stop ingestion and join every background task.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.ingest.close();
        self.writes.close();
        self.ingest.wait().await;
        self.writes.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use reqwest::header::HeaderValue;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn row(user: &str, device: &str, status: PresenceStatus, draft: Option<&str>) -> PresenceRow {
        PresenceRow {
            user_id: UserId::from_raw(user),
            device_id: DeviceId::from_raw(device),
            name: Some(format!("{user} name")),
            status,
            last_seen_at: "2026-01-01T00:00:00Z".into(),
            draft: draft.map(str::to_string),
            cursor_position: None,
        }
    }

    fn upsert(row: PresenceRow) -> CacheChange<PresenceKey, PresenceRow> {
        CacheChange::Upsert { key: row.key(), value: row }
    }

    fn config_for(server: &MockServer) -> PresenceConfig {
        let mut headers = HeaderMap::new();
        let _ = headers.insert("cookie", HeaderValue::from_static("session=abc"));
        PresenceConfig {
            proxy_url: Some(server.uri()),
            session_id: Some(SessionId::from_raw("s1")),
            headers,
        }
    }

    #[test]
    fn snapshot_hides_offline_but_keeps_them_cached() {
        let sync = PresenceSync::new(PresenceConfig::default());
        sync.apply_presence(vec![
            upsert(row("u1", "d1", PresenceStatus::Active, None)),
            upsert(row("u2", "d1", PresenceStatus::Offline, Some("ghost"))),
            upsert(row("u3", "d1", PresenceStatus::Idle, None)),
        ]);

        let users: Vec<_> = sync.snapshot().into_iter().map(|r| r.user_id.to_string()).collect();
        assert_eq!(users, vec!["u1", "u3"]);

        // Coming back online reveals the cached row again.
        sync.apply_presence(vec![upsert(row("u2", "d1", PresenceStatus::Active, None))]);
        assert_eq!(sync.snapshot().len(), 3);
    }

    #[test]
    fn drafts_are_exactly_rows_with_text() {
        let sync = PresenceSync::new(PresenceConfig::default());
        sync.apply_presence(vec![
            upsert(row("u1", "d1", PresenceStatus::Typing, Some("hello"))),
            upsert(row("u2", "d1", PresenceStatus::Active, Some(""))),
            upsert(row("u3", "d1", PresenceStatus::Active, None)),
            upsert(row("u4", "d2", PresenceStatus::Typing, Some("wip"))),
        ]);

        assert_eq!(
            sync.drafts(),
            vec![
                DraftView {
                    user_id: UserId::from_raw("u1"),
                    name: Some("u1 name".into()),
                    text: "hello".into()
                },
                DraftView {
                    user_id: UserId::from_raw("u4"),
                    name: Some("u4 name".into()),
                    text: "wip".into()
                },
            ]
        );
    }

    #[test]
    fn subscribers_see_consistent_batches() {
        let sync = Arc::new(PresenceSync::new(PresenceConfig::default()));
        let sizes = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (s, out) = (Arc::downgrade(&sync), Arc::clone(&sizes));
        let _sub = sync.subscribe_presence(move || {
            if let Some(sync) = s.upgrade() {
                out.lock().push(sync.snapshot().len());
            }
        });

        sync.apply_presence(vec![
            upsert(row("u1", "d1", PresenceStatus::Active, None)),
            upsert(row("u2", "d1", PresenceStatus::Active, None)),
        ]);
        sync.apply_presence(vec![
            CacheChange::Remove(row("u1", "d1", PresenceStatus::Active, None).key()),
        ]);

        assert_eq!(*sizes.lock(), vec![2, 1]);
    }

    #[test]
    fn agents_snapshot_lists_rows() {
        let sync = PresenceSync::new(PresenceConfig::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _sub = sync.subscribe_agents(move || {
            let _ = h.fetch_add(1, Ordering::SeqCst);
        });

        let agent = AgentPresenceRow {
            agent_id: AgentId::from_raw("a1"),
            name: Some("Reviewer".into()),
            endpoint: "https://agents.test/a1".into(),
            triggers: None,
            model: None,
            generation_message_id: None,
        };
        sync.apply_agents(vec![CacheChange::Upsert { key: agent.agent_id.clone(), value: agent.clone() }]);

        assert_eq!(sync.agents_snapshot(), vec![agent]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ingest_applies_channel_messages() {
        let sync = PresenceSync::new(PresenceConfig::default());
        let (tx, rx) = mpsc::channel(8);
        let handle = sync.spawn_ingest(rx);

        tx.send(SyncMessage::Presence(vec![upsert(row("u1", "d1", PresenceStatus::Active, None))]))
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(sync.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_ingest() {
        let sync = PresenceSync::new(PresenceConfig::default());
        let (_tx, rx) = mpsc::channel::<SyncMessage>(1);
        let handle = sync.spawn_ingest(rx);

        sync.shutdown().await;
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn status_write_posts_login_or_logout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s1/login"))
            .and(header("cookie", "session=abc"))
            .and(body_json(serde_json::json!({"userId": "u1", "deviceId": "d1", "status": "idle"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s1/logout"))
            .and(body_json(serde_json::json!({"userId": "u1", "deviceId": "d1", "status": "offline"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sync = PresenceSync::new(config_for(&server));
        let (user, device) = (UserId::from_raw("u1"), DeviceId::from_raw("d1"));
        assert!(sync.update_status(&user, &device, PresenceStatus::Idle));
        assert!(sync.update_status(&user, &device, PresenceStatus::Offline));
        sync.flush().await;

        // Writes never touch the local cache.
        assert!(sync.snapshot().is_empty());
    }

    #[tokio::test]
    async fn draft_write_marks_typing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s1/login"))
            .and(body_json(serde_json::json!({
                "userId": "u1",
                "deviceId": "d1",
                "status": "typing",
                "draft": "hel",
                "cursorPosition": 3
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sync = PresenceSync::new(config_for(&server));
        assert!(sync.update_draft(&UserId::from_raw("u1"), &DeviceId::from_raw("d1"), "hel", Some(3)));
        sync.flush().await;
    }

    #[tokio::test]
    async fn failed_write_is_contained() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let sync = PresenceSync::new(config_for(&server));
        assert!(sync.update_status(&UserId::from_raw("u1"), &DeviceId::from_raw("d1"), PresenceStatus::Active));
        sync.flush().await;
    }

    #[tokio::test]
    async fn config_from_settings_targets_the_proxy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s9/login"))
            .and(header("authorization", "Bearer t"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = TetherSettings::default();
        let mut headers = HeaderMap::new();
        let _ = headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        let unset = PresenceConfig::from_settings(&settings, SessionId::from_raw("s9"), headers.clone());
        assert!(!PresenceSync::new(unset).update_status(
            &UserId::from_raw("u1"),
            &DeviceId::from_raw("d1"),
            PresenceStatus::Active
        ));

        settings.presence.proxy_url = Some(format!("{}/", server.uri()));
        let sync = PresenceSync::new(PresenceConfig::from_settings(&settings, SessionId::from_raw("s9"), headers));
        assert!(sync.update_status(&UserId::from_raw("u1"), &DeviceId::from_raw("d1"), PresenceStatus::Active));
        sync.flush().await;
    }

    #[test]
    fn writes_outside_a_runtime_are_dropped() {
        let sync = PresenceSync::new(PresenceConfig {
            proxy_url: Some("https://proxy.test".into()),
            session_id: Some(SessionId::from_raw("s1")),
            headers: HeaderMap::new(),
        });
        let (user, device) = (UserId::from_raw("u1"), DeviceId::from_raw("d1"));

        assert!(!sync.update_status(&user, &device, PresenceStatus::Active));
        assert!(!sync.update_draft(&user, &device, "hi", Some(2)));
        assert!(sync.snapshot().is_empty());
    }

    #[test]
    fn writes_without_endpoint_are_skipped() {
        let sync = PresenceSync::new(PresenceConfig {
            proxy_url: Some("https://proxy.test".into()),
            session_id: None,
            headers: HeaderMap::new(),
        });
        assert!(!sync.update_status(&UserId::from_raw("u1"), &DeviceId::from_raw("d1"), PresenceStatus::Active));

        let sync = PresenceSync::new(PresenceConfig::default());
        assert!(!sync.update_draft(&UserId::from_raw("u1"), &DeviceId::from_raw("d1"), "x", None));
    }
}
