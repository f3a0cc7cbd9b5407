//! Command-status delivery to the backend of record.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use tether_core::commands::CommandUpdate;

use crate::backoff::{BackoffMutator, DeliveryOutcome};
use crate::errors::SyncError;

const UPDATE_COMMAND_PATH: &str = "/api/trpc/agent.updateCommand";

/// The remote `updateCommand` mutation. Must be idempotent: a retried update
/// may arrive more than once.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn update_command(&self, update: &CommandUpdate) -> Result<(), SyncError>;
}

pub struct HttpCommandSink {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
}

impl HttpCommandSink {
    pub fn new(api_url: &str, headers: HeaderMap) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}{UPDATE_COMMAND_PATH}", api_url.trim_end_matches('/')),
            headers,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CommandSink for HttpCommandSink {
    async fn update_command(&self, update: &CommandUpdate) -> Result<(), SyncError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(update)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SyncError::from_response(resp).await);
        }
        Ok(())
    }
}

/// Runs each command update as a tracked background delivery.
pub struct CommandPersister {
    sink: Arc<dyn CommandSink>,
    mutator: BackoffMutator,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl CommandPersister {
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        Self::with_mutator(sink, BackoffMutator::default())
    }

    pub fn with_mutator(sink: Arc<dyn CommandSink>, mutator: BackoffMutator) -> Self {
        Self {
            sink,
            mutator,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Deliver `update` in the background. Returns immediately.
    pub fn persist(&self, update: CommandUpdate) -> tokio::task::JoinHandle<DeliveryOutcome> {
        let sink = Arc::clone(&self.sink);
        let mutator = self.mutator.clone();
        let cancel = self.cancel.clone();
        let span = tracing::info_span!("persist_command", command_id = %update.id, status = ?update.status);

        self.tracker.spawn(
            async move {
                let key = update.id.to_string();
                mutator
                    .deliver(&key, &cancel, || sink.update_command(&update))
                    .await
            }
            .instrument(span),
        )
    }

    /// Deliver `update` inline, returning how it ended.
    pub async fn persist_now(&self, update: &CommandUpdate) -> DeliveryOutcome {
        let key = update.id.to_string();
        self.mutator
            .deliver(&key, &self.cancel, || self.sink.update_command(update))
            .await
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for outstanding deliveries without interrupting them.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel pending backoff waits and join every delivery.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
