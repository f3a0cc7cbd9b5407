//! Single-slot PKCE authorization handshake.
//!
//! `Idle → Pending → {Idle via cancel, Idle via expiry, Authenticated via complete}`.
//! Starting while pending silently replaces the pending authorization. The
//! slot is consumed before the code exchange runs, so a failed exchange
//! cannot be retried against the same verifier and state.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use tether_core::security::ANTHROPIC_OAUTH;

use crate::anthropic::{ExchangeRequest, OAuthProvider};
use crate::errors::AuthError;
use crate::storage::AuthStore;

/// A pending authorization older than this cannot be completed.
pub const SESSION_TTL: Duration = Duration::from_secs(ANTHROPIC_OAUTH.session_ttl_secs);

const INSTRUCTIONS: &str =
    "Authorize Anthropic in your browser, then paste the code shown there (format: code#state).";

struct PendingAuthorization {
    verifier: String,
    state: String,
    started: Instant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OAuthStart {
    pub url: String,
    pub instructions: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCompletion {
    pub success: bool,
    /// Unix milliseconds.
    pub expires_at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    pub authenticated: bool,
}

pub struct OAuthFlow {
    provider: Arc<dyn OAuthProvider>,
    store: AuthStore,
    pending: Mutex<Option<PendingAuthorization>>,
}

impl OAuthFlow {
    pub fn new(provider: Arc<dyn OAuthProvider>, store: AuthStore) -> Self {
        Self {
            provider,
            store,
            pending: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &AuthStore {
        &self.store
    }

    pub fn status(&self) -> AuthStatus {
        AuthStatus {
            authenticated: self.store.is_authenticated(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    pub fn start(&self) -> OAuthStart {
        let session = self.provider.create_session();
        let replaced = self.pending.lock().replace(PendingAuthorization {
            verifier: session.verifier,
            state: session.state,
            started: Instant::now(),
        });
        if replaced.is_some() {
            tracing::debug!("discarding pending authorization in favour of a new one");
        }
        tracing::info!("authorization started");

        OAuthStart {
            url: session.auth_url,
            instructions: INSTRUCTIONS.to_string(),
        }
    }

    pub fn cancel(&self) -> bool {
        if self.pending.lock().take().is_some() {
            tracing::info!("authorization cancelled");
        }
        true
    }

    pub async fn complete(&self, code: &str) -> Result<OAuthCompletion, AuthError> {
        let pending = {
            let mut slot = self.pending.lock();
            let pending = slot.take().ok_or(AuthError::NoActiveSession)?;
            // Expiry leaves the slot empty as well.
            if pending.started.elapsed() > SESSION_TTL {
                tracing::info!("authorization expired before completion");
                return Err(AuthError::SessionExpired);
            }
            pending
        };

        let credentials = self
            .provider
            .exchange_code(ExchangeRequest {
                raw_code: code,
                verifier: &pending.verifier,
                expected_state: &pending.state,
            })
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "authorization code exchange failed"))?;

        let expires_at = credentials.expires_at;
        self.store.set_credentials(credentials);
        tracing::info!(expires_at, "authorization completed");

        Ok(OAuthCompletion {
            success: true,
            expires_at,
        })
    }
}
