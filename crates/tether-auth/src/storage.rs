//! The owned authentication slot.
//!
//! Holds the credentials produced by a completed authorization. When given a
//! path, the slot is mirrored to a JSON file (mode 0o600) so the token
//! survives restarts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tether_core::security::OAuthCredentials;

use crate::errors::AuthError;

const PROVIDER_KEY: &str = "anthropic";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthFile {
    #[serde(default)]
    providers: std::collections::BTreeMap<String, StoredCredentials>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCredentials {
    access_token: String,
    refresh_token: String,
    expires_at: i64,
}

/// Shared handle to the current credentials. Cloning shares the slot.
#[derive(Clone, Default)]
pub struct AuthStore {
    slot: Arc<RwLock<Option<OAuthCredentials>>>,
    path: Option<Arc<PathBuf>>,
}

impl AuthStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A store mirrored to `path`. Existing credentials are loaded; an
    /// unreadable file is treated as empty.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let loaded = match load_credentials(&path) {
            Ok(creds) => creds,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable auth file");
                None
            }
        };
        Self {
            slot: Arc::new(RwLock::new(loaded)),
            path: Some(Arc::new(path)),
        }
    }

    /// The access token, if one is stored and non-empty.
    pub fn access_token(&self) -> Option<SecretString> {
        self.slot
            .read()
            .as_ref()
            .filter(|c| c.has_access_token())
            .map(|c| c.access_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    pub fn credentials(&self) -> Option<OAuthCredentials> {
        self.slot.read().clone()
    }

    /// Replace the stored credentials. A failure to persist is logged; the
    /// in-memory slot is updated regardless.
    pub fn set_credentials(&self, credentials: OAuthCredentials) {
        if let Some(path) = &self.path {
            if let Err(e) = save_credentials(path, Some(&credentials)) {
                tracing::warn!(path = %path.display(), error = %e, "failed to persist credentials");
            }
        }
        *self.slot.write() = Some(credentials);
    }

    /// Forget the stored credentials, in memory and on disk.
    pub fn clear(&self) -> Result<(), AuthError> {
        *self.slot.write() = None;
        if let Some(path) = &self.path {
            save_credentials(path, None)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStore")
            .field("authenticated", &self.is_authenticated())
            .field("path", &self.path)
            .finish()
    }
}

fn load_credentials(path: &Path) -> Result<Option<OAuthCredentials>, AuthError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let file: AuthFile = serde_json::from_str(&content)?;
    Ok(file
        .providers
        .get(PROVIDER_KEY)
        .map(|s| OAuthCredentials::new(s.access_token.clone(), s.refresh_token.clone(), s.expires_at)))
}

fn save_credentials(path: &Path, credentials: Option<&OAuthCredentials>) -> Result<(), AuthError> {
    let mut file = if path.exists() {
        serde_json::from_str::<AuthFile>(&std::fs::read_to_string(path)?).unwrap_or_default()
    } else {
        AuthFile::default()
    };

    match credentials {
        Some(c) => {
            let _ = file.providers.insert(
                PROVIDER_KEY.to_string(),
                StoredCredentials {
                    access_token: c.access_token.expose_secret().to_string(),
                    refresh_token: c.refresh_token.expose_secret().to_string(),
                    expires_at: c.expires_at,
                },
            );
        }
        None => {
            let _ = file.providers.remove(PROVIDER_KEY);
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&file)?)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }

    Ok(())
}
