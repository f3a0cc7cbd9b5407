//! Anthropic OAuth implementation.
//!
//! Builds the authorize URL for a fresh PKCE pair and exchanges the pasted
//! `code#state` for credentials.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tether_core::security::{OAuthCredentials, ANTHROPIC_OAUTH};

use crate::errors::AuthError;
use crate::pkce::{generate_pkce, generate_state};

/// OAuth endpoint settings. Owned so tests can point them at a local server.
#[derive(Clone, Debug)]
pub struct OAuthConfig {
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub client_id: String,
    pub scopes: Vec<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            auth_url: ANTHROPIC_OAUTH.auth_url.to_string(),
            token_url: ANTHROPIC_OAUTH.token_url.to_string(),
            redirect_uri: ANTHROPIC_OAUTH.redirect_uri.to_string(),
            client_id: ANTHROPIC_OAUTH.client_id.to_string(),
            scopes: ANTHROPIC_OAUTH.scopes.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A freshly created authorization: the URL to open plus the secrets that
/// must be presented again at exchange time.
#[derive(Clone, Debug)]
pub struct AuthorizationSession {
    pub auth_url: String,
    pub verifier: String,
    pub state: String,
    /// Unix milliseconds.
    pub created_at: i64,
}

#[derive(Clone, Copy, Debug)]
pub struct ExchangeRequest<'a> {
    /// What the user pasted, `code#state`.
    pub raw_code: &'a str,
    pub verifier: &'a str,
    pub expected_state: &'a str,
}

/// The two external halves of a PKCE authorization.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn create_session(&self) -> AuthorizationSession;

    async fn exchange_code(&self, request: ExchangeRequest<'_>) -> Result<OAuthCredentials, AuthError>;
}

pub struct AnthropicOAuth {
    config: OAuthConfig,
    client: reqwest::Client,
}

impl AnthropicOAuth {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }
}

impl Default for AnthropicOAuth {
    fn default() -> Self {
        Self::new(OAuthConfig::default())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
}

#[async_trait]
impl OAuthProvider for AnthropicOAuth {
    fn create_session(&self) -> AuthorizationSession {
        let pair = generate_pkce();
        let state = generate_state();
        AuthorizationSession {
            auth_url: authorization_url(&self.config, &pair.challenge, &state),
            verifier: pair.verifier,
            state,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    #[tracing::instrument(skip_all)]
    async fn exchange_code(&self, request: ExchangeRequest<'_>) -> Result<OAuthCredentials, AuthError> {
        let (code, state) = parse_authorization_code(request.raw_code, request.expected_state)?;

        let body = serde_json::json!({
            "grant_type": "authorization_code",
            "client_id": self.config.client_id,
            "code": code,
            "state": state,
            "redirect_uri": self.config.redirect_uri,
            "code_verifier": request.verifier,
        });

        let resp = self
            .client
            .post(&self.config.token_url)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::OAuth {
                status,
                message: text,
            });
        }

        let data: TokenResponse = resp.json().await?;
        Ok(OAuthCredentials::new(
            data.access_token,
            data.refresh_token.unwrap_or_default(),
            calculate_expires_at(data.expires_in),
        ))
    }
}

/// Build the authorization URL for browser redirect.
pub fn authorization_url(config: &OAuthConfig, challenge: &str, state: &str) -> String {
    format!(
        "{}?code=true&client_id={}&response_type=code&redirect_uri={}&scope={}&code_challenge={}&code_challenge_method=S256&state={}",
        config.auth_url,
        urlencoded(&config.client_id),
        urlencoded(&config.redirect_uri),
        urlencoded(&config.scopes.join(" ")),
        challenge,
        state,
    )
}

/// Split a pasted `code#state`. A missing state falls back to the expected
/// one; a different state is rejected.
pub fn parse_authorization_code<'a>(
    raw: &'a str,
    expected_state: &'a str,
) -> Result<(&'a str, &'a str), AuthError> {
    let raw = raw.trim();
    let (code, state) = match raw.split_once('#') {
        Some((code, state)) => (code.trim(), state.trim()),
        None => (raw, ""),
    };

    if code.is_empty() {
        return Err(AuthError::InvalidCode("empty code".into()));
    }
    if state.is_empty() {
        return Ok((code, expected_state));
    }
    if state != expected_state {
        return Err(AuthError::StateMismatch);
    }
    Ok((code, state))
}

/// Absolute expiry in unix milliseconds.
pub fn calculate_expires_at(expires_in_secs: u64) -> i64 {
    let ms = i64::try_from(expires_in_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_add(ms)
}

/// Minimal percent-encoding for URL query parameters.
fn urlencoded(s: &str) -> String {
    s.replace('%', "%25")
        .replace(' ', "%20")
        .replace('&', "%26")
        .replace('=', "%3D")
        .replace('+', "%2B")
        .replace('?', "%3F")
        .replace('#', "%23")
        .replace('/', "%2F")
        .replace(':', "%3A")
}
