use secrecy::{ExposeSecret, SecretString};

/// OAuth credentials with secrecy protection.
#[derive(Clone)]
pub struct OAuthCredentials {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Unix timestamp in milliseconds when access_token expires.
    pub expires_at: i64,
}

impl OAuthCredentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>, expires_at: i64) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
            expires_at,
        }
    }

    /// True when the access token is non-empty.
    pub fn has_access_token(&self) -> bool {
        !self.access_token.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct AnthropicOAuthConfig {
    pub auth_url: &'static str,
    pub token_url: &'static str,
    pub redirect_uri: &'static str,
    pub client_id: &'static str,
    pub scopes: &'static [&'static str],
    pub oauth_beta_header: &'static str,
    /// How long a started authorization may wait for its code.
    pub session_ttl_secs: u64,
}

pub const ANTHROPIC_OAUTH: AnthropicOAuthConfig = AnthropicOAuthConfig {
    auth_url: "https://claude.ai/oauth/authorize",
    token_url: "https://console.anthropic.com/v1/oauth/token",
    redirect_uri: "https://console.anthropic.com/oauth/code/callback",
    client_id: "9d1c250a-e61b-44d9-88ed-5944d1962f5e",
    scopes: &["org:create_api_key", "user:profile", "user:inference"],
    oauth_beta_header: "oauth-2025-04-20",
    session_ttl_secs: 10 * 60,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacted() {
        let creds = OAuthCredentials::new("access-secret", "refresh-secret", 1_700_000_000_000);
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("access-secret"), "token leaked: {debug}");
        assert!(!debug.contains("refresh-secret"), "token leaked: {debug}");
        assert!(debug.contains("1700000000000"));
    }

    #[test]
    fn empty_access_token_detected() {
        assert!(!OAuthCredentials::new("", "r", 0).has_access_token());
        assert!(OAuthCredentials::new("a", "", 0).has_access_token());
    }

    #[test]
    fn session_ttl_is_ten_minutes() {
        assert_eq!(ANTHROPIC_OAUTH.session_ttl_secs, 600);
        assert_eq!(ANTHROPIC_OAUTH.scopes.len(), 3);
    }
}
