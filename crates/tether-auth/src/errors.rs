//! Auth error types.

/// Errors that can occur during the authorization handshake.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// `complete` was called without a pending authorization.
    #[error("no active authorization session; start auth again")]
    NoActiveSession,

    /// The pending authorization outlived its TTL.
    #[error("authorization session expired; start auth again and paste a fresh code")]
    SessionExpired,

    /// The pasted code carried a state that does not match the pending session.
    #[error("authorization state mismatch")]
    StateMismatch,

    /// The pasted code was empty or malformed.
    #[error("invalid authorization code: {0}")]
    InvalidCode(String),

    /// Token endpoint rejected the exchange.
    #[error("OAuth error ({status}): {message}")]
    OAuth {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// True for failures of the code exchange itself, as opposed to misuse
    /// of the flow.
    pub fn is_exchange_failure(&self) -> bool {
        matches!(
            self,
            Self::StateMismatch | Self::InvalidCode(_) | Self::OAuth { .. } | Self::Http(_) | Self::Json(_)
        )
    }
}
