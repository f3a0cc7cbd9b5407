//! # tether-auth
//!
//! PKCE authorization for the summarization provider:
//! - [`pkce`]: verifier/challenge and state generation
//! - [`anthropic`]: authorize URL, `code#state` parsing, token exchange
//! - [`storage`]: the owned credential slot, optionally persisted to disk
//! - [`flow`]: the single-slot start/cancel/complete handshake

#![deny(unsafe_code)]

pub mod anthropic;
pub mod errors;
pub mod flow;
pub mod pkce;
pub mod storage;

pub use anthropic::{AnthropicOAuth, AuthorizationSession, ExchangeRequest, OAuthConfig, OAuthProvider};
pub use errors::AuthError;
pub use flow::{AuthStatus, OAuthCompletion, OAuthFlow, OAuthStart};
pub use pkce::{generate_pkce, generate_state, PkcePair};
pub use storage::AuthStore;
