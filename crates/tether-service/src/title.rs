use std::sync::Arc;

use secrecy::SecretString;
use tracing::{debug, info, warn};

use tether_auth::AuthStore;
use tether_core::errors::GatewayError;
use tether_core::messages::{transcript, DigestEntry};
use tether_core::provider::{MessageRequest, RequestMessage, Summarizer};
use tether_llm::AnthropicClient;
use tether_settings::TetherSettings;

use crate::manager::{ManagerError, SessionHost};

pub const UNTITLED: &str = "Untitled Chat";
pub const TITLE_SYSTEM_PROMPT: &str =
    "Generate a concise 2-5 word title for this coding chat. Respond with just the title, nothing else.";
/// Titles are regenerated on the first user message and every tenth after.
pub const TITLE_REFRESH_INTERVAL: usize = 10;
pub const TITLE_MAX_TOKENS: u32 = 30;
const FALLBACK_TITLE_CHARS: usize = 40;

#[derive(Debug, thiserror::Error)]
pub enum TitleError {
    #[error("summarizer failed: {0}")]
    Summarizer(#[from] GatewayError),

    #[error(transparent)]
    Host(#[from] ManagerError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TitleOutcome {
    Skipped,
    /// Derived locally, without a provider call.
    Fallback(String),
    Generated(String),
}

impl TitleOutcome {
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Skipped => None,
            Self::Fallback(t) | Self::Generated(t) => Some(t.as_str()),
        }
    }
}

pub struct TitlePolicy {
    summarizer: Arc<dyn Summarizer>,
    auth: AuthStore,
    model: String,
}

impl TitlePolicy {
    pub fn new(summarizer: Arc<dyn Summarizer>, auth: AuthStore) -> Self {
        Self {
            summarizer,
            auth,
            model: tether_settings::TitleSettings::default().model,
        }
    }

    /// Titles through the Anthropic API configured in `settings`.
    pub fn from_settings(settings: &TetherSettings, auth: AuthStore) -> Result<Self, GatewayError> {
        let client = AnthropicClient::new(settings.llm.base_url.clone())?;
        Ok(Self::new(Arc::new(client), auth).with_model(settings.title.model.clone()))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Whether a digest is due for a (re)title.
    pub fn should_generate(digest: &[DigestEntry]) -> bool {
        let users = digest.iter().filter(|e| e.is_user()).count();
        users == 1 || (users > 0 && users % TITLE_REFRESH_INTERVAL == 0)
    }

    /// First user message, cut to 40 characters and trimmed.
    pub fn fallback_title(digest: &[DigestEntry]) -> String {
        digest
            .iter()
            .find(|e| e.is_user())
            .map(|e| e.text.chars().take(FALLBACK_TITLE_CHARS).collect::<String>())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED.to_string())
    }

    pub async fn generate_title(&self, digest: &[DigestEntry]) -> Result<TitleOutcome, TitleError> {
        let Some(token) = self.auth.access_token() else {
            return Ok(TitleOutcome::Fallback(Self::fallback_title(digest)));
        };
        let title = self.summarize(&token, digest).await?;
        Ok(TitleOutcome::Generated(title))
    }

    async fn summarize(&self, token: &SecretString, digest: &[DigestEntry]) -> Result<String, GatewayError> {
        let request = MessageRequest {
            model: self.model.clone(),
            max_tokens: TITLE_MAX_TOKENS,
            system: TITLE_SYSTEM_PROMPT.to_string(),
            messages: vec![RequestMessage::user(transcript(digest))],
        };
        let response = self.summarizer.create_message(token, &request).await?;

        Ok(response
            .leading_text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNTITLED)
            .to_string())
    }

    /// Read the digest through `host`, decide, and write the title back.
    pub async fn maybe_generate_title(&self, host: &dyn SessionHost) -> Result<TitleOutcome, TitleError> {
        let digest = host.message_digest();
        if digest.is_empty() || !Self::should_generate(&digest) {
            debug!(entries = digest.len(), "title not due");
            return Ok(TitleOutcome::Skipped);
        }

        let outcome = self.generate_title(&digest).await?;
        if let Some(title) = outcome.title() {
            host.post_title(title).await?;
            info!(title, "session titled");
        }
        Ok(outcome)
    }

    /// [`Self::maybe_generate_title`] with failures logged instead of returned.
    pub async fn title_contained(&self, host: &dyn SessionHost) -> TitleOutcome {
        match self.maybe_generate_title(host).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "title generation failed");
                TitleOutcome::Skipped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use tether_core::security::OAuthCredentials;
    use tether_llm::{MockResponse, MockSummarizer};

    use crate::mock::MockSessionHost;

    fn users(n: usize) -> Vec<DigestEntry> {
        (0..n)
            .flat_map(|i| [DigestEntry::user(format!("question {i}")), DigestEntry::assistant("answer")])
            .collect()
    }

    fn authed() -> AuthStore {
        let store = AuthStore::in_memory();
        store.set_credentials(OAuthCredentials::new("sk-ant-oat-test", "r", 1));
        store
    }

    #[test]
    fn cadence() {
        assert!(!TitlePolicy::should_generate(&[]));
        assert!(!TitlePolicy::should_generate(&[DigestEntry::assistant("hi")]));
        assert!(TitlePolicy::should_generate(&users(1)));
        assert!(!TitlePolicy::should_generate(&users(2)));
        assert!(!TitlePolicy::should_generate(&users(9)));
        assert!(TitlePolicy::should_generate(&users(10)));
        assert!(!TitlePolicy::should_generate(&users(11)));
        assert!(TitlePolicy::should_generate(&users(20)));
    }

    #[test]
    fn fallback_truncates_then_trims() {
        let long = format!("{}   tail", "a".repeat(38));
        assert_eq!(TitlePolicy::fallback_title(&[DigestEntry::user(long)]), "a".repeat(38));
        assert_eq!(TitlePolicy::fallback_title(&[DigestEntry::user("  fix it  ")]), "fix it");
        assert_eq!(TitlePolicy::fallback_title(&[DigestEntry::user("   ")]), UNTITLED);
        assert_eq!(TitlePolicy::fallback_title(&[DigestEntry::assistant("hi")]), UNTITLED);
    }

    #[test]
    fn fallback_counts_characters_not_bytes() {
        let text = "é".repeat(50);
        assert_eq!(TitlePolicy::fallback_title(&[DigestEntry::user(text)]).chars().count(), 40);
    }

    #[tokio::test]
    async fn empty_digest_does_nothing() {
        let summarizer = Arc::new(MockSummarizer::new(vec![]));
        let policy = TitlePolicy::new(summarizer.clone(), authed());
        let host = MockSessionHost::new(vec![]);

        assert_eq!(policy.maybe_generate_title(&host).await.unwrap(), TitleOutcome::Skipped);
        assert_eq!(summarizer.call_count(), 0);
        assert!(host.titles().is_empty());
    }

    #[tokio::test]
    async fn no_token_uses_first_user_message() {
        let summarizer = Arc::new(MockSummarizer::new(vec![]));
        let policy = TitlePolicy::new(summarizer.clone(), AuthStore::in_memory());
        let host = MockSessionHost::new(vec![DigestEntry::user("Refactor the parser module for speed and clarity")]);

        let outcome = policy.maybe_generate_title(&host).await.unwrap();
        assert_eq!(outcome, TitleOutcome::Fallback("Refactor the parser module for speed and".into()));
        assert_eq!(host.titles(), vec!["Refactor the parser module for speed and"]);
        assert_eq!(summarizer.call_count(), 0);
    }

    #[tokio::test]
    async fn tenth_user_message_calls_provider_once() {
        let summarizer = Arc::new(MockSummarizer::new(vec![MockResponse::text("  Parser Speedups \n")]));
        let policy = TitlePolicy::new(summarizer.clone(), authed());
        let host = MockSessionHost::new(users(10));

        let outcome = policy.maybe_generate_title(&host).await.unwrap();
        assert_eq!(outcome, TitleOutcome::Generated("Parser Speedups".into()));
        assert_eq!(host.titles(), vec!["Parser Speedups"]);
        assert_eq!(summarizer.call_count(), 1);

        let request = &summarizer.requests()[0];
        assert_eq!(request.model, "claude-haiku-4-5-20251001");
        assert_eq!(request.max_tokens, 30);
        assert_eq!(request.system, TITLE_SYSTEM_PROMPT);
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
        assert!(request.messages[0].content.starts_with("user: question 0\nassistant: answer\n"));
    }

    #[tokio::test]
    async fn ninth_and_eleventh_are_skipped() {
        for n in [9, 11] {
            let summarizer = Arc::new(MockSummarizer::new(vec![MockResponse::text("unused")]));
            let policy = TitlePolicy::new(summarizer.clone(), authed());
            let host = MockSessionHost::new(users(n));

            assert_eq!(policy.maybe_generate_title(&host).await.unwrap(), TitleOutcome::Skipped);
            assert_eq!(summarizer.call_count(), 0, "n = {n}");
        }
    }

    #[tokio::test]
    async fn blank_or_non_text_reply_is_untitled() {
        let summarizer = Arc::new(MockSummarizer::new(vec![
            MockResponse::text("   "),
            MockResponse::Reply(tether_core::provider::MessageResponse {
                content: vec![],
                model: None,
                stop_reason: None,
            }),
        ]));
        let policy = TitlePolicy::new(summarizer, authed());

        for _ in 0..2 {
            let outcome = policy.generate_title(&users(1)).await.unwrap();
            assert_eq!(outcome, TitleOutcome::Generated(UNTITLED.into()));
        }
    }

    #[tokio::test]
    async fn provider_failure_is_contained() {
        let summarizer = Arc::new(MockSummarizer::new(vec![MockResponse::Error(GatewayError::ProviderOverloaded)]));
        let policy = TitlePolicy::new(summarizer, authed());
        let host = MockSessionHost::new(users(1));

        assert!(matches!(
            policy.maybe_generate_title(&host).await,
            Err(TitleError::Summarizer(GatewayError::ProviderOverloaded))
        ));
        assert!(host.titles().is_empty());
    }

    #[tokio::test]
    async fn post_failure_is_logged_not_raised() {
        let policy = TitlePolicy::new(Arc::new(MockSummarizer::new(vec![])), AuthStore::in_memory());
        let host = MockSessionHost::new(users(1)).failing_posts();

        assert_eq!(policy.title_contained(&host).await, TitleOutcome::Skipped);
    }

    #[test]
    fn from_settings_uses_title_section() {
        let mut settings = TetherSettings::default();
        settings.title.model = "claude-test".into();

        let store = authed();
        let policy = TitlePolicy::from_settings(&settings, store).unwrap();
        assert_eq!(policy.model, "claude-test");
        assert_eq!(policy.auth.access_token().unwrap().expose_secret(), "sk-ant-oat-test");
    }
}
