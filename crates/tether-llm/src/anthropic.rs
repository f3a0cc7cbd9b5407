use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;

use tether_core::errors::GatewayError;
use tether_core::provider::{MessageRequest, MessageResponse, Summarizer};
use tether_core::security::ANTHROPIC_OAUTH;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Non-streaming Messages API client authenticated with an OAuth bearer token.
pub struct AnthropicClient {
    client: Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

#[async_trait]
impl Summarizer for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    #[instrument(skip_all, fields(model = %request.model))]
    async fn create_message(
        &self,
        auth_token: &SecretString,
        request: &MessageRequest,
    ) -> Result<MessageResponse, GatewayError> {
        let resp = self
            .client
            .post(self.messages_url())
            .header("Authorization", format!("Bearer {}", auth_token.expose_secret()))
            .header("anthropic-beta", ANTHROPIC_OAUTH.oauth_beta_header)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status.as_u16(), body));
        }

        resp.json::<MessageResponse>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}
