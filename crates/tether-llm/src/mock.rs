use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::SecretString;

use tether_core::errors::GatewayError;
use tether_core::provider::{MessageRequest, MessageResponse, Summarizer};

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    Reply(MessageResponse),
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self::Reply(MessageResponse::text(text))
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Summarizer that returns queued responses in order and records requests.
pub struct MockSummarizer {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<MessageRequest>>,
    call_count: AtomicUsize,
}

impl MockSummarizer {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<MessageRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_message(
        &self,
        _auth_token: &SecretString,
        request: &MessageRequest,
    ) -> Result<MessageResponse, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let Some(mut current) = self.responses.lock().pop_front() else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockSummarizer: no response configured for call {idx}"
            )));
        };

        loop {
            match current {
                MockResponse::Reply(resp) => return Ok(resp),
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}
