use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Waits between consecutive attempts. One initial attempt plus one retry
/// per entry.
pub const DELIVERY_DELAYS: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_millis(1000),
    Duration::from_millis(2000),
];

/// How a delivery ended. Never an error: callers only observe it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: usize },
    Exhausted { attempts: usize },
    Cancelled { attempts: usize },
}

impl DeliveryOutcome {
    pub fn attempts(&self) -> usize {
        match *self {
            Self::Delivered { attempts } | Self::Exhausted { attempts } | Self::Cancelled { attempts } => {
                attempts
            }
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Bounded-retry executor for an idempotent remote write.
///
/// Attempts are strictly sequential. Failures are logged with the attempt
/// number and the write's key; exhaustion is logged and swallowed.
#[derive(Clone, Debug)]
pub struct BackoffMutator {
    delays: Vec<Duration>,
}

impl Default for BackoffMutator {
    fn default() -> Self {
        Self::with_delays(DELIVERY_DELAYS.to_vec())
    }
}

impl BackoffMutator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delays(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Run `write` until it succeeds, the delay table runs out, or `cancel`
    /// fires during a wait.
    pub async fn deliver<F, Fut, E>(&self, key: &str, cancel: &CancellationToken, mut write: F) -> DeliveryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts();
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                info!(key, attempts, "delivery cancelled");
                return DeliveryOutcome::Cancelled { attempts };
            }

            attempts += 1;
            match write().await {
                Ok(()) => {
                    if attempts > 1 {
                        debug!(key, attempts, "delivered after retry");
                    }
                    return DeliveryOutcome::Delivered { attempts };
                }
                Err(e) => {
                    warn!(key, attempt = attempts, error = %e, "Attempt {attempts} failed for {key}");
                }
            }

            let Some(&delay) = self.delays.get(attempts - 1) else {
                break;
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(key, attempts, "delivery cancelled");
                    return DeliveryOutcome::Cancelled { attempts };
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        error!(key, attempts = max_attempts, "all retries exhausted");
        DeliveryOutcome::Exhausted { attempts: max_attempts }
    }
}
