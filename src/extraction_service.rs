use chrono::{DateTime, Utc};
use failsafe::backoff;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::Config;
use crate::extraction_schema::ExtractionResult;
use crate::gemini_client::{ExtractionError, GeminiClient, GeminiSettings, ImagePayload};

const MIN_BACKOFF: Duration = Duration::from_secs(1);

/// Bounded retry with exponential backoff between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delays to wait before attempt 2, 3, ...
    ///
    /// The backoff works in whole seconds: shorter values are raised to one
    /// second and `max_backoff` never drops below `initial_backoff`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let initial = self.initial_backoff.max(MIN_BACKOFF);
        let max = self.max_backoff.max(initial);
        backoff::exponential(initial, max)
    }
}

/// Runs extractions against the remote model with retry and a deadline.
#[derive(Debug, Clone)]
pub struct ExtractionService {
    client: GeminiClient,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ExtractionService {
    pub fn new(client: GeminiClient, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            client,
            retry,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ExtractionError> {
        let client = GeminiClient::new(GeminiSettings::from_config(config))?;
        let retry = RetryPolicy {
            max_attempts: config.extraction_max_attempts,
            ..RetryPolicy::default()
        };
        Ok(Self::new(
            client,
            retry,
            Duration::from_secs(config.extraction_timeout_secs),
        ))
    }

    /// Extracts with the configured overall timeout.
    pub async fn extract(
        &self,
        image: &ImagePayload,
        client_id: &str,
        captured_at: DateTime<Utc>,
    ) -> Result<ExtractionResult, ExtractionError> {
        let deadline = Instant::now() + self.timeout;
        self.extract_until(image, client_id, captured_at, deadline)
            .await
    }

    /// Extracts, giving up with `DeadlineExceeded` once `deadline` passes
    /// mid-attempt. When the next backoff would end past the deadline, the
    /// last attempt's error is returned at once.
    ///
    /// Dropping the returned future abandons the in-flight request.
    pub async fn extract_until(
        &self,
        image: &ImagePayload,
        client_id: &str,
        captured_at: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<ExtractionResult, ExtractionError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut delays = self.retry.delays();
        let mut attempt = 1;

        loop {
            let outcome = match tokio::time::timeout_at(
                deadline,
                self.client.extract(image, client_id, captured_at),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(
                        "Extraction for client {} hit its deadline on attempt {}",
                        client_id,
                        attempt
                    );
                    return Err(ExtractionError::DeadlineExceeded);
                }
            };

            let err = match outcome {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!(
                            "Extraction for client {} succeeded on attempt {}",
                            client_id,
                            attempt
                        );
                    }
                    return Ok(result);
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= max_attempts {
                tracing::error!(
                    "Extraction for client {} failed after {} attempt(s): {}",
                    client_id,
                    attempt,
                    err
                );
                return Err(err);
            }

            let delay = delays.next().unwrap_or(self.retry.max_backoff);
            let wake = Instant::now() + delay;
            if wake >= deadline {
                tracing::error!(
                    "Extraction for client {} failed on attempt {}, no time left to retry: {}",
                    client_id,
                    attempt,
                    err
                );
                return Err(err);
            }

            tracing::warn!(
                "Extraction attempt {}/{} for client {} failed ({}), retrying in {:?}",
                attempt,
                max_attempts,
                client_id,
                err,
                delay
            );

            tokio::time::sleep_until(wake).await;
            attempt += 1;
        }
    }
}
