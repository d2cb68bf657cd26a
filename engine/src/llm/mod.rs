//! LLM client abstraction layer
//!
//! Defines the contract between the orchestration core and the hosted
//! language model. The core only ever sees raw text back from `complete`;
//! turning that text into a reply or an action is the parser's job, so that
//! the strict safety boundary lives in exactly one place.
//!
//! Retries and backoff for transient upstream failures live here, in the
//! `RetryingClient` decorator, not in the orchestrator.

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::memory::Turn;

pub mod openai;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Timeout")]
    Timeout,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl LLMError {
    /// Whether a retry with backoff can plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LLMError::RateLimited | LLMError::Timeout | LLMError::Upstream(_) | LLMError::Network(_)
        )
    }
}

/// Client for a hosted language model
///
/// `complete` sends the ordered conversation (system preamble first) and
/// returns the model's raw text.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Returns the name of the backing provider (e.g., "openai")
    fn name(&self) -> &str;

    /// Generate a completion for the given conversation
    async fn complete(&self, turns: &[Turn]) -> Result<String>;
}

/// Retry budget for transient upstream failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the first retry; doubles per attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Decorator that retries transient failures with exponential backoff
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: LLMClient> RetryingClient<C> {
    /// Wrap a client with the given retry policy
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<C: LLMClient> LLMClient for RetryingClient<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, turns: &[Turn]) -> Result<String> {
        let mut delay = self.policy.base_delay;
        let mut attempt = 1;

        loop {
            match self.inner.complete(turns).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    warn!(
                        "LLM call attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.policy.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
