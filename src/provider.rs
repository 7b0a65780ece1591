//! Shared plumbing for the OpenAI-compatible provider.
//!
//! Both the chat orchestrator and the embedder go through the same client,
//! the same bounded-backoff retry policy, and the same error
//! classification: authentication and request-shape problems become fatal
//! [`EngineError::Configuration`] errors, everything else is
//! [`EngineError::ProviderUnavailable`] and eligible for retry.

use async_openai::{Client, config::OpenAIConfig, error::OpenAIError};
use std::{future::Future, time::Duration};
use tracing::{debug, warn};

use crate::config::GuichetConfig;
use crate::error::{EngineError, Result};

/// Base delay of the retry backoff, doubled per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Creates a new OpenAI API client from configuration.
pub fn create_client(config: &GuichetConfig) -> Client<OpenAIConfig> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.api_key.clone())
        .with_api_base(config.api_base.clone());
    debug!("provider client created for {}", config.api_base);
    Client::with_config(openai_config)
}

/// Map a provider error onto the engine taxonomy.
///
/// API errors flagged as authentication problems are configuration errors
/// (fatal, no retry); everything else from the wire is treated as
/// transient.
pub fn classify_error(err: OpenAIError) -> EngineError {
    match err {
        OpenAIError::ApiError(api) => {
            let kind = api.r#type.clone().unwrap_or_default();
            let auth_problem = kind == "authentication_error"
                || kind == "invalid_api_key"
                || api.message.to_lowercase().contains("api key");
            if auth_problem {
                EngineError::Configuration(format!("provider rejected credential: {}", api.message))
            } else {
                EngineError::ProviderUnavailable(api.message)
            }
        }
        OpenAIError::InvalidArgument(message) => EngineError::Configuration(message),
        other => EngineError::ProviderUnavailable(other.to_string()),
    }
}

/// Bounded exponential backoff for transient provider failures.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: base_delay.max(Duration::from_millis(1)),
        }
    }

    pub fn from_config(config: &GuichetConfig) -> Self {
        Self::new(config.provider_max_attempts, RETRY_BASE_DELAY)
    }

    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Run `call` until it succeeds, a non-transient error surfaces, or the
/// attempt ceiling is hit.
///
/// Only [`EngineError::ProviderUnavailable`] is retried; configuration and
/// business errors return immediately.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, what: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err @ EngineError::ProviderUnavailable(_)) if attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!("{what} attempt {attempt} failed: {err}; retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Await `future` within `deadline`, classifying both outcomes.
///
/// An elapsed deadline aborts the outbound call and surfaces as a
/// transient [`EngineError::ProviderUnavailable`].
pub async fn within_deadline<T, Fut>(deadline: Duration, what: &str, future: Fut) -> Result<T>
where
    Fut: Future<Output = std::result::Result<T, OpenAIError>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result.map_err(classify_error),
        Err(_) => Err(EngineError::ProviderUnavailable(format!(
            "{what} timed out after {deadline:?}"
        ))),
    }
}
