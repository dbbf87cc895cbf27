use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use colloquy_core::config::{ModelConfig, RetryConfig};
use colloquy_core::error::{ColloquyError, Result};
use colloquy_core::traits::LlmClient;
use colloquy_core::types::ChatMessage;

/// Wraps a primary client with bounded retries, then tries fallback models
/// in order. Retries only ever repeat a single chat request.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    policy: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        policy: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            policy,
        }
    }

    async fn chat_primary(&self, config: &ModelConfig, messages: &[ChatMessage]) -> Result<String> {
        let mut attempt = 0;
        loop {
            let err = match self.primary.chat(config, messages.to_vec()).await {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };
            if attempt >= self.policy.max_retries || !is_transient(&err) {
                return Err(err);
            }

            let delay = backoff_delay(attempt, &self.policy);
            attempt += 1;
            warn!(
                model = %config.model_id,
                attempt,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient LLM failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn chat_fallbacks(&self, messages: &[ChatMessage]) -> Option<String> {
        for (config, client) in &self.fallbacks {
            match client.chat(config, messages.to_vec()).await {
                Ok(text) => {
                    info!(model = %config.model_id, provider = %config.provider, "Answered by fallback model");
                    return Some(text);
                }
                Err(e) => warn!(model = %config.model_id, error = %e, "Fallback model failed"),
            }
        }
        None
    }
}

/// Rate limits, request timeouts, 5xx, and unreachable hosts. Other 4xx
/// responses are permanent.
fn is_transient(e: &ColloquyError) -> bool {
    match e {
        ColloquyError::LlmHttp { status, .. } => matches!(*status, 408 | 429 | 500..=599),
        ColloquyError::LlmUnavailable(_) => true,
        _ => false,
    }
}

/// `initial * 2^attempt`, capped at `max_backoff_ms`, scaled by 0.8 to 1.2.
fn backoff_delay(attempt: u32, policy: &RetryConfig) -> Duration {
    let base = 2u64
        .checked_pow(attempt)
        .map_or(u64::MAX, |factor| policy.initial_backoff_ms.saturating_mul(factor))
        .min(policy.max_backoff_ms);
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((base as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();

        Box::pin(async move {
            let primary_err = match self.chat_primary(&config, &messages).await {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };
            if self.fallbacks.is_empty() {
                return Err(primary_err);
            }

            info!(model = %config.model_id, error = %primary_err, "Primary model gave up, trying fallbacks");
            self.chat_fallbacks(&messages).await.ok_or(primary_err)
        })
    }
}
