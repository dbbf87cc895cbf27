pub mod prompts;
pub mod providers;
pub mod researcher;
pub mod retry;

use std::sync::Arc;

use colloquy_core::config::{AppConfig, ModelConfig};
use colloquy_core::traits::LlmClient;

pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use researcher::LlmResearcher;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    match config.provider.as_str() {
        "anthropic" | "claude" => Box::new(AnthropicClient::new()),
        // Everything else speaks the OpenAI chat completions protocol
        _ => Box::new(OpenAiClient::new()),
    }
}

/// Build the primary client, wrapped with retry and fallbacks when configured.
pub fn client_from_config(config: &AppConfig) -> Arc<dyn LlmClient> {
    let primary = create_client(&config.model);
    if config.fallback_models.is_empty() && config.model.retry.is_none() {
        return Arc::from(primary);
    }

    let retry_config = config.model.retry.clone().unwrap_or_default();
    let fallbacks = config
        .fallback_models
        .iter()
        .map(|mc| (mc.clone(), create_client(mc)))
        .collect();
    Arc::new(RetryingClient::new(primary, fallbacks, retry_config))
}
