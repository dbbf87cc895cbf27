pub mod builtin;

use std::sync::Arc;

use colloquy_core::config::WebSearchConfig;
use colloquy_core::error::{ColloquyError, Result};
use colloquy_core::traits::Searcher;

pub use builtin::web_search::TavilySearch;

/// Build the configured web search backend.
pub fn create_searcher(config: &WebSearchConfig) -> Result<Arc<dyn Searcher>> {
    match config.provider.as_str() {
        "tavily" => Ok(Arc::new(
            TavilySearch::new(&config.api_key).with_max_results(config.max_results),
        )),
        other => Err(ColloquyError::Config(format!(
            "unknown web_search provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_searcher_rejects_unknown_provider() {
        let config = WebSearchConfig {
            provider: "bing".into(),
            api_key: "k".into(),
            max_results: 3,
        };
        assert!(matches!(create_searcher(&config), Err(ColloquyError::Config(_))));

        let config = WebSearchConfig {
            provider: "tavily".into(),
            ..config
        };
        assert!(create_searcher(&config).is_ok());
    }
}
