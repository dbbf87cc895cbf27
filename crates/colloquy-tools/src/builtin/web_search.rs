use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use colloquy_core::error::{ColloquyError, Result};
use colloquy_core::traits::Searcher;

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

/// Tavily web search. Each result becomes a `<Document>` block citing its URL.
pub struct TavilySearch {
    api_key: String,
    max_results: u32,
    http: reqwest::Client,
}

impl TavilySearch {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            max_results: 4,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }
}

#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize, Debug)]
struct SearchHit {
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

fn format_results(body: &str) -> Result<String> {
    let parsed: SearchResponse =
        serde_json::from_str(body).map_err(|e| ColloquyError::Search(e.to_string()))?;
    if parsed.results.is_empty() {
        return Ok("No results found.".into());
    }
    Ok(parsed
        .results
        .iter()
        .map(|hit| format!("<Document href=\"{}\"/>\n{}\n</Document>", hit.url, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n"))
}

impl Searcher for TavilySearch {
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let resp = self
                .http
                .post(TAVILY_SEARCH_URL)
                .json(&json!({
                    "api_key": self.api_key,
                    "query": query,
                    "max_results": self.max_results,
                }))
                .send()
                .await
                .map_err(|e| ColloquyError::Search(e.to_string()))?;

            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| ColloquyError::Search(e.to_string()))?;
            if !status.is_success() {
                return Err(ColloquyError::Search(format!("HTTP {}: {}", status, body)));
            }

            debug!(query, bytes = body.len(), "Web search completed");
            format_results(&body)
        })
    }
}
