//! Tavily web search
//!
//! `WebSearch` over the Tavily search API. Results keep the provider's
//! rank order; the retrieval gateway derives scores from that rank.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use udaplay_core::{
    error::{AgentError, Result},
    retrieval::{SearchSnippet, WebSearch},
};

/// Tavily API endpoint
pub const TAVILY_API_URL: &str = "https://api.tavily.com/search";

/// Hard cap the API accepts per request
const SEARCH_RESULTS_MAX: usize = 10;

#[derive(Clone, Debug)]
pub struct TavilyConfig {
    pub api_key: String,
    pub endpoint: String,
    /// "basic" or "advanced"
    pub search_depth: String,
    pub timeout: Duration,
}

impl TavilyConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: TAVILY_API_URL.into(),
            search_depth: "advanced".into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Read `TAVILY_API_KEY`; a missing key means web search is disabled
    pub fn from_env() -> Option<Self> {
        std::env::var("TAVILY_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(Self::new)
    }
}

#[derive(Debug, Serialize)]
struct TavilySearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
}

#[derive(Debug, Deserialize)]
struct TavilySearchResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

/// Tavily-backed web search
pub struct TavilySearch {
    client: reqwest::Client,
    config: TavilyConfig,
}

impl TavilySearch {
    pub fn new(config: TavilyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn parse_response(body: &str) -> Result<Vec<SearchSnippet>> {
        let response: TavilySearchResponse = serde_json::from_str(body)
            .map_err(|e| AgentError::WebSearch(format!("unexpected Tavily response: {e}")))?;
        Ok(response
            .results
            .into_iter()
            .map(|r| SearchSnippet {
                title: r.title,
                url: r.url,
                content: r.content,
            })
            .collect())
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchSnippet>> {
        let request = TavilySearchRequest {
            api_key: &self.config.api_key,
            query,
            max_results: max_results.clamp(1, SEARCH_RESULTS_MAX),
            search_depth: &self.config.search_depth,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::WebSearch(format!("request timed out after {}s", self.config.timeout.as_secs()))
                } else {
                    AgentError::WebSearch(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::WebSearch(format!("failed to read response: {e}")))?;
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => AgentError::WebSearch("authentication failed; check TAVILY_API_KEY".into()),
                429 => AgentError::RateLimited("Tavily rate limit exceeded".into()),
                _ => AgentError::WebSearch(format!("Tavily returned {status}")),
            });
        }

        let snippets = Self::parse_response(&body)?;
        tracing::debug!(query, results = snippets.len(), "web search complete");
        Ok(snippets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_rank_order() {
        let body = r#"{
            "query": "pokemon gold release",
            "answer": "1999",
            "results": [
                {"title": "Pokemon Gold", "url": "https://a.example", "content": "Released 1999", "score": 0.9},
                {"title": "Pokemon Silver", "url": "https://b.example", "content": "Also 1999", "score": 0.95}
            ]
        }"#;
        let snippets = TavilySearch::parse_response(body).unwrap();
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].url, "https://a.example");
        assert_eq!(snippets[1].title, "Pokemon Silver");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            TavilySearch::parse_response("<html>"),
            Err(AgentError::WebSearch(_))
        ));
    }

    #[test]
    fn test_request_shape() {
        let request = TavilySearchRequest {
            api_key: "key",
            query: "doom",
            max_results: 3,
            search_depth: "advanced",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["max_results"], 3);
        assert_eq!(json["search_depth"], "advanced");
    }
}
