use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::SearchConfig;
use crate::services::providers::{SearchHit, SearchProvider};
use crate::utils::error::CapabilityError;
use crate::utils::limiters::Limiters;

/// Google search through the Serper API.
#[derive(Clone)]
pub struct SerperSearch {
    client: Client,
    config: SearchConfig,
    limiters: Limiters,
}

impl SerperSearch {
    pub fn new(config: SearchConfig, limiters: Limiters) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
            limiters,
        }
    }

    async fn search_organic(&self, query: &str) -> Result<Vec<SearchHit>, CapabilityError> {
        if !self.config.enabled {
            return Err(CapabilityError::NotConfigured("web search"));
        }
        if self.config.api_key.trim().is_empty() {
            return Err(CapabilityError::MissingCredential("SERPER_API_KEY"));
        }
        debug!("Searching web for: {}", query);

        let response = self
            .client
            .post(&self.config.base_url)
            .header("X-API-KEY", &self.config.api_key)
            .json(&json!({ "q": query, "num": self.config.num_results }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Status { status, body });
        }

        let value: Value = response.json().await?;
        Ok(parse_organic(&value))
    }
}

#[async_trait]
impl SearchProvider for SerperSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, CapabilityError> {
        let call_timeout = Duration::from_secs(self.config.timeout_seconds.max(1));
        self.limiters
            .run(&self.limiters.search, "search", call_timeout, self.search_organic(query))
            .await
    }
}

/// Organic results of a Serper response, with placeholders for missing fields.
pub fn parse_organic(value: &Value) -> Vec<SearchHit> {
    let field = |item: &Value, key: &str, fallback: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string()
    };

    value
        .get("organic")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| SearchHit {
                    title: field(item, "title", "No title"),
                    snippet: field(item, "snippet", "No description available"),
                    url: field(item, "link", "No URL found"),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::LimitsConfig;

    #[test]
    fn test_parse_organic_fills_missing_fields() {
        let value = json!({
            "searchParameters": {"q": "odisha cyclone"},
            "organic": [
                {"title": "IMD warning", "snippet": "Deep depression", "link": "https://mausam.imd.gov.in"},
                {"title": "No snippet here"}
            ]
        });

        let hits = parse_organic(&value);

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://mausam.imd.gov.in");
        assert_eq!(hits[1].snippet, "No description available");
        assert_eq!(hits[1].url, "No URL found");
    }

    #[test]
    fn test_parse_without_organic_is_empty() {
        assert!(parse_organic(&json!({"knowledgeGraph": {}})).is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let search = SerperSearch::new(SearchConfig::default(), Limiters::new(&LimitsConfig::default()));

        let err = search.search("latest news").await.unwrap_err();
        assert!(matches!(err, CapabilityError::MissingCredential(_)));
    }
}
