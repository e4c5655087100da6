use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::{Responder, ResponderOutput};
use crate::services::providers::{SearchHit, SearchProvider};
use crate::utils::error::CapabilityError;

/// Live web search, answered with the formatted hits.
pub struct WebSearchResponder {
    search: Arc<dyn SearchProvider>,
}

impl WebSearchResponder {
    pub fn new(search: Arc<dyn SearchProvider>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Responder for WebSearchResponder {
    async fn respond(&self, query: &str) -> ResponderOutput {
        let query = query.trim();
        if query.is_empty() {
            return ResponderOutput::text("Error: No search query provided.");
        }

        match self.search.search(query).await {
            Ok(hits) if hits.is_empty() => ResponderOutput::text("No search results found."),
            Ok(hits) => ResponderOutput::text(format_hits(&hits)),
            Err(e) => {
                warn!("Web search failed: {}", e);
                ResponderOutput::text(search_error_text(&e))
            }
        }
    }
}

pub fn search_error_text(e: &CapabilityError) -> String {
    match e {
        CapabilityError::MissingCredential(_) | CapabilityError::NotConfigured(_) => {
            "Error: SERPER_API_KEY not found. Add it to your environment.".to_string()
        }
        CapabilityError::Status { status, body } => {
            format!("Serper API error: HTTP {} – {}", status, body)
        }
        CapabilityError::Timeout { .. } => "Search error: Request timed out.".to_string(),
        other => format!("Search error: {}", other),
    }
}

/// Numbered "title / snippet / URL" blocks.
pub fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("{}. {}\n   {}\n   URL: {}", i + 1, hit.title, hit.snippet, hit.url))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::MockSearchProvider;

    fn hit(n: u32) -> SearchHit {
        SearchHit {
            title: format!("Title {n}"),
            snippet: format!("Snippet {n}"),
            url: format!("https://example.org/{n}"),
        }
    }

    #[test]
    fn test_format_hits_numbered() {
        let text = format_hits(&[hit(1), hit(2)]);
        assert_eq!(
            text,
            "1. Title 1\n   Snippet 1\n   URL: https://example.org/1\n\n2. Title 2\n   Snippet 2\n   URL: https://example.org/2"
        );
    }

    #[tokio::test]
    async fn test_missing_key_becomes_answer_text() {
        let mut search = MockSearchProvider::new();
        search
            .expect_search()
            .times(1)
            .returning(|_| Err(CapabilityError::MissingCredential("SERPER_API_KEY")));
        let responder = WebSearchResponder::new(Arc::new(search));

        let output = responder.respond("latest cyclone news").await;
        assert!(output.text.starts_with("Error: SERPER_API_KEY not found"));
    }

    #[tokio::test]
    async fn test_blank_query_skips_search() {
        let mut search = MockSearchProvider::new();
        search.expect_search().times(0);
        let responder = WebSearchResponder::new(Arc::new(search));

        assert_eq!(responder.respond("  ").await.text, "Error: No search query provided.");
    }

    #[tokio::test]
    async fn test_empty_results() {
        let mut search = MockSearchProvider::new();
        search.expect_search().returning(|_| Ok(Vec::new()));
        let responder = WebSearchResponder::new(Arc::new(search));

        assert_eq!(responder.respond("news").await.text, "No search results found.");
    }
}
