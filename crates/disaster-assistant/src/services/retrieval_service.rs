use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::services::embedding_service::EmbeddingService;
use crate::services::providers::{RetrievalProvider, RetrievedPassage};
use crate::utils::error::CapabilityError;
use crate::utils::limiters::Limiters;

/// Document retrieval over a Chroma collection of disaster-management PDFs.
#[derive(Clone)]
pub struct ChromaRetriever {
    client: Client,
    config: RetrievalConfig,
    embedder: EmbeddingService,
    limiters: Limiters,
}

impl ChromaRetriever {
    pub fn new(config: RetrievalConfig, embedder: EmbeddingService, limiters: Limiters) -> Self {
        info!(
            "Retrieval enabled: chroma={}, collection={}",
            config.chroma_url, config.collection_id
        );
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
            embedder,
            limiters,
        }
    }

    async fn query_collection(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>, CapabilityError> {
        let embedding = self.embedder.embed(query).await?;

        let url = format!(
            "{}/api/v1/collections/{}/query",
            self.config.chroma_url.trim_end_matches('/'),
            self.config.collection_id
        );
        let response = self
            .client
            .post(url)
            .json(&json!({
                "query_embeddings": [embedding],
                "n_results": k,
                "include": ["documents", "metadatas", "distances"],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Status { status, body });
        }

        let value: Value = response.json().await?;
        let passages = parse_query_response(&value)?;
        debug!("Retrieved {} passages for query", passages.len());
        Ok(passages)
    }
}

#[async_trait]
impl RetrievalProvider for ChromaRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>, CapabilityError> {
        let call_timeout = Duration::from_secs(self.config.timeout_seconds.max(1));
        self.limiters
            .run(
                &self.limiters.retrieval,
                "retrieval",
                call_timeout,
                self.query_collection(query, k.max(1)),
            )
            .await
    }
}

/// Flatten a Chroma query result (one query embedding) into passages.
/// Distances become scores in (0, 1], higher is closer.
pub fn parse_query_response(value: &Value) -> Result<Vec<RetrievedPassage>, CapabilityError> {
    let first_row = |key: &str| value.get(key).and_then(|rows| rows.get(0)).and_then(Value::as_array);

    let Some(documents) = first_row("documents") else {
        return if value.get("documents").is_some() {
            Ok(Vec::new())
        } else {
            Err(CapabilityError::Parse("Chroma response has no documents".to_string()))
        };
    };
    let metadatas = first_row("metadatas");
    let distances = first_row("distances");

    let passages = documents
        .iter()
        .enumerate()
        .filter_map(|(i, doc)| {
            let content = doc.as_str()?.to_string();
            let meta = metadatas.and_then(|m| m.get(i));
            let source = meta
                .and_then(|m| m.get("filename"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string();
            let page = meta
                .and_then(|m| m.get("page_number"))
                .and_then(|p| p.as_u64().or_else(|| p.as_str().and_then(|s| s.parse().ok())))
                .map(|p| p as u32);
            let distance = distances
                .and_then(|d| d.get(i))
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                .max(0.0);

            Some(RetrievedPassage {
                content,
                source,
                page,
                score: (1.0 / (1.0 + distance)) as f32,
            })
        })
        .collect();

    Ok(passages)
}
