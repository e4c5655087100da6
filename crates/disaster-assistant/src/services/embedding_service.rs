use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::utils::error::CapabilityError;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

/// Query embedding for document retrieval (OpenAI-compatible `/embeddings`).
#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    config: EmbeddingConfig,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        if self.config.api_key.trim().is_empty() {
            return Err(CapabilityError::MissingCredential("embedding"));
        }
        debug!("Generating embedding for {} chars", text.len());

        let response = self
            .client
            .post(format!("{}/embeddings", self.config.base_url.trim_end_matches('/')))
            .bearer_auth(&self.config.api_key)
            .json(&EmbeddingRequest {
                model: &self.config.model,
                input: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Status { status, body });
        }

        let json_value: Value = response.json().await?;
        parse_embedding(&json_value)
    }
}

/// Accepts `{"data":[{"embedding":[..]}]}`, `{"embedding":[..]}`,
/// `[{"embedding":[..]}]` or a bare `[..]`.
pub fn parse_embedding(value: &Value) -> Result<Vec<f32>, CapabilityError> {
    let vector = value
        .get("data")
        .and_then(|d| d.get(0))
        .and_then(|first| first.get("embedding"))
        .or_else(|| value.get("embedding"))
        .or_else(|| value.get(0).and_then(|first| first.get("embedding")))
        .or_else(|| value.is_array().then_some(value))
        .and_then(Value::as_array)
        .ok_or_else(|| CapabilityError::Parse(format!("Unrecognized embedding response: {}", value)))?;

    let embedding: Vec<f32> = vector
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect();

    if embedding.is_empty() {
        return Err(CapabilityError::Parse("Empty embedding returned".to_string()));
    }
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_openai_data_shape() {
        let value = json!({"data": [{"embedding": [0.1, 0.2, 0.3]}]});
        assert_eq!(parse_embedding(&value).unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_parse_llama_cpp_shapes() {
        assert_eq!(parse_embedding(&json!({"embedding": [1.0, 2.0]})).unwrap(), vec![1.0, 2.0]);
        assert_eq!(parse_embedding(&json!([{"embedding": [3.0]}])).unwrap(), vec![3.0]);
        assert_eq!(parse_embedding(&json!([4.0, 5.0])).unwrap(), vec![4.0, 5.0]);
    }

    #[test]
    fn test_parse_rejects_unknown_or_empty() {
        assert!(matches!(parse_embedding(&json!({"vector": [1.0]})), Err(CapabilityError::Parse(_))));
        assert!(matches!(parse_embedding(&json!({"embedding": []})), Err(CapabilityError::Parse(_))));
    }
}
