use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::models::chat::ChatMessage;
use crate::services::providers::GenerationProvider;
use crate::utils::error::CapabilityError;
use crate::utils::limiters::Limiters;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client (Groq by default).
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
    limiters: Limiters,
}

impl LlmService {
    pub fn new(config: LlmConfig, limiters: Limiters) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
            limiters,
        }
    }

    /// Generate completion without streaming (wait for full response)
    pub async fn generate_chat(&self, messages: &[ChatMessage]) -> Result<String, CapabilityError> {
        debug!("Starting chat generation with {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url.trim_end_matches('/')))
            .json(&request);
        if !self.config.api_key.trim().is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Status { status, body });
        }

        let chat_response: ChatCompletionResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CapabilityError::Parse("No choices returned from LLM".to_string()))
    }
}

#[async_trait]
impl GenerationProvider for LlmService {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, CapabilityError> {
        let call_timeout = Duration::from_secs(self.config.timeout_seconds.max(1));
        self.limiters
            .run(
                &self.limiters.generation,
                "generation",
                call_timeout,
                self.generate_chat(messages),
            )
            .await
    }
}
