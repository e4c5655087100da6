use async_trait::async_trait;
use std::sync::Arc;

use super::{Responder, ResponderOutput};
use crate::models::chat::ChatMessage;
use crate::services::providers::GenerationProvider;

const PERSONA: &str = "You are a helpful assistant for Odisha disaster management. \
Provide clear, concise, and accurate information. \
If you don't know something, admit it honestly. \
For time-sensitive data (weather, news), suggest the user \
ask more specifically so the system can use real-time tools.";

pub struct GeneralResponder {
    generator: Arc<dyn GenerationProvider>,
}

impl GeneralResponder {
    pub fn new(generator: Arc<dyn GenerationProvider>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Responder for GeneralResponder {
    async fn respond(&self, query: &str) -> ResponderOutput {
        if query.trim().is_empty() {
            return ResponderOutput::text("I didn't receive a query. Please ask me something!");
        }

        let messages = [ChatMessage::system(PERSONA), ChatMessage::user(query)];
        match self.generator.generate(&messages).await {
            Ok(answer) => ResponderOutput::text(answer.trim()),
            Err(e) => ResponderOutput::text(format!(
                "I encountered an error processing your request: {}",
                e
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::MockGenerationProvider;
    use crate::utils::error::CapabilityError;

    #[tokio::test]
    async fn test_persona_is_sent() {
        let mut generator = MockGenerationProvider::new();
        generator
            .expect_generate()
            .withf(|messages| messages[0].role == "system" && messages[0].content.contains("Odisha disaster management"))
            .returning(|_| Ok(" Hello! ".into()));
        let responder = GeneralResponder::new(Arc::new(generator));

        assert_eq!(responder.respond("hi").await.text, "Hello!");
    }

    #[tokio::test]
    async fn test_generation_error_is_labelled() {
        let mut generator = MockGenerationProvider::new();
        generator
            .expect_generate()
            .returning(|_| Err(CapabilityError::Unavailable("generation")));
        let responder = GeneralResponder::new(Arc::new(generator));

        assert_eq!(
            responder.respond("hi").await.text,
            "I encountered an error processing your request: generation is busy, try again later"
        );
    }
}
