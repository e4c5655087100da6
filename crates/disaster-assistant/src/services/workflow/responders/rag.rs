use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{preview, Responder, ResponderOutput};
use crate::models::chat::ChatMessage;
use crate::services::providers::{GenerationProvider, RetrievalProvider, RetrievedPassage};

pub const NOT_IN_DOCUMENTS: &str = "Information not present in retrieved documents";
pub const RETRIEVAL_FAILED: &str = "RAG Tool failed to retrieve relevant information.";

const RAG_INSTRUCTION: &str = "You answer ONLY using the given context.\n\
Do NOT hallucinate. Cite filenames/pages.\n\
If answer not found → respond: 'Information not present in retrieved documents'.";

/// Answers from the disaster-management document collection only.
pub struct RagResponder {
    retrieval: Option<Arc<dyn RetrievalProvider>>,
    generator: Arc<dyn GenerationProvider>,
    top_k: usize,
}

impl RagResponder {
    pub fn new(
        retrieval: Option<Arc<dyn RetrievalProvider>>,
        generator: Arc<dyn GenerationProvider>,
        top_k: usize,
    ) -> Self {
        Self {
            retrieval,
            generator,
            top_k: top_k.max(1),
        }
    }
}

#[async_trait]
impl Responder for RagResponder {
    async fn respond(&self, query: &str) -> ResponderOutput {
        let Some(retrieval) = &self.retrieval else {
            warn!("RAG route reached but retrieval is not configured");
            return ResponderOutput::text(RETRIEVAL_FAILED);
        };

        let passages = match retrieval.retrieve(query, self.top_k).await {
            Ok(passages) => passages,
            Err(e) => {
                warn!("Retrieval failed: {}", e);
                return ResponderOutput::text(RETRIEVAL_FAILED);
            }
        };
        if passages.is_empty() {
            debug!("Retrieval returned no passages");
            return ResponderOutput::text(NOT_IN_DOCUMENTS);
        }

        let context = format_passages(&passages);
        let messages = [
            ChatMessage::system(RAG_INSTRUCTION),
            ChatMessage::user(format!("Context:\n{}\n\nQuestion:\n{}", context, query)),
        ];

        let answer = match self.generator.generate(&messages).await {
            Ok(answer) => answer.trim().to_string(),
            Err(e) => format!("LLM error: {}", e),
        };
        ResponderOutput::with_context(answer, preview(&context, 500))
    }
}

pub fn format_passages(passages: &[RetrievedPassage]) -> String {
    let rule = "=".repeat(60);
    let mut out = vec![rule.clone(), "RETRIEVED DOCUMENTS".to_string(), rule];

    for (i, passage) in passages.iter().enumerate() {
        let page = passage
            .page
            .map(|p| p.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        out.push(format!(
            "\n--- Document {} ---\nSource: {} (Page: {})\nRelevance: {:.3}\n{}\n{}\n",
            i + 1,
            passage.source,
            page,
            passage.score,
            "-".repeat(60),
            passage.content
        ));
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::{MockGenerationProvider, MockRetrievalProvider};
    use crate::utils::error::CapabilityError;

    fn passage() -> RetrievedPassage {
        RetrievedPassage {
            content: "Cyclone Fani damaged over 5 lakh houses.".into(),
            source: "fani_report.pdf".into(),
            page: Some(12),
            score: 0.8,
        }
    }

    #[test]
    fn test_format_passages_cites_source() {
        let text = format_passages(&[passage()]);
        assert!(text.contains("--- Document 1 ---"));
        assert!(text.contains("Source: fani_report.pdf (Page: 12)"));
        assert!(text.contains("Relevance: 0.800"));
    }

    #[tokio::test]
    async fn test_answers_from_context() {
        let mut retrieval = MockRetrievalProvider::new();
        retrieval
            .expect_retrieve()
            .withf(|_, k| *k == 5)
            .times(1)
            .returning(|_, _| Ok(vec![passage()]));
        let mut generator = MockGenerationProvider::new();
        generator
            .expect_generate()
            .withf(|messages| {
                messages[0].content.contains("ONLY using the given context")
                    && messages[1].content.contains("fani_report.pdf")
            })
            .returning(|_| Ok("Over 5 lakh houses were damaged (fani_report.pdf, p.12).".into()));
        let responder = RagResponder::new(Some(Arc::new(retrieval)), Arc::new(generator), 5);

        let output = responder.respond("what was the damage from cyclone fani").await;
        assert_eq!(output.text, "Over 5 lakh houses were damaged (fani_report.pdf, p.12).");
        assert!(output.raw_context.is_some());
    }

    #[tokio::test]
    async fn test_retrieval_failure_uses_no_context() {
        let mut retrieval = MockRetrievalProvider::new();
        retrieval
            .expect_retrieve()
            .returning(|_, _| Err(CapabilityError::Transport("chroma down".into())));
        let mut generator = MockGenerationProvider::new();
        generator.expect_generate().times(0);
        let responder = RagResponder::new(Some(Arc::new(retrieval)), Arc::new(generator), 5);

        let output = responder.respond("fani impact").await;
        assert_eq!(output.text, RETRIEVAL_FAILED);
        assert_eq!(output.raw_context, None);
    }

    #[tokio::test]
    async fn test_unconfigured_and_empty_retrieval() {
        let responder = RagResponder::new(None, Arc::new(MockGenerationProvider::new()), 5);
        assert_eq!(responder.respond("fani").await.text, RETRIEVAL_FAILED);

        let mut retrieval = MockRetrievalProvider::new();
        retrieval.expect_retrieve().returning(|_, _| Ok(Vec::new()));
        let responder = RagResponder::new(Some(Arc::new(retrieval)), Arc::new(MockGenerationProvider::new()), 5);
        assert_eq!(responder.respond("fani").await.text, NOT_IN_DOCUMENTS);
    }
}
