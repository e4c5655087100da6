use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::chat::ChatMessage;
use crate::services::conversation::Turn;
use crate::services::providers::GenerationProvider;

/// Turns a follow-up question into a self-contained one using recent history.
#[derive(Clone)]
pub struct QueryRewriter {
    generator: Arc<dyn GenerationProvider>,
}

impl QueryRewriter {
    pub fn new(generator: Arc<dyn GenerationProvider>) -> Self {
        Self { generator }
    }

    /// Never fails: empty history, a failed call or an empty rewrite all return `query` unchanged.
    pub async fn rewrite(&self, query: &str, history: &[Turn]) -> String {
        if history.is_empty() || query.trim().is_empty() {
            return query.to_string();
        }

        let messages = [ChatMessage::user(build_prompt(query, history))];
        match self.generator.generate(&messages).await {
            Ok(output) => {
                let rewritten = clean_rewrite(&output);
                if rewritten.is_empty() {
                    warn!("Rewriter returned empty text, keeping original query");
                    query.to_string()
                } else {
                    debug!("Rewrote query {:?} -> {:?}", query, rewritten);
                    rewritten
                }
            }
            Err(e) => {
                warn!("Query rewrite failed, keeping original query: {}", e);
                query.to_string()
            }
        }
    }
}

fn build_prompt(query: &str, history: &[Turn]) -> String {
    let transcript = history
        .iter()
        .map(|t| format!("User: {}\nAssistant: {}", t.user, t.assistant))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a query rewriter.\n\n\
         Conversation history:\n{}\n\n\
         User follow-up question:\n{}\n\n\
         Rewrite it into a fully self-contained question.\n\
         DO NOT answer. Only rewrite.",
        transcript, query
    )
}

// Models sometimes wrap the rewrite in quotes or a "Rewritten question:" preface.
fn clean_rewrite(output: &str) -> String {
    let mut text = output.trim();
    for prefix in ["Rewritten question:", "Rewritten query:", "Question:"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim();
        }
    }
    text.trim_matches('"').trim().to_string()
}
