use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::responders::rag::format_passages;
use super::responders::web_search::format_hits;
use super::state::{Augmentation, Evaluation, Route, RoutingDecision};
use crate::config::settings::EvaluatorConfig;
use crate::models::chat::ChatMessage;
use crate::services::providers::{GenerationProvider, RetrievalProvider, SearchProvider};

const EVALUATOR_INSTRUCTION: &str = "You are an evaluator. Score the assistant's answer on three aspects: \
factuality (does it contradict known context), \
completeness (did it answer user's question), \
safety (no harmful or misleading instructions). \
Return JSON with keys: score (0.0-1.0), issues (list of strings), suggestion (short).";

const UNPARSABLE_SCORE: f64 = 0.7;
const CALL_FAILURE_SCORE: f64 = 0.5;

/// Parsed evaluator reply
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub score: f64,
    pub issues: Vec<String>,
    pub suggestion: String,
}

/// Scores agent answers and runs at most one augmentation round.
#[derive(Clone)]
pub struct Evaluator {
    generator: Arc<dyn GenerationProvider>,
    retrieval: Option<Arc<dyn RetrievalProvider>>,
    search: Option<Arc<dyn SearchProvider>>,
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(generator: Arc<dyn GenerationProvider>, config: EvaluatorConfig) -> Self {
        Self {
            generator,
            retrieval: None,
            search: None,
            config,
        }
    }

    pub fn with_retrieval(mut self, retrieval: Arc<dyn RetrievalProvider>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    /// Never fails; every problem ends up in `issues`.
    pub async fn evaluate(&self, query: &str, routing: &RoutingDecision, agent_response: &str) -> Evaluation {
        let routing_approved = routing.confidence >= self.config.routing_confidence_threshold;

        let verdict = self.score(query, routing.route, agent_response).await;
        let approved = verdict.score >= self.config.approval_threshold && routing_approved;

        let mut evaluation = Evaluation {
            approved,
            routing_approved,
            score: verdict.score,
            issues: verdict.issues,
            suggestion: verdict.suggestion,
            improved_answer: None,
            augmentation: None,
            approved_after_improve: None,
        };

        let warranted = !approved || evaluation.score < self.config.auto_improve_threshold;
        if warranted && (self.retrieval.is_some() || self.search.is_some()) {
            self.augment(query, routing.route, agent_response, &mut evaluation).await;
        }

        info!(
            route = %routing.route,
            score = evaluation.score,
            approved = evaluation.approved,
            routing_approved,
            augmented = evaluation.improved_answer.is_some(),
            "Evaluation finished"
        );
        evaluation
    }

    async fn score(&self, query: &str, route: Route, agent_response: &str) -> Verdict {
        let messages = [
            ChatMessage::system(EVALUATOR_INSTRUCTION),
            ChatMessage::user(format!(
                "User query: {}\n\nSelected agent: {}\n\nAgent response:\n{}\n\nEvaluate and return JSON.",
                query, route, agent_response
            )),
        ];

        match self.generator.generate(&messages).await {
            Ok(output) => parse_verdict(&output).unwrap_or_else(|| {
                warn!("Evaluator reply was not usable JSON, applying default score");
                Verdict {
                    score: UNPARSABLE_SCORE,
                    issues: vec!["Evaluator reply was not valid JSON; default score applied".to_string()],
                    suggestion: format!("No strict JSON from evaluator; default {}", UNPARSABLE_SCORE),
                }
            }),
            Err(e) => {
                warn!("Evaluator call failed: {}", e);
                Verdict {
                    score: CALL_FAILURE_SCORE,
                    issues: vec![format!("Evaluator LLM error: {}", e)],
                    suggestion: "Evaluator LLM error".to_string(),
                }
            }
        }
    }

    /// The single augmentation round: retrieval for rag answers, web search otherwise.
    async fn augment(&self, query: &str, route: Route, agent_response: &str, evaluation: &mut Evaluation) {
        let attempt = match (&self.retrieval, &self.search) {
            (Some(retrieval), _) if route == Route::Rag => {
                Some((Augmentation::Retrieval, self.improve_with_retrieval(retrieval, query, agent_response).await))
            }
            (_, Some(search)) => Some((Augmentation::WebSearch, self.improve_with_search(search, query, agent_response).await)),
            _ => None,
        };

        match attempt {
            Some((kind, Ok(improved))) => {
                debug!("Augmentation via {:?} produced an improved answer", kind);
                evaluation.improved_answer = Some(improved);
                evaluation.augmentation = Some(kind);
                evaluation.approved_after_improve = Some(true);
            }
            Some((_, Err(issue))) => {
                evaluation.issues.push(issue);
                evaluation.approved_after_improve = Some(false);
            }
            None => {
                evaluation.approved_after_improve = Some(false);
            }
        }
    }

    async fn improve_with_retrieval(
        &self,
        retrieval: &Arc<dyn RetrievalProvider>,
        query: &str,
        agent_response: &str,
    ) -> Result<String, String> {
        let passages = retrieval
            .retrieve(query, self.config.augmentation_top_k.max(1))
            .await
            .map_err(|e| format!("RAG augmentation failed: {}", e))?;
        if passages.is_empty() {
            return Err("RAG augmentation found no supporting passages".to_string());
        }

        let prompt = format!(
            "Rewrite and improve the previous answer using the context below. \
             Be concise and cite filenames/pages if available.\n\n\
             Context:\n{}\n\nOriginal answer:\n{}",
            format_passages(&passages),
            agent_response
        );
        self.rewrite_answer(prompt)
            .await
            .map_err(|e| format!("RAG augmentation failed: {}", e))
    }

    async fn improve_with_search(
        &self,
        search: &Arc<dyn SearchProvider>,
        query: &str,
        agent_response: &str,
    ) -> Result<String, String> {
        let hits = search
            .search(query)
            .await
            .map_err(|e| format!("WebSearch augmentation failed: {}", e))?;
        if hits.is_empty() {
            return Err("WebSearch augmentation found no results".to_string());
        }

        let prompt = format!(
            "Using the search snippets below, improve the original answer. \
             If snippets contradict the original answer, prefer factual snippets and correct the response.\n\n\
             Snippets:\n{}\n\nOriginal answer:\n{}",
            format_hits(&hits),
            agent_response
        );
        self.rewrite_answer(prompt)
            .await
            .map_err(|e| format!("WebSearch augmentation failed: {}", e))
    }

    async fn rewrite_answer(&self, prompt: String) -> Result<String, String> {
        let improved = self
            .generator
            .generate(&[ChatMessage::user(prompt)])
            .await
            .map_err(|e| e.to_string())?;
        let improved = improved.trim();
        if improved.is_empty() {
            return Err("empty improved answer".to_string());
        }
        Ok(improved.to_string())
    }
}

/// First JSON object in `output` that carries a `score` key.
///
/// Models wrap the verdict in prose or code fences and sometimes emit an
/// unrelated object first, so every `{` is tried as a starting point.
fn find_verdict_object(output: &str) -> Option<Map<String, Value>> {
    output.match_indices('{').find_map(|(at, _)| {
        let mut values = serde_json::Deserializer::from_str(&output[at..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(Value::Object(object))) if object.contains_key("score") => Some(object),
            _ => None,
        }
    })
}

/// `None` when the reply holds no object with a usable score.
pub fn parse_verdict(output: &str) -> Option<Verdict> {
    let value = find_verdict_object(output)?;

    let score = match value.get("score")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !score.is_finite() {
        return None;
    }

    let issues = match value.get("issues") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    };

    let suggestion = value
        .get("suggestion")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Some(Verdict {
        score: score.clamp(0.0, 1.0),
        issues,
        suggestion,
    })
}
