//! End-to-end turns through the workflow engine with scripted capabilities.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::settings::EvaluatorConfig;
use crate::models::chat::ChatMessage;
use crate::services::conversation::SessionStore;
use crate::services::providers::{GenerationProvider, RetrievalProvider, RetrievedPassage};
use crate::services::workflow::graph::Node;
use crate::services::workflow::responders::{
    CalculatorResponder, GeneralResponder, RagResponder, Responder, ResponderOutput,
};
use crate::services::workflow::state::{Augmentation, ResponseSource, Route};
use crate::services::workflow::{
    Evaluator, QueryRewriter, ResponderRegistry, RoutingPolicy, RoutingRules, WorkflowComponents,
    WorkflowEngine,
};
use crate::utils::error::CapabilityError;

/// Answers each prompt kind with a fixed script.
struct ScriptedGenerator {
    verdict: &'static str,
}

impl ScriptedGenerator {
    fn scoring(verdict: &'static str) -> Arc<Self> {
        Arc::new(Self { verdict })
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, CapabilityError> {
        let first = messages.first().map(|m| m.content.as_str()).unwrap_or_default();

        let reply = if first.starts_with("You are a query rewriter") {
            scripted_rewrite(first)
        } else if first.starts_with("You are an evaluator") {
            self.verdict.to_string()
        } else if first.starts_with("Rewrite and improve") || first.starts_with("Using the search snippets") {
            "Improved answer with sources".to_string()
        } else if first.starts_with("You answer ONLY using the given context") {
            "Cyclone Fani made landfall near Puri (fani.pdf, page 2).".to_string()
        } else {
            "General answer".to_string()
        };
        Ok(reply)
    }
}

fn scripted_rewrite(prompt: &str) -> String {
    let follow_up = prompt
        .split("User follow-up question:\n")
        .nth(1)
        .and_then(|rest| rest.split("\n\n").next())
        .unwrap_or_default()
        .trim();

    if prompt.contains("Fani") && !follow_up.to_lowercase().contains("fani") {
        format!("{} caused by cyclone Fani?", follow_up.trim_end_matches('?'))
    } else {
        follow_up.to_string()
    }
}

#[derive(Default)]
struct FakeRetrieval {
    calls: AtomicUsize,
}

#[async_trait]
impl RetrievalProvider for FakeRetrieval {
    async fn retrieve(&self, _query: &str, _k: usize) -> Result<Vec<RetrievedPassage>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![RetrievedPassage {
            content: "Cyclone Fani made landfall near Puri on 3 May 2019.".to_string(),
            source: "fani.pdf".to_string(),
            page: Some(2),
            score: 0.8,
        }])
    }
}

struct SlowResponder;

#[async_trait]
impl Responder for SlowResponder {
    async fn respond(&self, _query: &str) -> ResponderOutput {
        tokio::time::sleep(Duration::from_secs(5)).await;
        ResponderOutput::text("too late")
    }
}

struct Harness {
    generator: Arc<ScriptedGenerator>,
    retrieval: Option<Arc<FakeRetrieval>>,
    general: Option<Arc<dyn Responder>>,
    responder_timeout: Duration,
}

impl Harness {
    fn new(verdict: &'static str) -> Self {
        Self {
            generator: ScriptedGenerator::scoring(verdict),
            retrieval: None,
            general: None,
            responder_timeout: Duration::from_secs(5),
        }
    }

    fn with_retrieval(mut self, retrieval: Arc<FakeRetrieval>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    fn build(self) -> WorkflowEngine {
        let generator: Arc<dyn GenerationProvider> = self.generator;
        let retrieval: Option<Arc<dyn RetrievalProvider>> =
            self.retrieval.map(|r| r as Arc<dyn RetrievalProvider>);

        let general = self
            .general
            .unwrap_or_else(|| Arc::new(GeneralResponder::new(generator.clone())) as Arc<dyn Responder>);
        let responders = ResponderRegistry::new()
            .register(Route::Calculator, Arc::new(CalculatorResponder))
            .register(Route::WebSearch, general.clone())
            .register(Route::Weather, general.clone())
            .register(
                Route::Rag,
                Arc::new(RagResponder::new(retrieval.clone(), generator.clone(), 5)),
            )
            .register(Route::General, general);

        let mut evaluator = Evaluator::new(generator.clone(), EvaluatorConfig::default());
        if let Some(retrieval) = retrieval {
            evaluator = evaluator.with_retrieval(retrieval);
        }

        WorkflowEngine::new(WorkflowComponents {
            sessions: SessionStore::new(10),
            rewriter: QueryRewriter::new(generator),
            routing: RoutingPolicy::new(RoutingRules::default()),
            responders,
            evaluator,
            activity: None,
            rewrite_window: 3,
            responder_timeout: self.responder_timeout,
        })
        .unwrap()
    }
}

const GOOD_VERDICT: &str = r#"{"score": 0.9, "issues": [], "suggestion": ""}"#;

#[tokio::test]
async fn test_calculator_turn_skips_evaluation() {
    let engine = Harness::new(GOOD_VERDICT).build();

    let outcome = engine.run_turn("calc", "2+2").await.unwrap();

    assert_eq!(outcome.answer, "Calculation: 4");
    assert_eq!(outcome.route(), Route::Calculator);
    assert_eq!(outcome.response_source, ResponseSource::DirectTool);
    assert!(outcome.evaluation.is_none());
    assert_eq!(
        outcome.trace,
        vec![Node::Rewrite, Node::Route, Node::Respond(Route::Calculator)]
    );
}

#[tokio::test]
async fn test_general_turn_goes_through_evaluator() {
    let engine = Harness::new(GOOD_VERDICT).build();

    let outcome = engine.run_turn("chat", "hello there").await.unwrap();

    assert_eq!(outcome.route(), Route::General);
    assert_eq!(outcome.answer, "General answer");
    assert_eq!(outcome.response_source, ResponseSource::Evaluator);
    assert_eq!(outcome.trace.last(), Some(&Node::Evaluate));

    let evaluation = outcome.evaluation.unwrap();
    assert!(evaluation.approved);
    assert_eq!(evaluation.score, 0.9);
}

#[tokio::test]
async fn test_follow_up_is_rewritten_from_history() {
    let retrieval = Arc::new(FakeRetrieval::default());
    let engine = Harness::new(GOOD_VERDICT).with_retrieval(retrieval.clone()).build();

    let first = engine.run_turn("fani", "Tell me about cyclone Fani").await.unwrap();
    assert_eq!(first.route(), Route::Rag);
    assert_eq!(first.rewritten_query, "Tell me about cyclone Fani");

    let second = engine.run_turn("fani", "what was the damage").await.unwrap();
    assert!(second.rewritten_query.contains("cyclone Fani"));
    assert_eq!(second.route(), Route::Rag);
    assert!(second.answer.contains("Puri"));

    let session = engine.sessions().snapshot("fani").await.unwrap();
    let users: Vec<_> = session.history().map(|t| t.user.clone()).collect();
    assert_eq!(users.len(), 2);
    assert!(users[1].contains("cyclone Fani"));
    assert_eq!(retrieval.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_low_score_answer_is_replaced_by_augmented_one() {
    let retrieval = Arc::new(FakeRetrieval::default());
    let engine = Harness::new(r#"{"score": 0.3, "issues": ["no citation"]}"#)
        .with_retrieval(retrieval.clone())
        .build();

    let outcome = engine.run_turn("aug", "fani landfall report").await.unwrap();

    assert_eq!(outcome.answer, "Improved answer with sources");
    let evaluation = outcome.evaluation.unwrap();
    assert!(!evaluation.approved);
    assert_eq!(evaluation.augmentation, Some(Augmentation::Retrieval));
    // responder and augmentation round
    assert_eq!(retrieval.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_rag_without_retrieval_reports_failure() {
    let engine = Harness::new(GOOD_VERDICT).build();

    let outcome = engine.run_turn("norag", "phailin damage report").await.unwrap();

    assert_eq!(outcome.route(), Route::Rag);
    assert_eq!(outcome.answer, "RAG Tool failed to retrieve relevant information.");
}

#[tokio::test]
async fn test_history_is_capped_at_capacity() {
    let engine = Harness::new(GOOD_VERDICT).build();

    for i in 1..=11 {
        engine.run_turn("cap", &format!("1+{i}")).await.unwrap();
    }

    let session = engine.sessions().snapshot("cap").await.unwrap();
    assert_eq!(session.len(), 10);
    assert_eq!(session.turns, 11);
    assert_eq!(session.history().next().map(|t| t.user.as_str()), Some("1+2"));
    assert_eq!(session.history().last().map(|t| t.assistant.as_str()), Some("Calculation: 12"));
}

#[tokio::test]
async fn test_concurrent_turns_on_one_session_keep_every_write() {
    let engine = Arc::new(Harness::new(GOOD_VERDICT).build());

    let turns = (1..=8).map(|i| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_turn("shared", &format!("{i}*3")).await })
    });
    let results = futures::future::join_all(turns).await;

    for result in results {
        assert!(result.unwrap().is_ok());
    }
    let session = engine.sessions().snapshot("shared").await.unwrap();
    assert_eq!(session.len(), 8);
    assert_eq!(session.turns, 8);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let engine = Harness::new(GOOD_VERDICT).build();

    engine.run_turn("a", "5*5").await.unwrap();
    engine.run_turn("b", "hello there").await.unwrap();

    let a = engine.sessions().snapshot("a").await.unwrap();
    let b = engine.sessions().snapshot("b").await.unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(a.history().next().map(|t| t.assistant.as_str()), Some("Calculation: 25"));
    assert_eq!(engine.sessions().len(), 2);
}

#[tokio::test]
async fn test_slow_responder_times_out_into_text() {
    let mut harness = Harness::new(GOOD_VERDICT);
    harness.general = Some(Arc::new(SlowResponder));
    harness.responder_timeout = Duration::from_millis(50);
    let engine = harness.build();

    let outcome = engine.run_turn("slow", "hello there").await.unwrap();

    assert!(outcome.answer.contains("did not answer in time"));
    assert_eq!(engine.sessions().snapshot("slow").await.unwrap().len(), 1);
}
