use serde::{Deserialize, Serialize};
use std::fmt;

use super::graph::Node;
use super::WorkflowError;
use crate::services::conversation::Turn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Calculator,
    WebSearch,
    Weather,
    Rag,
    General,
}

impl Route {
    pub const ALL: [Route; 5] = [
        Self::Calculator,
        Self::WebSearch,
        Self::Weather,
        Self::Rag,
        Self::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calculator => "calculator",
            Self::WebSearch => "web_search",
            Self::Weather => "weather",
            Self::Rag => "rag",
            Self::General => "general",
        }
    }

    /// Direct tools answer verbatim and skip evaluation.
    pub fn is_direct_tool(&self) -> bool {
        matches!(self, Self::Calculator | Self::WebSearch)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingSource {
    Rules,
    Classifier,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub route: Route,
    pub confidence: f64,
    pub source: RoutingSource,
}

impl RoutingDecision {
    pub fn rules(route: Route) -> Self {
        Self {
            route,
            confidence: 1.0,
            source: RoutingSource::Rules,
        }
    }

    pub fn fallback() -> Self {
        Self {
            route: Route::General,
            confidence: 1.0,
            source: RoutingSource::Default,
        }
    }

    pub fn classifier(route: Route, confidence: f64) -> Self {
        Self {
            route,
            confidence,
            source: RoutingSource::Classifier,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Augmentation {
    Retrieval,
    WebSearch,
}

/// Evaluator verdict for an agent response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub approved: bool,
    pub routing_approved: bool,
    pub score: f64,
    pub issues: Vec<String>,
    pub suggestion: String,
    pub improved_answer: Option<String>,
    pub augmentation: Option<Augmentation>,
    /// Set only when an augmentation round was warranted
    pub approved_after_improve: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    DirectTool,
    Evaluator,
}

/// Request-scoped state threaded through the graph.
///
/// Every field past `query` is written at most once; the setters enforce it.
#[derive(Debug, Clone)]
pub struct RequestState {
    pub session_id: String,
    query: String,
    history: Vec<Turn>,
    rewritten_query: Option<String>,
    routing: Option<RoutingDecision>,
    agent_response: Option<String>,
    raw_context: Option<String>,
    evaluation: Option<Evaluation>,
    response: Option<(String, ResponseSource)>,
    trace: Vec<Node>,
}

impl RequestState {
    pub fn new(session_id: impl Into<String>, query: impl Into<String>, history: Vec<Turn>) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
            history,
            rewritten_query: None,
            routing: None,
            agent_response: None,
            raw_context: None,
            evaluation: None,
            response: None,
            trace: Vec::new(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn rewritten_query(&self) -> Option<&str> {
        self.rewritten_query.as_deref()
    }

    /// Rewritten query once available, otherwise the original.
    pub fn effective_query(&self) -> &str {
        self.rewritten_query.as_deref().unwrap_or(&self.query)
    }

    pub fn routing(&self) -> Option<&RoutingDecision> {
        self.routing.as_ref()
    }

    pub fn route(&self) -> Option<Route> {
        self.routing.map(|r| r.route)
    }

    pub fn agent_response(&self) -> Option<&str> {
        self.agent_response.as_deref()
    }

    pub fn raw_context(&self) -> Option<&str> {
        self.raw_context.as_deref()
    }

    pub fn evaluation(&self) -> Option<&Evaluation> {
        self.evaluation.as_ref()
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_ref().map(|(text, _)| text.as_str())
    }

    pub fn response_source(&self) -> Option<ResponseSource> {
        self.response.as_ref().map(|(_, source)| *source)
    }

    pub fn trace(&self) -> &[Node] {
        &self.trace
    }

    pub(crate) fn record_visit(&mut self, node: Node) {
        self.trace.push(node);
    }

    pub fn set_rewritten_query(&mut self, rewritten: String) -> Result<(), WorkflowError> {
        set_once(&mut self.rewritten_query, rewritten, "rewritten query")
    }

    pub fn set_routing(&mut self, decision: RoutingDecision) -> Result<(), WorkflowError> {
        set_once(&mut self.routing, decision, "route")
    }

    pub fn set_agent_response(&mut self, text: String, raw_context: Option<String>) -> Result<(), WorkflowError> {
        set_once(&mut self.agent_response, text, "agent response")?;
        self.raw_context = raw_context;
        Ok(())
    }

    pub fn set_evaluation(&mut self, evaluation: Evaluation) -> Result<(), WorkflowError> {
        set_once(&mut self.evaluation, evaluation, "evaluation")
    }

    pub fn set_response(&mut self, text: String, source: ResponseSource) -> Result<(), WorkflowError> {
        set_once(&mut self.response, (text, source), "response")
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: &'static str) -> Result<(), WorkflowError> {
    if slot.is_some() {
        return Err(WorkflowError::AlreadySet(field));
    }
    *slot = Some(value);
    Ok(())
}
