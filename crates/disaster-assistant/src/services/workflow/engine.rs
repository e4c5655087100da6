use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::evaluator::Evaluator;
use super::graph::{Node, WorkflowGraph};
use super::responders::{ResponderOutput, ResponderRegistry};
use super::rewriter::QueryRewriter;
use super::routing::RoutingPolicy;
use super::state::{Evaluation, RequestState, ResponseSource, Route, RoutingDecision};
use super::WorkflowError;
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::services::conversation::{SessionStore, Turn};
use crate::utils::limiters::with_timeout;

/// Everything the engine needs, assembled once at startup.
pub struct WorkflowComponents {
    pub sessions: SessionStore,
    pub rewriter: QueryRewriter,
    pub routing: RoutingPolicy,
    pub responders: ResponderRegistry,
    pub evaluator: Evaluator,
    pub activity: Option<ActivityLogger>,
    /// Turns handed to the rewriter
    pub rewrite_window: usize,
    pub responder_timeout: Duration,
}

/// Result of one completed turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub session_id: String,
    pub query: String,
    pub rewritten_query: String,
    pub routing: RoutingDecision,
    pub answer: String,
    pub response_source: ResponseSource,
    pub evaluation: Option<Evaluation>,
    pub trace: Vec<Node>,
    pub elapsed: Duration,
}

impl TurnOutcome {
    pub fn route(&self) -> Route {
        self.routing.route
    }
}

pub struct WorkflowEngine {
    graph: WorkflowGraph,
    sessions: SessionStore,
    rewriter: QueryRewriter,
    routing: RoutingPolicy,
    responders: ResponderRegistry,
    evaluator: Evaluator,
    activity: Option<ActivityLogger>,
    rewrite_window: usize,
    responder_timeout: Duration,
}

impl WorkflowEngine {
    /// Fails when a route reachable in the graph has no responder.
    pub fn new(components: WorkflowComponents) -> Result<Self, WorkflowError> {
        let graph = WorkflowGraph::standard();
        if let Some(route) = graph
            .responder_routes()
            .into_iter()
            .find(|route| components.responders.get(*route).is_none())
        {
            return Err(WorkflowError::MissingResponder(route));
        }

        Ok(Self {
            graph,
            sessions: components.sessions,
            rewriter: components.rewriter,
            routing: components.routing,
            responders: components.responders,
            evaluator: components.evaluator,
            activity: components.activity,
            rewrite_window: components.rewrite_window,
            responder_timeout: components.responder_timeout,
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Run one turn for `session_id`.
    ///
    /// Turns on the same session are serialized by the session lock, which is
    /// held until the history write.
    pub async fn run_turn(&self, session_id: &str, query: &str) -> Result<TurnOutcome, WorkflowError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(WorkflowError::EmptyQuery);
        }

        let start = Instant::now();
        let (mut session, created) = self.sessions.checkout(session_id).await;
        session.touch();

        if created {
            self.log(ActivityLog::builder(session_id, ActivityType::SessionCreated).build());
        }
        self.log(
            ActivityLog::builder(session_id, ActivityType::TurnReceived)
                .message(query)
                .custom("history_len", session.len())
                .build(),
        );

        let mut state = RequestState::new(session_id, query, session.recent(self.rewrite_window));

        if let Err(e) = self.drive(&mut state).await {
            error!(session_id, "Turn failed: {}", e);
            self.log(
                ActivityLog::builder(session_id, ActivityType::TurnFailed)
                    .status(ActivityStatus::Error)
                    .message(query)
                    .error(e.to_string())
                    .processing_time(start.elapsed().as_millis() as u64)
                    .build(),
            );
            return Err(e);
        }

        let (Some(answer), Some(response_source), Some(routing)) =
            (state.response(), state.response_source(), state.routing().copied())
        else {
            return Err(WorkflowError::NoResponse);
        };
        let answer = answer.to_string();

        session.push_turn(Turn::new(state.effective_query(), answer.clone()));
        drop(session);

        let elapsed = start.elapsed();
        info!(
            session_id,
            route = %routing.route,
            source = ?response_source,
            elapsed_ms = elapsed.as_millis() as u64,
            "Turn completed"
        );

        let mut entry = ActivityLog::builder(session_id, ActivityType::TurnCompleted)
            .status(ActivityStatus::Success)
            .route(routing.route.as_str())
            .message(state.effective_query())
            .response(answer.clone())
            .processing_time(elapsed.as_millis() as u64);
        if let Some(evaluation) = state.evaluation() {
            entry = entry
                .custom("score", evaluation.score)
                .custom("approved", evaluation.approved);
        }
        self.log(entry.build());

        Ok(TurnOutcome {
            session_id: session_id.to_string(),
            query: query.to_string(),
            rewritten_query: state.effective_query().to_string(),
            routing,
            answer,
            response_source,
            evaluation: state.evaluation().cloned(),
            trace: state.trace().to_vec(),
            elapsed,
        })
    }

    async fn drive(&self, state: &mut RequestState) -> Result<(), WorkflowError> {
        let mut current = Some(WorkflowGraph::ENTRY);
        while let Some(node) = current {
            state.record_visit(node);
            self.execute(node, state).await?;
            current = self.graph.next(node, state)?;
        }
        Ok(())
    }

    async fn execute(&self, node: Node, state: &mut RequestState) -> Result<(), WorkflowError> {
        match node {
            Node::Rewrite => {
                let rewritten = self.rewriter.rewrite(state.query(), state.history()).await;
                state.set_rewritten_query(rewritten)
            }
            Node::Route => {
                let decision = self.routing.decide(state.effective_query()).await;
                debug!(
                    route = %decision.route,
                    confidence = decision.confidence,
                    source = ?decision.source,
                    "Route chosen"
                );
                state.set_routing(decision)
            }
            Node::Respond(route) => {
                let output = self.respond(route, state.effective_query()).await?;
                if route.is_direct_tool() {
                    state.set_response(output.text, ResponseSource::DirectTool)
                } else {
                    state.set_agent_response(output.text, output.raw_context)
                }
            }
            Node::Evaluate => {
                let routing = state
                    .routing()
                    .copied()
                    .ok_or(WorkflowError::UnresolvedBranch(node))?;
                let agent_response = state
                    .agent_response()
                    .ok_or(WorkflowError::NoResponse)?
                    .to_string();

                let evaluation = self
                    .evaluator
                    .evaluate(state.effective_query(), &routing, &agent_response)
                    .await;
                let answer = evaluation.improved_answer.clone().unwrap_or(agent_response);

                state.set_evaluation(evaluation)?;
                state.set_response(answer, ResponseSource::Evaluator)
            }
        }
    }

    async fn respond(&self, route: Route, query: &str) -> Result<ResponderOutput, WorkflowError> {
        let responder = self
            .responders
            .get(route)
            .ok_or(WorkflowError::MissingResponder(route))?;

        match with_timeout("responder", self.responder_timeout, responder.respond(query)).await {
            Ok(output) => Ok(output),
            Err(e) => {
                warn!(route = %route, "Responder gave up: {}", e);
                Ok(ResponderOutput::text(format!("The {} tool did not answer in time: {}", route, e)))
            }
        }
    }

    fn log(&self, entry: ActivityLog) {
        if let Some(activity) = &self.activity {
            activity.log(entry);
        }
    }
}
