//! Per-request orchestration: rewrite, route, dispatch, evaluate.

pub mod engine;
pub mod evaluator;
pub mod graph;
pub mod responders;
pub mod rewriter;
pub mod routing;
pub mod state;

use thiserror::Error;

use self::graph::Node;
use self::state::Route;

pub use engine::{TurnOutcome, WorkflowComponents, WorkflowEngine};
pub use evaluator::Evaluator;
pub use responders::{Responder, ResponderOutput, ResponderRegistry};
pub use rewriter::QueryRewriter;
pub use routing::{RoutingPolicy, RoutingRules};
pub use state::{RequestState, RoutingDecision};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("no responder registered for route {0}")]
    MissingResponder(Route),

    #[error("branch after {0:?} reached before a route was chosen")]
    UnresolvedBranch(Node),

    #[error("node {0:?} has no outgoing edge")]
    UnknownNode(Node),

    #[error("{0} was already set for this request")]
    AlreadySet(&'static str),

    #[error("run ended without a response")]
    NoResponse,

    #[error("query must not be empty")]
    EmptyQuery,
}
