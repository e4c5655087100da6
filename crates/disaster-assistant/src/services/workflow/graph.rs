use serde::Serialize;
use std::collections::HashMap;

use super::state::{RequestState, Route};
use super::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Rewrite,
    Route,
    Respond(Route),
    Evaluate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    To(Node),
    /// Resolved from the chosen route
    Branch,
    End,
}

/// Static edge set of the turn pipeline.
///
/// ```text
/// rewrite -> route -> {calculator | web_search} -> END
///                  -> {weather | rag | general} -> evaluate -> END
/// ```
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    edges: HashMap<Node, Edge>,
}

impl WorkflowGraph {
    pub const ENTRY: Node = Node::Rewrite;

    pub fn standard() -> Self {
        let mut edges = HashMap::new();
        edges.insert(Node::Rewrite, Edge::To(Node::Route));
        edges.insert(Node::Route, Edge::Branch);
        for route in Route::ALL {
            let after = if route.is_direct_tool() {
                Edge::End
            } else {
                Edge::To(Node::Evaluate)
            };
            edges.insert(Node::Respond(route), after);
        }
        edges.insert(Node::Evaluate, Edge::End);
        Self { edges }
    }

    /// Successor of `node`, or `None` at the end of the run.
    pub fn next(&self, node: Node, state: &RequestState) -> Result<Option<Node>, WorkflowError> {
        match self.edges.get(&node) {
            Some(Edge::To(next)) => Ok(Some(*next)),
            Some(Edge::Branch) => state
                .route()
                .map(|route| Some(Node::Respond(route)))
                .ok_or(WorkflowError::UnresolvedBranch(node)),
            Some(Edge::End) => Ok(None),
            None => Err(WorkflowError::UnknownNode(node)),
        }
    }

    /// Routes that have a responder node in the graph.
    pub fn responder_routes(&self) -> Vec<Route> {
        Route::ALL
            .into_iter()
            .filter(|route| self.edges.contains_key(&Node::Respond(*route)))
            .collect()
    }
}
