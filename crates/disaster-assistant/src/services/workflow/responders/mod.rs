//! One responder per route. Responders never fail: capability errors come
//! back as labelled text that becomes (or feeds) the final answer.

pub mod calculator;
pub mod general;
pub mod rag;
pub mod weather;
pub mod web_search;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::state::Route;

pub use calculator::CalculatorResponder;
pub use general::GeneralResponder;
pub use rag::RagResponder;
pub use weather::{Gazetteer, WeatherResponder};
pub use web_search::WebSearchResponder;

#[derive(Debug, Clone, PartialEq)]
pub struct ResponderOutput {
    pub text: String,
    /// Material the answer was built from, kept for diagnostics
    pub raw_context: Option<String>,
}

impl ResponderOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            raw_context: None,
        }
    }

    pub fn with_context(text: impl Into<String>, raw_context: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            raw_context: Some(raw_context.into()),
        }
    }
}

#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, query: &str) -> ResponderOutput;
}

#[derive(Clone, Default)]
pub struct ResponderRegistry {
    responders: HashMap<Route, Arc<dyn Responder>>,
}

impl ResponderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `responder` to `route`, replacing any earlier binding.
    pub fn register(mut self, route: Route, responder: Arc<dyn Responder>) -> Self {
        self.responders.insert(route, responder);
        self
    }

    pub fn get(&self, route: Route) -> Option<Arc<dyn Responder>> {
        self.responders.get(&route).cloned()
    }

    pub fn missing_routes(&self) -> Vec<Route> {
        Route::ALL
            .into_iter()
            .filter(|route| !self.responders.contains_key(route))
            .collect()
    }
}

/// Char-boundary-safe preview used for `raw_context`.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
