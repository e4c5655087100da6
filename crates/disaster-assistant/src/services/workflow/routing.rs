use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::state::{Route, RoutingDecision};
use crate::models::chat::ChatMessage;
use crate::services::providers::GenerationProvider;

const CLASSIFIER_INSTRUCTION: &str = "You are a query classifier. \
Classify the user query into exactly ONE category: weather, disaster, rag, general. \
Respond with ONLY the category name, nothing else.";

/// Keyword tables for each rule tier, matched as lower-case substrings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingRules {
    pub calculator_symbols: Vec<String>,
    pub calculator_keywords: Vec<String>,
    pub web_search_keywords: Vec<String>,
    pub rag_keywords: Vec<String>,
    pub historical_intents: Vec<String>,
    pub weather_keywords: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

impl Default for RoutingRules {
    fn default() -> Self {
        Self {
            calculator_symbols: words(&["+", "-", "*", "/", "=", "%"]),
            calculator_keywords: words(&[
                "calculate", "compute", "math", "percentage", "addition", "subtraction", "multiply",
                "divide",
            ]),
            web_search_keywords: words(&[
                "search", "google", "find", "look up", "latest", "news", "current", "today",
                "what is happening", "recent", "update",
            ]),
            rag_keywords: words(&[
                "history", "past", "historical", "report", "paper", "document", "study", "research",
                "previous cyclone", "previous disaster", "fani", "phailin", "impact",
                "damage assessment",
            ]),
            historical_intents: words(&["was", "were", "happened", "occurred", "previous", "last year", "ago"]),
            weather_keywords: words(&[
                "weather", "temperature", "rain", "rainfall", "wind", "humidity", "cloud", "climate",
                "forecast", "imd", "heat", "cold", "sunny", "visibility", "today", "tomorrow", "live",
                "coastal", "sea", "fishermen",
            ]),
        }
    }
}

fn first_hit<'a>(text: &str, patterns: &'a [String]) -> Option<&'a str> {
    patterns
        .iter()
        .map(String::as_str)
        .find(|p| !p.is_empty() && text.contains(p))
}

/// Tiered query classifier: calculator, web search, rag, weather, then default.
#[derive(Clone)]
pub struct RoutingPolicy {
    rules: RoutingRules,
    classifier: Option<Arc<dyn GenerationProvider>>,
}

impl RoutingPolicy {
    pub fn new(rules: RoutingRules) -> Self {
        Self {
            rules,
            classifier: None,
        }
    }

    /// Consult `classifier` for queries no rule matches.
    pub fn with_classifier(mut self, classifier: Arc<dyn GenerationProvider>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Rule tiers only; `None` when nothing matched.
    pub fn classify_rules(&self, text: &str) -> Option<Route> {
        let q = text.trim().to_lowercase();
        let rules = &self.rules;

        let tiers: [(Route, [&[String]; 2]); 4] = [
            (Route::Calculator, [&rules.calculator_symbols, &rules.calculator_keywords]),
            (Route::WebSearch, [&rules.web_search_keywords, &[]]),
            (Route::Rag, [&rules.rag_keywords, &rules.historical_intents]),
            (Route::Weather, [&rules.weather_keywords, &[]]),
        ];

        for (route, lists) in tiers {
            if let Some(hit) = lists.iter().find_map(|list| first_hit(&q, list)) {
                debug!("Routing matched '{}' -> {}", hit, route);
                return Some(route);
            }
        }
        None
    }

    /// Pure rule classification with the default route.
    pub fn classify(&self, text: &str) -> Route {
        self.classify_rules(text).unwrap_or(Route::General)
    }

    /// Full decision, asking the classifier when one is configured and no rule matched.
    pub async fn decide(&self, text: &str) -> RoutingDecision {
        if let Some(route) = self.classify_rules(text) {
            return RoutingDecision::rules(route);
        }

        let Some(classifier) = &self.classifier else {
            debug!("Routing defaulted to general");
            return RoutingDecision::fallback();
        };

        let messages = [ChatMessage::system(CLASSIFIER_INSTRUCTION), ChatMessage::user(text)];
        match classifier.generate(&messages).await {
            Ok(output) => match parse_label(&output) {
                Some(route) => {
                    debug!("Classifier labelled query as {}", route);
                    RoutingDecision::classifier(route, 1.0)
                }
                None => {
                    warn!("Classifier returned unusable label {:?}, using general", output.trim());
                    RoutingDecision::classifier(Route::General, 0.0)
                }
            },
            Err(e) => {
                warn!("Classifier call failed, using general: {}", e);
                RoutingDecision::classifier(Route::General, 0.0)
            }
        }
    }
}

/// Map a classifier label onto a route. "disaster" questions are answered from documents.
fn parse_label(output: &str) -> Option<Route> {
    let label = output
        .trim()
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_lowercase();
    match label.as_str() {
        "weather" => Some(Route::Weather),
        "disaster" | "rag" => Some(Route::Rag),
        "general" => Some(Route::General),
        _ => None,
    }
}
