use anyhow::Result;
use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Settings;
use crate::logging::{ActivityLogger, LoggerConfig};
use crate::services::conversation::{LongTermMemory, SessionStore};
use crate::services::providers::{GenerationProvider, RetrievalProvider, SearchProvider, WeatherDataProvider};
use crate::services::workflow::responders::{
    CalculatorResponder, Gazetteer, GeneralResponder, RagResponder, WeatherResponder, WebSearchResponder,
};
use crate::services::workflow::state::Route;
use crate::services::workflow::{
    Evaluator, QueryRewriter, ResponderRegistry, RoutingPolicy, WorkflowComponents, WorkflowEngine,
};
use crate::services::{ChromaRetriever, EmbeddingService, ImdWeatherService, LlmService, SerperSearch};
use crate::utils::limiters::Limiters;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub activity: ActivityLogger,
    pub settings: Settings,
}

impl FromRef<AppState> for Arc<WorkflowEngine> {
    fn from_ref(state: &AppState) -> Self {
        state.engine.clone()
    }
}

impl AppState {
    /// Wire adapters, responders and the engine from configuration.
    /// Must be called inside a tokio runtime.
    pub async fn build(settings: Settings) -> Result<Self> {
        let limiters = Limiters::new(&settings.limits);

        let generator: Arc<dyn GenerationProvider> =
            Arc::new(LlmService::new(settings.llm.clone(), limiters.clone()));

        let retrieval: Option<Arc<dyn RetrievalProvider>> = if settings.retrieval.enabled {
            let embedder = EmbeddingService::new(settings.embedding.clone());
            Some(Arc::new(ChromaRetriever::new(
                settings.retrieval.clone(),
                embedder,
                limiters.clone(),
            )))
        } else {
            info!("Retrieval disabled, rag answers will report missing documents");
            None
        };

        let search: Arc<dyn SearchProvider> =
            Arc::new(SerperSearch::new(settings.search.clone(), limiters.clone()));
        let weather: Arc<dyn WeatherDataProvider> =
            Arc::new(ImdWeatherService::new(settings.weather.clone(), limiters.clone()));

        let gazetteer = Gazetteer::odisha()
            .with_default(&settings.weather.default_location)
            .with_extra(&settings.weather.extra_locations);

        let responders = ResponderRegistry::new()
            .register(Route::Calculator, Arc::new(CalculatorResponder))
            .register(Route::WebSearch, Arc::new(WebSearchResponder::new(search.clone())))
            .register(
                Route::Weather,
                Arc::new(WeatherResponder::new(weather, generator.clone(), gazetteer)),
            )
            .register(
                Route::Rag,
                Arc::new(RagResponder::new(
                    retrieval.clone(),
                    generator.clone(),
                    settings.retrieval.top_k,
                )),
            )
            .register(Route::General, Arc::new(GeneralResponder::new(generator.clone())));

        let mut routing = RoutingPolicy::new(settings.routing.rules.clone());
        if settings.routing.llm_fallback {
            routing = routing.with_classifier(generator.clone());
        }

        let mut evaluator = Evaluator::new(generator.clone(), settings.evaluator.clone());
        if let Some(retrieval) = &retrieval {
            evaluator = evaluator.with_retrieval(retrieval.clone());
        }
        if settings.search.is_configured() {
            evaluator = evaluator.with_search(search);
        }

        let memory = match &settings.memory.long_term_path {
            Some(path) => match LongTermMemory::open(path).await {
                Ok(memory) => {
                    info!("Long-term memory at {}", path);
                    Some(Arc::new(memory))
                }
                Err(e) => {
                    warn!("Long-term memory unavailable ({}), continuing without it", e);
                    None
                }
            },
            None => None,
        };
        let activity = ActivityLogger::new(LoggerConfig::from(&settings.activity_log), memory);

        let engine = WorkflowEngine::new(WorkflowComponents {
            sessions: SessionStore::new(settings.memory.history_capacity),
            rewriter: QueryRewriter::new(generator),
            routing,
            responders,
            evaluator,
            activity: Some(activity.clone()),
            rewrite_window: settings.memory.rewrite_window,
            responder_timeout: Duration::from_secs(settings.workflow.responder_timeout_secs.max(1)),
        })?;

        info!(
            retrieval = settings.retrieval.enabled,
            search = settings.search.is_configured(),
            classifier = settings.routing.llm_fallback,
            "Workflow engine ready"
        );

        Ok(Self {
            engine: Arc::new(engine),
            activity,
            settings,
        })
    }
}
