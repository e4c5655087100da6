use anyhow::{ensure, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::services::workflow::routing::RoutingRules;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub activity_log: ActivityLogConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory with the chat frontend, served at `/` when it exists
    #[serde(default)]
    pub static_dir: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub enabled: bool,
    /// Chroma server root, e.g. `http://localhost:8000`
    pub chroma_url: String,
    /// Chroma collection id holding the disaster-management document chunks
    pub collection_id: String,
    pub top_k: usize,
    pub timeout_seconds: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chroma_url: "http://localhost:8000".to_string(),
            collection_id: "pdf_documents".to_string(),
            top_k: 5,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub num_results: usize,
    pub timeout_seconds: u64,
}

impl SearchConfig {
    /// Search is usable as an evaluator augmentation source only with a key.
    pub fn is_configured(&self) -> bool {
        self.enabled && !self.api_key.trim().is_empty()
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://google.serper.dev/search".to_string(),
            api_key: String::new(),
            num_results: 5,
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WeatherConfig {
    /// City page template, `{id}` is replaced with the station id
    pub station_url: String,
    pub bulletin_base_url: String,
    pub default_location: String,
    pub timeout_seconds: u64,
    pub extra_locations: Vec<LocationConfig>,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            station_url: "https://city.imd.gov.in/citywx/responsive/?id={id}".to_string(),
            bulletin_base_url: "https://mausam.imd.gov.in/bhubaneswar/mcdata".to_string(),
            default_location: "bhubaneswar".to_string(),
            timeout_seconds: 15,
            extra_locations: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LocationConfig {
    pub name: String,
    #[serde(default)]
    pub station_id: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct RoutingConfig {
    /// Ask the generation model to classify queries no rule matched
    pub llm_fallback: bool,
    pub rules: RoutingRules,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub routing_confidence_threshold: f64,
    pub approval_threshold: f64,
    pub auto_improve_threshold: f64,
    pub augmentation_top_k: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            routing_confidence_threshold: 0.6,
            approval_threshold: 0.7,
            auto_improve_threshold: 0.75,
            augmentation_top_k: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    pub history_capacity: usize,
    pub rewrite_window: usize,
    /// Idle sessions are swept only when this is set
    pub session_idle_ttl_secs: Option<u64>,
    pub long_term_path: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            history_capacity: 10,
            rewrite_window: 3,
            session_idle_ttl_secs: None,
            long_term_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub generation_concurrency: usize,
    pub search_concurrency: usize,
    pub retrieval_concurrency: usize,
    pub weather_concurrency: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            generation_concurrency: 8,
            search_concurrency: 4,
            retrieval_concurrency: 4,
            weather_concurrency: 2,
            acquire_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WorkflowConfig {
    pub responder_timeout_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            responder_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ActivityLogConfig {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub worker_count: usize,
}

impl Default for ActivityLogConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            batch_timeout_ms: 1000,
            worker_count: 1,
        }
    }
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> usize {
    1024
}

fn default_timeout_seconds() -> u64 {
    60
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.apply_legacy_keys(|name| std::env::var(name).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Fill empty provider keys from the variable names deployments already export.
    pub fn apply_legacy_keys(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for (slot, var) in [
            (&mut self.llm.api_key, "GROQ_API_KEY"),
            (&mut self.search.api_key, "SERPER_API_KEY"),
            (&mut self.embedding.api_key, "OPENAI_API_KEY"),
        ] {
            if slot.trim().is_empty() {
                if let Some(value) = lookup(var) {
                    *slot = value;
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.llm.base_url.trim().is_empty(), "llm.base_url must be set");
        ensure!(!self.llm.model.trim().is_empty(), "llm.model must be set");
        ensure!(
            self.memory.history_capacity > 0,
            "memory.history_capacity must be greater than zero"
        );
        for (name, value) in [
            (
                "evaluator.routing_confidence_threshold",
                self.evaluator.routing_confidence_threshold,
            ),
            ("evaluator.approval_threshold", self.evaluator.approval_threshold),
            ("evaluator.auto_improve_threshold", self.evaluator.auto_improve_threshold),
        ] {
            ensure!((0.0..=1.0).contains(&value), "{name} must be within [0, 1], got {value}");
        }
        ensure!(
            self.weather.station_url.contains("{id}"),
            "weather.station_url must contain an {{id}} placeholder"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const MINIMAL: &str = r#"
        [server]
        host = "0.0.0.0"
        port = 7860

        [llm]
        base_url = "https://api.groq.com/openai/v1"
        model = "llama-3.1-8b-instant"
    "#;

    fn parse(raw: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_minimal_file_gets_documented_defaults() {
        let settings = parse(MINIMAL);

        assert_eq!(settings.memory.history_capacity, 10);
        assert_eq!(settings.memory.rewrite_window, 3);
        assert!(settings.memory.session_idle_ttl_secs.is_none());
        assert_eq!(settings.evaluator.routing_confidence_threshold, 0.6);
        assert_eq!(settings.evaluator.approval_threshold, 0.7);
        assert_eq!(settings.evaluator.auto_improve_threshold, 0.75);
        assert!(!settings.routing.llm_fallback);
        assert!(!settings.retrieval.enabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_keep_remaining_defaults() {
        let settings = parse(&format!(
            "{MINIMAL}\n[limits]\nsearch_concurrency = 1\n\n[weather]\ndefault_location = \"puri\"\n\n[memory]\nsession_idle_ttl_secs = 600\n"
        ));

        assert_eq!(settings.limits.search_concurrency, 1);
        assert_eq!(settings.limits.generation_concurrency, 8);
        assert_eq!(settings.weather.default_location, "puri");
        assert!(settings.weather.station_url.contains("{id}"));
        assert_eq!(settings.memory.session_idle_ttl_secs, Some(600));
        assert_eq!(settings.memory.history_capacity, 10);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_single_env_override_leaves_section_defaults() {
        let env = config::Map::from([
            ("APP__WORKFLOW__RESPONDER_TIMEOUT_SECS".to_string(), "30".to_string()),
            ("APP__EVALUATOR__APPROVAL_THRESHOLD".to_string(), "0.8".to_string()),
        ]);
        let settings: Settings = Config::builder()
            .add_source(File::from_str(MINIMAL, FileFormat::Toml))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(env)),
            )
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.workflow.responder_timeout_secs, 30);
        assert_eq!(settings.evaluator.approval_threshold, 0.8);
        assert_eq!(settings.evaluator.auto_improve_threshold, 0.75);
    }

    #[test]
    fn test_legacy_keys_only_fill_empty_slots() {
        let mut settings = parse(MINIMAL);
        settings.search.api_key = "explicit".to_string();

        settings.apply_legacy_keys(|name| Some(format!("{name}-value")));

        assert_eq!(settings.llm.api_key, "GROQ_API_KEY-value");
        assert_eq!(settings.search.api_key, "explicit");
        assert_eq!(settings.embedding.api_key, "OPENAI_API_KEY-value");
    }

    #[test]
    fn test_thresholds_out_of_range_are_rejected() {
        let mut settings = parse(MINIMAL);
        settings.evaluator.approval_threshold = 1.5;

        let err = settings.validate().unwrap_err().to_string();
        assert!(err.contains("evaluator.approval_threshold"));
    }

    #[test]
    fn test_search_needs_key_to_count_as_configured() {
        let mut settings = parse(MINIMAL);
        assert!(!settings.search.is_configured());

        settings.search.api_key = "k".to_string();
        assert!(settings.search.is_configured());
    }
}
