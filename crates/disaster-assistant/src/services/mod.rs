pub mod conversation;
pub mod embedding_service;
pub mod llm_service;
pub mod providers;
pub mod retrieval_service;
pub mod search_service;
pub mod weather_service;
pub mod workflow;

pub use embedding_service::EmbeddingService;
pub use llm_service::LlmService;
pub use retrieval_service::ChromaRetriever;
pub use search_service::SerperSearch;
pub use weather_service::ImdWeatherService;
