//! Capability seams of the orchestration core.
//!
//! Every external collaborator (generation model, document store, web search,
//! IMD weather sources) is reached through one of these traits. Concrete
//! adapters live next to this module; tests swap in mocks or scripted fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::chat::ChatMessage;
use crate::services::weather_service::{BulletinKind, StationReport};
use crate::utils::error::CapabilityError;

/// A passage returned by document retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub content: String,
    pub source: String,
    pub page: Option<u32>,
    pub score: f32,
}

/// One organic web search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, CapabilityError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RetrievalProvider: Send + Sync {
    /// Top-`k` passages for `query`. An empty list is a valid answer.
    async fn retrieve(&self, query: &str, k: usize)
        -> Result<Vec<RetrievedPassage>, CapabilityError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, CapabilityError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherDataProvider: Send + Sync {
    async fn fetch_station(&self, station_id: u32) -> Result<StationReport, CapabilityError>;
    async fn fetch_bulletin(&self, kind: BulletinKind) -> Result<String, CapabilityError>;
}
