use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::{Responder, ResponderOutput};
use crate::config::settings::LocationConfig;
use crate::models::chat::ChatMessage;
use crate::services::providers::{GenerationProvider, WeatherDataProvider};
use crate::services::weather_service::BulletinKind;
use crate::utils::error::CapabilityError;

const BULLETIN_KEYWORDS: [&str; 9] = [
    "pdf", "bulletin", "warning", "advisory", "coastal", "fishermen", "rainfall", "weekly", "composite",
];

// Checked in order; the last match wins.
const BULLETIN_SELECTORS: [(&str, BulletinKind); 5] = [
    ("coastal", BulletinKind::CoastalWarning),
    ("fishermen", BulletinKind::FishermenWarning),
    ("rainfall", BulletinKind::Rainfall),
    ("weekly", BulletinKind::WeeklyRainfall),
    ("composite", BulletinKind::CompositeBulletin),
];

const ODISHA_STATIONS: [(&str, u32); 15] = [
    ("bhubaneswar", 42971),
    ("cuttack", 42963),
    ("puri", 43053),
    ("sambalpur", 42823),
    ("balasore", 43185),
    ("berhampur", 43279),
    ("rourkela", 42793),
    ("kendrapara", 93261),
    ("khordha", 88834),
    ("jagatsinghpur", 93260),
    ("paradip", 42976),
    ("bhadrak", 43183),
    ("angul", 42841),
    ("dhenkanal", 42891),
    ("jajpur", 93259),
];

#[derive(Error, Debug)]
pub enum WeatherStageError {
    #[error("❌ PDF Error: {0}")]
    Bulletin(CapabilityError),

    #[error("❌ IMD station not found for: {0}")]
    StationNotFound(String),

    #[error("❌ Weather data error: {0}")]
    DataFetch(CapabilityError),
}

/// Known locations and their IMD station ids, in match order.
#[derive(Debug, Clone)]
pub struct Gazetteer {
    entries: Vec<(String, Option<u32>)>,
    default_location: String,
}

impl Gazetteer {
    pub fn odisha() -> Self {
        Self {
            entries: ODISHA_STATIONS
                .iter()
                .map(|(name, id)| (name.to_string(), Some(*id)))
                .collect(),
            default_location: "bhubaneswar".to_string(),
        }
    }

    pub fn with_default(mut self, location: &str) -> Self {
        let location = location.trim().to_lowercase();
        if !location.is_empty() {
            self.default_location = location;
        }
        self
    }

    /// Append operator-supplied locations after the built-in ones.
    pub fn with_extra(mut self, extra: &[LocationConfig]) -> Self {
        for loc in extra {
            let name = loc.name.trim().to_lowercase();
            if name.is_empty() || self.entries.iter().any(|(known, _)| *known == name) {
                continue;
            }
            self.entries.push((name, loc.station_id));
        }
        self
    }

    /// First known location mentioned in `query`, else the default.
    pub fn detect(&self, query: &str) -> String {
        let q = query.to_lowercase();
        self.entries
            .iter()
            .find(|(name, _)| q.contains(name.as_str()))
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| self.default_location.clone())
    }

    pub fn station_id(&self, location: &str) -> Option<u32> {
        let location = location.trim().to_lowercase();
        self.entries
            .iter()
            .find(|(name, _)| *name == location)
            .and_then(|(_, id)| *id)
    }
}

/// Bulletin requested by `query`, if any.
pub fn detect_bulletin(query: &str) -> Option<BulletinKind> {
    let q = query.to_lowercase();
    if !BULLETIN_KEYWORDS.iter().any(|k| q.contains(k)) {
        return None;
    }
    let kind = BULLETIN_SELECTORS
        .iter()
        .filter(|(keyword, _)| q.contains(keyword))
        .map(|(_, kind)| *kind)
        .last()
        .unwrap_or(BulletinKind::Evening);
    Some(kind)
}

/// IMD bulletins verbatim, or a station summary written by the model.
pub struct WeatherResponder {
    data: Arc<dyn WeatherDataProvider>,
    generator: Arc<dyn GenerationProvider>,
    gazetteer: Gazetteer,
}

impl WeatherResponder {
    pub fn new(
        data: Arc<dyn WeatherDataProvider>,
        generator: Arc<dyn GenerationProvider>,
        gazetteer: Gazetteer,
    ) -> Self {
        Self {
            data,
            generator,
            gazetteer,
        }
    }

    async fn bulletin(&self, kind: BulletinKind) -> ResponderOutput {
        debug!("Weather query asks for {:?} bulletin", kind);
        match self.data.fetch_bulletin(kind).await {
            Ok(text) => ResponderOutput::text(format!("📄 IMD {} BULLETIN:\n\n{}", kind.label(), text)),
            Err(e) => {
                warn!("Bulletin fetch failed: {}", e);
                ResponderOutput::text(WeatherStageError::Bulletin(e).to_string())
            }
        }
    }
}

#[async_trait]
impl Responder for WeatherResponder {
    async fn respond(&self, query: &str) -> ResponderOutput {
        if let Some(kind) = detect_bulletin(query) {
            return self.bulletin(kind).await;
        }

        let location = self.gazetteer.detect(query);
        let Some(station_id) = self.gazetteer.station_id(&location) else {
            return ResponderOutput::text(WeatherStageError::StationNotFound(location).to_string());
        };

        let report = match self.data.fetch_station(station_id).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Station {} fetch failed: {}", station_id, e);
                return ResponderOutput::text(WeatherStageError::DataFetch(e).to_string());
            }
        };
        let report_json = serde_json::to_string_pretty(&report).unwrap_or_default();

        let prompt = format!(
            "You are an expert IMD forecaster. Summarize the weather conditions based on this data.\n\n\
             Location: {}\nStation ID: {}\n\n\
             Weather Data (JSON):\n{}\n\n\
             User Query: \"{}\"\n\n\
             Write a simple, accurate 4–6 sentence weather summary.",
            location, station_id, report_json, query
        );

        match self.generator.generate(&[ChatMessage::user(prompt)]).await {
            Ok(summary) if !summary.trim().is_empty() => {
                ResponderOutput::with_context(summary.trim(), report_json)
            }
            Ok(_) => ResponderOutput::with_context(report_json.clone(), report_json),
            Err(e) => {
                warn!("Weather summary failed, returning raw station data: {}", e);
                ResponderOutput::with_context(report_json.clone(), report_json)
            }
        }
    }
}
