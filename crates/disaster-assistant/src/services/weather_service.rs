use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lopdf::Document as PdfDocument;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::WeatherConfig;
use crate::services::providers::WeatherDataProvider;
use crate::utils::error::CapabilityError;
use crate::utils::limiters::Limiters;

/// IMD Bhubaneswar bulletin PDFs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletinKind {
    Evening,
    Rainfall,
    CoastalWarning,
    WeeklyRainfall,
    FishermenWarning,
    CompositeBulletin,
}

impl BulletinKind {
    pub const ALL: [BulletinKind; 6] = [
        Self::Evening,
        Self::Rainfall,
        Self::CoastalWarning,
        Self::WeeklyRainfall,
        Self::FishermenWarning,
        Self::CompositeBulletin,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Evening => "Evening.pdf",
            Self::Rainfall => "daily.pdf",
            Self::CoastalWarning => "coastal.pdf",
            Self::WeeklyRainfall => "weekly.pdf",
            Self::FishermenWarning => "fishermen.pdf",
            Self::CompositeBulletin => "composite.pdf",
        }
    }

    /// Upper-case name used in the answer prefix
    pub fn label(&self) -> &'static str {
        match self {
            Self::Evening => "EVENING",
            Self::Rainfall => "RAINFALL",
            Self::CoastalWarning => "COASTAL",
            Self::WeeklyRainfall => "WEEKLY",
            Self::FishermenWarning => "FISHERMEN",
            Self::CompositeBulletin => "COMPOSITE",
        }
    }
}

// ===== STATION RECORD =====

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateInfo {
    pub day: Option<String>,
    pub full_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: Option<String>,
    pub departure: Option<String>,
    pub time_ist: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RainfallReading {
    pub value: Option<String>,
    pub time_ist: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumidityReading {
    pub morning: Option<String>,
    pub evening: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Past24Hours {
    pub maximum: Option<Reading>,
    pub minimum: Option<Reading>,
    pub rainfall: Option<RainfallReading>,
    pub humidity: Option<HumidityReading>,
}

impl Past24Hours {
    fn is_empty(&self) -> bool {
        self.maximum.is_none()
            && self.minimum.is_none()
            && self.rainfall.is_none()
            && self.humidity.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SunMoon {
    pub sunset_today: Option<String>,
    pub sunrise_tomorrow: Option<String>,
    pub moonrise: Option<String>,
    pub moonset: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: Option<String>,
    pub temp_max: Option<String>,
    pub temp_min: Option<String>,
    pub humidity_max: Option<String>,
    pub humidity_min: Option<String>,
    pub condition: Option<String>,
}

/// Structured snapshot of one IMD city-weather page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationReport {
    pub station_id: u32,
    pub url: String,
    pub source: String,
    pub scraped_at_utc: DateTime<Utc>,
    pub date_info: DateInfo,
    pub past_24_hours: Past24Hours,
    pub sun_moon: SunMoon,
    pub forecast_7_days: Vec<ForecastDay>,
}

// ===== SERVICE =====

#[derive(Clone)]
pub struct ImdWeatherService {
    client: Client,
    config: WeatherConfig,
    limiters: Limiters,
}

impl ImdWeatherService {
    pub fn new(config: WeatherConfig, limiters: Limiters) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
            limiters,
        }
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds.max(1))
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, CapabilityError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Status { status, body });
        }
        Ok(response)
    }

    async fn load_station(&self, station_id: u32) -> Result<StationReport, CapabilityError> {
        let url = self.config.station_url.replace("{id}", &station_id.to_string());
        debug!("Fetching IMD station page {}", url);

        let html = self.get(&url).await?.text().await?;
        parse_station_page(&html, station_id, &url)
    }

    async fn load_bulletin(&self, kind: BulletinKind) -> Result<String, CapabilityError> {
        let url = format!(
            "{}/{}",
            self.config.bulletin_base_url.trim_end_matches('/'),
            kind.file_name()
        );
        debug!("Fetching IMD bulletin {}", url);

        let bytes = self.get(&url).await?.bytes().await?;
        extract_pdf_text(&bytes)
    }
}

#[async_trait]
impl WeatherDataProvider for ImdWeatherService {
    async fn fetch_station(&self, station_id: u32) -> Result<StationReport, CapabilityError> {
        self.limiters
            .run(
                &self.limiters.weather,
                "weather station",
                self.call_timeout(),
                self.load_station(station_id),
            )
            .await
    }

    async fn fetch_bulletin(&self, kind: BulletinKind) -> Result<String, CapabilityError> {
        self.limiters
            .run(
                &self.limiters.weather,
                "weather bulletin",
                self.call_timeout(),
                self.load_bulletin(kind),
            )
            .await
    }
}

// ===== EXTRACTION =====

/// Text of the first page of a bulletin PDF.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, CapabilityError> {
    let doc = PdfDocument::load_mem(bytes)
        .map_err(|e| CapabilityError::Parse(format!("Failed to load PDF: {}", e)))?;

    let first_page = doc
        .get_pages()
        .keys()
        .next()
        .copied()
        .ok_or_else(|| CapabilityError::Parse("PDF is empty".to_string()))?;

    let text = doc
        .extract_text(&[first_page])
        .map_err(|e| CapabilityError::Parse(format!("Failed to extract PDF text: {}", e)))?;

    let text = text.trim();
    if text.is_empty() {
        return Err(CapabilityError::Parse("Could not extract text from PDF".to_string()));
    }
    Ok(text.to_string())
}

struct PageSelectors {
    span: Selector,
    p: Selector,
    li: Selector,
    h3: Selector,
    card: Selector,
    card_date: Selector,
    float_end: Selector,
    condition: Selector,
}

impl PageSelectors {
    fn new() -> Result<Self, CapabilityError> {
        let parse = |css: &str| {
            Selector::parse(css)
                .map_err(|e| CapabilityError::Parse(format!("invalid selector {}: {:?}", css, e)))
        };
        Ok(Self {
            span: parse("span")?,
            p: parse("p")?,
            li: parse("li")?,
            h3: parse("h3")?,
            card: parse("div.min-h-32")?,
            card_date: parse("span.text-blue-700")?,
            float_end: parse("span.float-end")?,
            condition: parse("p.text-gray-600")?,
        })
    }
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

fn next_sibling_named<'a>(el: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    el.next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|sib| sib.value().name() == name)
}

fn prev_sibling_named<'a>(el: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    el.prev_siblings()
        .filter_map(ElementRef::wrap)
        .find(|sib| sib.value().name() == name)
}

/// First two whitespace tokens, e.g. "29 16" on a forecast card.
fn leading_pair(el: Option<ElementRef<'_>>) -> (Option<String>, Option<String>) {
    let text = el.map(text_of).unwrap_or_default();
    let mut tokens = text.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some(a), Some(b)) => (Some(a.to_string()), Some(b.to_string())),
        _ => (None, None),
    }
}

/// Parse the IMD city-weather page into a [`StationReport`].
pub fn parse_station_page(html: &str, station_id: u32, url: &str) -> Result<StationReport, CapabilityError> {
    let sel = PageSelectors::new()?;
    let document = Html::parse_document(html);

    let paragraph_with = |needle: &str| document.select(&sel.p).find(|p| text_of(*p).contains(needle));

    // Date: "<span>Monday</span><span>December 01, 2025</span>"
    let date_info = document
        .select(&sel.span)
        .find(|span| {
            let text = text_of(*span);
            text.contains(',') && text.contains("20")
        })
        .map(|span| DateInfo {
            day: prev_sibling_named(span, "span").map(text_of).and_then(non_empty),
            full_date: non_empty(text_of(span)),
        })
        .unwrap_or_default();

    let mut past_24_hours = Past24Hours::default();
    if let Some(list) = paragraph_with("Past 24 Hours Overview").and_then(|p| next_sibling_named(p, "ul")) {
        for li in list.select(&sel.li) {
            let li_text = text_of(li);
            let time_ist = li.select(&sel.span).next().map(text_of).and_then(non_empty);
            let value_text = li.select(&sel.p).next().map(text_of).unwrap_or_default();
            let tokens: Vec<String> = value_text
                .replace('|', " ")
                .split_whitespace()
                .map(str::to_string)
                .collect();

            if li_text.contains("Maximum") || li_text.contains("Minimum") {
                let reading = Reading {
                    value: tokens.first().cloned(),
                    departure: tokens.get(1).cloned(),
                    time_ist,
                };
                if li_text.contains("Maximum") {
                    past_24_hours.maximum = Some(reading);
                } else {
                    past_24_hours.minimum = Some(reading);
                }
            } else if li_text.contains("Rainfall") {
                past_24_hours.rainfall = Some(RainfallReading {
                    value: tokens.iter().find(|t| t.contains("mm")).cloned(),
                    time_ist,
                });
            } else if li_text.contains("Humidity") {
                let mut percents = tokens.iter().filter(|t| t.contains('%')).cloned();
                past_24_hours.humidity = Some(HumidityReading {
                    morning: percents.next(),
                    evening: percents.next(),
                });
            }
        }
    }

    let time_for = |label: &str| {
        paragraph_with(label)
            .and_then(|p| prev_sibling_named(p, "h3"))
            .map(text_of)
            .and_then(non_empty)
    };
    let sun_moon = SunMoon {
        sunset_today: time_for("Sunset (Today)"),
        sunrise_tomorrow: time_for("Sunrise (Tomorrow)"),
        moonrise: time_for("Moonrise"),
        moonset: time_for("Moonset"),
    };

    let forecast_7_days: Vec<ForecastDay> = paragraph_with("7 days forecast")
        .and_then(|p| next_sibling_named(p, "div"))
        .map(|container| {
            container
                .select(&sel.card)
                .map(|card| {
                    let (temp_max, temp_min) = leading_pair(card.select(&sel.h3).nth(1));
                    let (humidity_max, humidity_min) = leading_pair(card.select(&sel.float_end).last());

                    ForecastDay {
                        date: card.select(&sel.card_date).next().map(text_of).and_then(non_empty),
                        temp_max,
                        temp_min,
                        humidity_max,
                        humidity_min,
                        condition: card.select(&sel.condition).next().map(text_of).and_then(non_empty),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    if date_info.full_date.is_none() && past_24_hours.is_empty() && forecast_7_days.is_empty() {
        warn!("IMD page for station {} had no recognizable weather sections", station_id);
        return Err(CapabilityError::Parse(format!(
            "no weather data found on station page {}",
            url
        )));
    }

    Ok(StationReport {
        station_id,
        url: url.to_string(),
        source: "IMD_CITY_PAGE".to_string(),
        scraped_at_utc: Utc::now(),
        date_info,
        past_24_hours,
        sun_moon,
        forecast_7_days,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATION_PAGE: &str = r#"
<html><body>
  <div class="header"><span>Monday</span><span>December 01, 2025</span></div>
  <section>
    <p>Weather<br>Past 24 Hours Overview</p>
    <ul>
      <li>Maximum | Dep <span>1730 IST</span><p>28.2°C | -2.0</p></li>
      <li>Minimum | Dep <span>0830 IST</span><p>16.0°C | 1.2</p></li>
      <li>Rainfall <span>0830 IST</span><p>000.0mm</p></li>
      <li>Humidity <span>1730 IST | 0830 IST</span><p>68% | 66%</p></li>
    </ul>
  </section>
  <section>
    <div><h3>17:05</h3><p>Sunset (Today)</p></div>
    <div><h3>06:05</h3><p>Sunrise (Tomorrow)</p></div>
    <div><h3>13:16</h3><p>Moonrise</p></div>
  </section>
  <section>
    <p>7 days forecast</p>
    <div>
      <div class="min-h-32 card">
        <span class="text-blue-700">1-DEC</span>
        <h3>Temperature <span class="float-end">Humidity</span></h3>
        <h3>29 16</h3>
        <span class="float-end">80 45</span>
        <h3>Forecast</h3>
        <p class="text-gray-600">Partly cloudy sky</p>
      </div>
      <div class="min-h-32 card">
        <span class="text-blue-700">2-DEC</span>
        <h3>Temperature</h3>
        <h3>30 17</h3>
        <p class="text-gray-600">Mainly clear sky</p>
      </div>
    </div>
  </section>
</body></html>
"#;

    #[test]
    fn test_parse_station_page_sections() {
        let report = parse_station_page(STATION_PAGE, 42971, "https://example/42971").unwrap();

        assert_eq!(report.date_info.day.as_deref(), Some("Monday"));
        assert_eq!(report.date_info.full_date.as_deref(), Some("December 01, 2025"));

        let max = report.past_24_hours.maximum.unwrap();
        assert_eq!(max.value.as_deref(), Some("28.2°C"));
        assert_eq!(max.departure.as_deref(), Some("-2.0"));
        assert_eq!(max.time_ist.as_deref(), Some("1730 IST"));
        assert_eq!(report.past_24_hours.rainfall.unwrap().value.as_deref(), Some("000.0mm"));
        let humidity = report.past_24_hours.humidity.unwrap();
        assert_eq!(humidity.morning.as_deref(), Some("68%"));
        assert_eq!(humidity.evening.as_deref(), Some("66%"));

        assert_eq!(report.sun_moon.sunset_today.as_deref(), Some("17:05"));
        assert_eq!(report.sun_moon.moonrise.as_deref(), Some("13:16"));
        assert_eq!(report.sun_moon.moonset, None);
    }

    #[test]
    fn test_parse_station_forecast_cards() {
        let report = parse_station_page(STATION_PAGE, 42971, "u").unwrap();

        assert_eq!(report.forecast_7_days.len(), 2);
        let first = &report.forecast_7_days[0];
        assert_eq!(first.date.as_deref(), Some("1-DEC"));
        assert_eq!(first.temp_max.as_deref(), Some("29"));
        assert_eq!(first.temp_min.as_deref(), Some("16"));
        assert_eq!(first.humidity_max.as_deref(), Some("80"));
        assert_eq!(first.condition.as_deref(), Some("Partly cloudy sky"));
        assert_eq!(report.forecast_7_days[1].humidity_max, None);
    }

    #[test]
    fn test_unrelated_page_is_parse_error() {
        let err = parse_station_page("<html><body><p>Not found</p></body></html>", 1, "u").unwrap_err();
        assert!(matches!(err, CapabilityError::Parse(_)));
    }

    #[test]
    fn test_garbage_pdf_is_parse_error() {
        assert!(matches!(extract_pdf_text(b"not a pdf"), Err(CapabilityError::Parse(_))));
    }

    #[test]
    fn test_bulletin_files_are_distinct() {
        let mut files: Vec<_> = BulletinKind::ALL.iter().map(|k| k.file_name()).collect();
        files.sort();
        files.dedup();
        assert_eq!(files.len(), 6);
        assert_eq!(BulletinKind::Rainfall.file_name(), "daily.pdf");
    }
}
