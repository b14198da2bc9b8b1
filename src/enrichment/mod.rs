//! # Weather Enrichment
//!
//! When a user transcript asks about the weather somewhere, the relay looks up the
//! current conditions and injects them into the conversation as a synthetic
//! `system` message, so the assistant can answer with real data.
//!
//! ## Lookup Steps:
//! 1. **Extract**: `weather in <place>` / `weather at <place>` (case-insensitive)
//! 2. **Geocode**: place name → coordinates (first result only)
//! 3. **Forecast**: coordinates → current conditions
//! 4. **Format**: conditions (or the failure) → context message text
//!
//! Every failure is converted to text; nothing in here returns an error to the
//! session.

pub mod open_meteo;

pub use open_meteo::OpenMeteoClient;

use crate::error::RelayError;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static WEATHER_QUERY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)weather (?:in|at) ([A-Za-z\s]+)").expect("weather pattern is valid")
});

/// Find the place named in a weather question.
///
/// ## Examples:
/// - "What's the weather in Boston?" → Some("Boston")
/// - "how is the WEATHER AT new york" → Some("new york")
/// - "Tell me a joke" → None
pub fn extract_place(transcript: &str) -> Option<String> {
    WEATHER_QUERY
        .captures(transcript)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|place| !place.is_empty())
}

/// Latitude/longitude of a geocoded place.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Current weather at a location.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CurrentConditions {
    /// Degrees Celsius
    pub temperature: f64,
    /// km/h
    pub windspeed: f64,
    /// WMO weather interpretation code
    pub weathercode: f64,
    /// Observation time (ISO 8601, local to the location)
    pub time: String,
}

/// Outcome of one lookup. Produced per query and discarded after formatting.
#[derive(Debug, Clone, PartialEq)]
pub enum WeatherReport {
    /// Conditions were found
    Conditions {
        place: String,
        conditions: CurrentConditions,
    },
    /// The forecast response had no current conditions
    Missing { place: String },
    /// A lookup step failed
    Failed { message: String },
}

impl WeatherReport {
    /// Text of the synthetic context message.
    pub fn to_context_message(&self) -> String {
        match self {
            WeatherReport::Conditions { place, conditions } => format!(
                "Open-Meteo weather data for {}:\n\
                 - Temperature: {} °C\n\
                 - Wind Speed: {} km/h\n\
                 - Weather Code: {}\n\
                 - Time: {}\n\
                 (Use this info if the user asked about it.)",
                place,
                conditions.temperature,
                conditions.windspeed,
                conditions.weathercode,
                conditions.time
            ),
            WeatherReport::Missing { place } => {
                format!("No current weather data found for {}.", place)
            }
            WeatherReport::Failed { message } => format!("Weather data error: {}", message),
        }
    }
}

/// A source of geocoding and current-weather data.
///
/// Errors are `RelayError::Enrichment` carrying the text that ends up in the
/// context message.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// First matching location for `place`, or `None` when there are no results.
    async fn geocode(&self, place: &str) -> Result<Option<Coordinates>, RelayError>;

    /// Current conditions at `coordinates`, or `None` when the response has none.
    async fn current_conditions(
        &self,
        coordinates: Coordinates,
    ) -> Result<Option<CurrentConditions>, RelayError>;
}

/// Run the two-step lookup for `place`. Never fails; failures become reports.
pub async fn lookup(provider: &dyn WeatherProvider, place: &str) -> WeatherReport {
    let coordinates = match provider.geocode(place).await {
        Ok(Some(coordinates)) => coordinates,
        Ok(None) => {
            return WeatherReport::Failed {
                message: format!("Could not find location for city: {}", place),
            }
        }
        Err(e) => return WeatherReport::Failed { message: e.to_string() },
    };

    match provider.current_conditions(coordinates).await {
        Ok(Some(conditions)) => WeatherReport::Conditions {
            place: place.to_string(),
            conditions,
        },
        Ok(None) => WeatherReport::Missing {
            place: place.to_string(),
        },
        Err(e) => WeatherReport::Failed { message: e.to_string() },
    }
}
