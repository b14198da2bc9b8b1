//! Open-Meteo geocoding and forecast client.

use crate::config::EnrichmentConfig;
use crate::enrichment::{Coordinates, CurrentConditions, WeatherProvider};
use crate::error::RelayError;

use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<Coordinates>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current_weather: Option<CurrentConditions>,
}

/// `WeatherProvider` backed by the public Open-Meteo APIs.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    http: reqwest::Client,
    geocoding_url: String,
    forecast_url: String,
}

impl OpenMeteoClient {
    pub fn new(config: &EnrichmentConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            geocoding_url: config.geocoding_url.trim_end_matches('/').to_string(),
            forecast_url: config.forecast_url.trim_end_matches('/').to_string(),
        }
    }
}

fn transport(e: reqwest::Error) -> RelayError {
    RelayError::Enrichment(e.to_string())
}

#[async_trait]
impl WeatherProvider for OpenMeteoClient {
    async fn geocode(&self, place: &str) -> Result<Option<Coordinates>, RelayError> {
        let response = self
            .http
            .get(format!("{}/v1/search", self.geocoding_url))
            .query(&[("name", place), ("count", "1")])
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(RelayError::Enrichment(format!(
                "Geocoding error. Server returned {}",
                response.status().as_u16()
            )));
        }

        let body: GeocodingResponse = response.json().await.map_err(transport)?;
        Ok(body.results.into_iter().next())
    }

    async fn current_conditions(
        &self,
        coordinates: Coordinates,
    ) -> Result<Option<CurrentConditions>, RelayError> {
        let latitude = coordinates.latitude.to_string();
        let longitude = coordinates.longitude.to_string();

        let response = self
            .http
            .get(format!("{}/v1/forecast", self.forecast_url))
            .query(&[
                ("latitude", latitude.as_str()),
                ("longitude", longitude.as_str()),
                ("current_weather", "true"),
            ])
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(RelayError::Enrichment(format!(
                "Weather API error. Server returned {}",
                response.status().as_u16()
            )));
        }

        let body: ForecastResponse = response.json().await.map_err(transport)?;
        Ok(body.current_weather)
    }
}
