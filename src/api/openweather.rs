//! Provides a client for the OpenWeather current weather, air pollution and
//! direct geocoding APIs.

use super::{Geocoder, WeatherSource};
use crate::error::{AppError, Result};
use crate::models::openweather::GeoMatch;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, error, info};

/// An asynchronous OpenWeather client.
pub struct OpenWeatherClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenWeatherClient {
    /// Creates a client against `base_url` (e.g. `https://api.openweathermap.org`).
    pub fn new(api_key: impl Into<String>, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("appid", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| {
                error!("Error requesting {}: {}", path, e);
                AppError::Api(e.into())
            })?;

        match response.error_for_status() {
            Ok(resp) => Ok(resp),
            Err(e) => {
                let status = e.status();
                error!(
                    "API request to {} failed with status {}: {}",
                    path,
                    status.unwrap_or_default(),
                    e
                );
                if status == Some(StatusCode::UNAUTHORIZED) {
                    error!("Received 401. Check OPENWEATHER_API_KEY validity.");
                } else if status == Some(StatusCode::TOO_MANY_REQUESTS) {
                    error!("Received 429. The API key has exceeded its call quota.");
                }
                Err(AppError::Api(e.into()))
            },
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.get(path, query).await?.json().await.map_err(|e| {
            error!("Error parsing API response JSON from {}: {}", path, e);
            AppError::Api(e.into())
        })
    }
}

#[async_trait]
impl Geocoder for OpenWeatherClient {
    async fn coordinates(&self, city_name: &str, country_code: &str) -> Result<(f64, f64)> {
        info!(city = city_name, country = country_code, "Geocoding city");
        let matches: Vec<GeoMatch> = self
            .get(
                "/geo/1.0/direct",
                &[
                    ("q", format!("{},{}", city_name, country_code)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?
            .json()
            .await
            .map_err(|e| {
                error!("Error parsing geocoding response: {}", e);
                AppError::Api(e.into())
            })?;

        let best = matches.into_iter().next().ok_or_else(|| {
            AppError::Geocoding(format!("no match for '{}' in {}", city_name, country_code))
        })?;
        debug!(
            city = city_name,
            matched = best.name.as_deref().unwrap_or("?"),
            country = best.country.as_deref().unwrap_or("?"),
            lon = best.lon,
            lat = best.lat,
            "Geocoding match"
        );
        Ok((best.lon, best.lat))
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn current(&self, longitude: f64, latitude: f64) -> Result<Value> {
        let query = [("lat", latitude.to_string()), ("lon", longitude.to_string())];
        let weather = self.get_json("/data/2.5/weather", &query).await?;
        let air = self.get_json("/data/2.5/air_pollution", &query).await?;
        Ok(json!({ "weather": weather, "air": air }))
    }
}
