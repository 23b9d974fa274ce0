//! External collaborators: geocoding and current weather/air quality.
//!
//! The business layer depends on the two traits only; `OpenWeatherClient`
//! implements both against the OpenWeather HTTP API.

#[cfg(test)]
pub mod mock;
mod openweather;

pub use openweather::*;

use crate::error::Result;
use async_trait::async_trait;

/// Resolves a city name to coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `(longitude, latitude)` of the best match, or an error if nothing matches.
    async fn coordinates(&self, city_name: &str, country_code: &str) -> Result<(f64, f64)>;
}

/// Fetches the raw current-conditions payload for a location.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// `{"weather": <current weather>, "air": <air pollution>}`
    async fn current(&self, longitude: f64, latitude: f64) -> Result<serde_json::Value>;
}
