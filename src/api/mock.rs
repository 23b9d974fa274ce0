//! Scriptable stand-in for the OpenWeather collaborators.
//!
//! A `MockProvider` answers geocoding and weather calls from preset maps and
//! records every call, so tests can assert on how often the network would
//! have been hit.

use super::{Geocoder, WeatherSource};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
pub struct MockApiState {
    /// city name -> (longitude, latitude)
    pub coordinates: HashMap<String, (f64, f64)>,
    /// Payload per longitude, keyed by `longitude.to_string()`.
    pub payloads: HashMap<String, Value>,

    pub geocode_calls: Vec<(String, String)>,
    pub weather_calls: Vec<(f64, f64)>,
}

#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockApiState>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockApiState> {
        self.state.lock().unwrap()
    }

    pub fn expect_coordinates(&self, city_name: &str, coordinates: (f64, f64)) {
        self.state()
            .coordinates
            .insert(city_name.to_string(), coordinates);
    }

    pub fn expect_payload(&self, longitude: f64, payload: Value) {
        self.state().payloads.insert(longitude.to_string(), payload);
    }
}

#[async_trait]
impl Geocoder for MockProvider {
    async fn coordinates(&self, city_name: &str, country_code: &str) -> Result<(f64, f64)> {
        let mut state = self.state();
        state
            .geocode_calls
            .push((city_name.to_string(), country_code.to_string()));
        state.coordinates.get(city_name).copied().ok_or_else(|| {
            AppError::Geocoding(format!("no match for '{}' in {}", city_name, country_code))
        })
    }
}

#[async_trait]
impl WeatherSource for MockProvider {
    async fn current(&self, longitude: f64, latitude: f64) -> Result<Value> {
        let mut state = self.state();
        state.weather_calls.push((longitude, latitude));
        state
            .payloads
            .get(&longitude.to_string())
            .cloned()
            .ok_or_else(|| AppError::DataAccess(format!("no payload for lon {}", longitude)))
    }
}

/// A complete combined payload observed at unix time `dt`.
pub fn sample_payload(dt: i64) -> Value {
    json!({
        "weather": {
            "coord": {"lon": 105.8, "lat": 21.0},
            "weather": [
                {"id": 804, "main": "Clouds", "description": "overcast clouds"},
                {"id": 500, "main": "Rain", "description": "light rain"}
            ],
            "main": {
                "temp": 301.15, "feels_like": 304.2, "pressure": 1008, "humidity": 74,
                "sea_level": 1008, "grnd_level": 1007
            },
            "visibility": 10000,
            "wind": {"speed": 3.1, "deg": 140},
            "clouds": {"all": 100},
            "rain": {"1h": 0.35},
            "dt": dt,
            "sys": {"country": "VN", "sunrise": dt - 20_000, "sunset": dt + 20_000}
        },
        "air": {
            "list": [{"main": {"aqi": 3}, "components": {"pm2_5": 31.5}, "dt": dt}]
        }
    })
}
