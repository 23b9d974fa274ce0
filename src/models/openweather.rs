//! Deserialization targets for the OpenWeather current-weather, air-pollution and
//! geocoding responses. Only the fields the transform reads are declared; a field
//! declared without `Option` is required and its absence fails deserialization.

use serde::Deserialize;

/// The combined payload handed to the transform step: `{"weather": ..., "air": ...}`.
#[derive(Debug, Deserialize, Clone)]
pub struct RawWeatherPayload {
    pub weather: CurrentWeather,
    pub air: AirPollution,
}

/// `/data/2.5/weather`
#[derive(Debug, Deserialize, Clone)]
pub struct CurrentWeather {
    /// Observation time, unix seconds.
    pub dt: i64,
    pub main: MainBlock,
    pub visibility: i64,
    pub wind: Wind,
    pub clouds: Clouds,
    pub rain: Option<Rain>,
    pub sys: Sys,
    pub weather: Vec<Condition>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MainBlock {
    pub temp: f64,
    pub feels_like: f64,
    pub pressure: i64,
    pub humidity: i64,
    pub sea_level: i64,
    pub grnd_level: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Wind {
    pub speed: f64,
    pub deg: i64,
    pub gust: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Clouds {
    pub all: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rain {
    #[serde(rename = "1h")]
    pub one_hour: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Sys {
    pub sunrise: i64,
    pub sunset: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Condition {
    pub id: Option<i64>,
    /// Condition group, used as the tag id ("Clouds", "Rain", ...).
    pub main: String,
    pub description: Option<String>,
}

/// `/data/2.5/air_pollution`
#[derive(Debug, Deserialize, Clone)]
pub struct AirPollution {
    pub list: Vec<AirSample>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AirSample {
    pub main: AirIndex,
    pub components: AirComponents,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AirIndex {
    pub aqi: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AirComponents {
    pub pm2_5: f64,
}

/// One match from `/geo/1.0/direct`.
#[derive(Debug, Deserialize, Clone)]
pub struct GeoMatch {
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub country: Option<String>,
}
