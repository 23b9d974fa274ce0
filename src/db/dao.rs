//! Storage contracts, one per entity family.
//!
//! Callers hold `Box<dyn ...Dao>` and never learn which backend is behind it.
//! Every implementation follows the same rules:
//!
//! * a key that resolves to nothing is `AppError::NotFound`, on reads and deletes alike;
//! * driver faults surface as data-access errors (see [`AppError::is_data_access`]);
//! * nested entities are resolved in full or the whole read fails;
//! * `insert` is an upsert on the natural key and may be repeated safely;
//! * after `close`, every call fails with `AppError::DataAccess` without touching the store.
//!
//! [`AppError::is_data_access`]: crate::error::AppError::is_data_access

use crate::error::{AppError, Result};
use crate::models::{City, Country, GeneralWeather, WeatherStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Which storage implementation backs the DAOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    Postgres,
    #[value(name = "mongodb")]
    MongoDb,
}

impl FromStr for Backend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "mongodb" | "mongo" => Ok(Backend::MongoDb),
            other => Err(AppError::Config(format!(
                "unknown storage backend '{}' (expected postgres or mongodb)",
                other
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Postgres => write!(f, "postgres"),
            Backend::MongoDb => write!(f, "mongodb"),
        }
    }
}

/// How a single city is looked up.
#[derive(Debug, Clone, PartialEq)]
pub enum CityKey {
    Id(i64),
    /// First city (lowest id) with exactly this name.
    Name(String),
}

impl fmt::Display for CityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CityKey::Id(id) => write!(f, "city {}", id),
            CityKey::Name(name) => write!(f, "city '{}'", name),
        }
    }
}

#[async_trait]
pub trait CountryDao: Send + Sync {
    /// The country with all of its records, oldest first. `code` may be alpha-2 or alpha-3.
    async fn get(&self, code: &str) -> Result<Country>;

    /// Upserts the country and appends any records not stored yet.
    async fn insert(&self, country: &Country) -> Result<()>;

    /// Removes the country together with its records and cities.
    async fn delete(&self, code: &str) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait CityDao: Send + Sync {
    async fn get(&self, key: &CityKey) -> Result<City>;

    /// All cities of one country, ordered by id. An empty list is not an error.
    async fn get_all(&self, country_code: &str) -> Result<Vec<City>>;

    /// Upserts the city and its country as one unit of work.
    async fn insert(&self, city: &City) -> Result<()>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// Deletes every city of the country; fails with `NotFound` if there was none.
    async fn delete_all(&self, country_code: &str) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait GeneralWeatherDao: Send + Sync {
    async fn get(&self, status_id: &str) -> Result<GeneralWeather>;

    async fn get_all(&self) -> Result<Vec<GeneralWeather>>;

    async fn insert(&self, general_weather: &GeneralWeather) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait WeatherStatusDao: Send + Sync {
    async fn get(&self, city_id: i64, collect_time: DateTime<Utc>) -> Result<WeatherStatus>;

    /// Full history of one city, oldest first.
    async fn get_all(&self, city_id: i64) -> Result<Vec<WeatherStatus>>;

    /// Upserts the snapshot and replaces its whole condition-tag set.
    async fn insert(&self, status: &WeatherStatus) -> Result<()>;

    async fn delete(&self, city_id: i64, collect_time: DateTime<Utc>) -> Result<()>;

    async fn delete_all(&self, city_id: i64) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

pub(crate) fn closed() -> AppError {
    AppError::DataAccess("connection is closed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("postgres", Backend::Postgres)]
    #[case("PostgreSQL", Backend::Postgres)]
    #[case("MongoDB", Backend::MongoDb)]
    #[case(" mongo ", Backend::MongoDb)]
    fn test_backend_parse(#[case] input: &str, #[case] expected: Backend) {
        assert_eq!(input.parse::<Backend>().unwrap(), expected);
    }

    #[test]
    fn test_backend_parse_rejects_unknown() {
        assert!(matches!("mysql".parse::<Backend>(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_city_key_display() {
        assert_eq!(CityKey::Id(7).to_string(), "city 7");
        assert_eq!(CityKey::Name("Hue".into()).to_string(), "city 'Hue'");
    }
}
