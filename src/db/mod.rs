//! Storage layer: DAO contracts, the statement store and both backends.
//!
//! Code outside this module asks for DAOs through the functions below and gets
//! trait objects back. Each DAO opens its own connection.

mod dao;
#[cfg(test)]
pub mod memory;
mod mongo;
mod postgres;
pub mod statements;

pub use dao::{Backend, CityDao, CityKey, CountryDao, GeneralWeatherDao, WeatherStatusDao};

use crate::config::Config;
use crate::error::Result;
use statements::StatementStore;
use tracing::info;

pub async fn country_dao(config: &Config) -> Result<Box<dyn CountryDao>> {
    Ok(match config.backend {
        Backend::Postgres => Box::new(
            postgres::PgCountryDao::connect(&config.database_url, &statement_store(config))
                .await?,
        ),
        Backend::MongoDb => Box::new(
            mongo::MongoCountryDao::connect(&config.mongodb_uri, &config.mongodb_database).await?,
        ),
    })
}

pub async fn city_dao(config: &Config) -> Result<Box<dyn CityDao>> {
    Ok(match config.backend {
        Backend::Postgres => Box::new(
            postgres::PgCityDao::connect(&config.database_url, &statement_store(config)).await?,
        ),
        Backend::MongoDb => Box::new(
            mongo::MongoCityDao::connect(&config.mongodb_uri, &config.mongodb_database).await?,
        ),
    })
}

pub async fn general_weather_dao(config: &Config) -> Result<Box<dyn GeneralWeatherDao>> {
    Ok(match config.backend {
        Backend::Postgres => Box::new(
            postgres::PgGeneralWeatherDao::connect(&config.database_url, &statement_store(config))
                .await?,
        ),
        Backend::MongoDb => Box::new(
            mongo::MongoGeneralWeatherDao::connect(&config.mongodb_uri, &config.mongodb_database)
                .await?,
        ),
    })
}

pub async fn weather_status_dao(config: &Config) -> Result<Box<dyn WeatherStatusDao>> {
    Ok(match config.backend {
        Backend::Postgres => Box::new(
            postgres::PgWeatherStatusDao::connect(&config.database_url, &statement_store(config))
                .await?,
        ),
        Backend::MongoDb => Box::new(
            mongo::MongoWeatherStatusDao::connect(&config.mongodb_uri, &config.mongodb_database)
                .await?,
        ),
    })
}

/// Creates tables/collections, natural-key indexes and the condition-group seed.
/// Safe to run repeatedly.
pub async fn initialize(config: &Config) -> Result<()> {
    info!(backend = %config.backend, "Initializing storage");
    match config.backend {
        Backend::Postgres => {
            let store = statement_store(config);
            let mut handle = postgres::PgHandle::connect(&config.database_url).await?;
            let pool = handle.pool()?;
            if postgres::is_schema_initialized(pool, &store).await? {
                info!("Schema already present, re-applying idempotent statements");
            }
            let outcome = postgres::init_schema(pool, &store).await;
            handle.close().await?;
            outcome
        },
        Backend::MongoDb => {
            mongo::init_collections(&config.mongodb_uri, &config.mongodb_database).await
        },
    }
}

fn statement_store(config: &Config) -> StatementStore {
    StatementStore::new(&config.sql_dir)
}
