//! MongoDB implementation of the DAO contracts.
//!
//! Documents mirror the models' document form, except that references are
//! stored as keys only: a city embeds `{country: {code}}` and a status embeds
//! `general_weathers: [{status_id}]`. Reads resolve those keys against their own
//! collections and fail with `NotFound` when one does not resolve.
//!
//! A status upsert is a single-document replace. A city upsert touches two
//! collections without a transaction: when the city write fails, a country
//! document created by the same call is deleted again. A country that already
//! existed keeps whatever fields the upsert changed.

use super::dao::{closed, CityDao, CityKey, CountryDao, GeneralWeatherDao, WeatherStatusDao};
use crate::error::{AppError, Result};
use crate::models::document::{doc_array, req_str, time_bson};
use crate::models::{
    normalize_code, City, Country, CountryRecord, GeneralWeather, WeatherStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{
    FindOneOptions, FindOptions, IndexOptions, ReplaceOptions, UpdateOptions,
};
use mongodb::{Client, Collection, Database, IndexModel};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

const COUNTRY: &str = "country";
const CITY: &str = "city";
const GENERAL_WEATHER: &str = "general_weather";
const WEATHER_STATUS: &str = "weather_status";

/// OpenWeather condition groups seeded on initialization.
const CONDITION_GROUPS: [(&str, &str); 15] = [
    ("Thunderstorm", "Thunderstorm"),
    ("Drizzle", "Drizzle"),
    ("Rain", "Rain"),
    ("Snow", "Snow"),
    ("Mist", "Mist"),
    ("Smoke", "Smoke"),
    ("Haze", "Haze"),
    ("Dust", "Dust"),
    ("Fog", "Fog"),
    ("Sand", "Sand"),
    ("Ash", "Volcanic ash"),
    ("Squall", "Squalls"),
    ("Tornado", "Tornado"),
    ("Clear", "Clear sky"),
    ("Clouds", "Clouds"),
];

fn upsert() -> UpdateOptions {
    UpdateOptions::builder().upsert(true).build()
}

/// One client, closed at most once.
pub struct MongoHandle {
    client: Option<Client>,
    database: Database,
}

impl MongoHandle {
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        debug!("Connecting to document store...");
        let client = Client::with_uri_str(uri).await?;
        let database = client.database(database);
        Ok(Self {
            client: Some(client),
            database,
        })
    }

    fn collection(&self, name: &str) -> Result<Collection<Document>> {
        if self.client.is_none() {
            return Err(closed());
        }
        Ok(self.database.collection(name))
    }

    async fn close(&mut self) -> Result<()> {
        let client = self.client.take().ok_or_else(closed)?;
        client.shutdown().await;
        debug!("Document store connection closed");
        Ok(())
    }
}

/// Unique indexes on every natural key plus the condition-group seed.
pub async fn init_collections(uri: &str, database: &str) -> Result<()> {
    info!("Initializing document collections (if necessary)...");
    let mut handle = MongoHandle::connect(uri, database).await?;

    let unique = |keys: Document| {
        IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().unique(true).build())
            .build()
    };
    handle
        .collection(COUNTRY)?
        .create_index(unique(doc! { "code": 1 }), None)
        .await?;
    let cities = handle.collection(CITY)?;
    cities.create_index(unique(doc! { "id": 1 }), None).await?;
    cities
        .create_index(IndexModel::builder().keys(doc! { "country.code": 1 }).build(), None)
        .await?;
    handle
        .collection(GENERAL_WEATHER)?
        .create_index(unique(doc! { "status_id": 1 }), None)
        .await?;
    handle
        .collection(WEATHER_STATUS)?
        .create_index(unique(doc! { "city_id": 1, "collect_time": 1 }), None)
        .await?;

    let general = handle.collection(GENERAL_WEATHER)?;
    for (status_id, description) in CONDITION_GROUPS {
        general
            .update_one(
                doc! { "status_id": status_id },
                doc! { "$setOnInsert": { "description": description } },
                upsert(),
            )
            .await?;
    }

    handle.close().await?;
    info!("Document collections initialized successfully");
    Ok(())
}

// --- Country access shared by the country and city DAOs ---

async fn fetch_country(countries: &Collection<Document>, code: &str) -> Result<Country> {
    let mut doc = countries
        .find_one(doc! { "code": code }, None)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("country {}", code)))?;

    let mut records: Vec<Document> = doc_array(&doc, "records")?.into_iter().cloned().collect();
    records.sort_by_cached_key(|r| req_str(r, "collect_date").unwrap_or_default());
    doc.insert("records", records);
    Country::from_document(&doc)
}

/// Returns true if this call created the document. A record whose `collect_date`
/// is already stored (or repeated earlier in the same country) is skipped.
async fn write_country(countries: &Collection<Document>, country: &Country) -> Result<bool> {
    let projection = FindOneOptions::builder()
        .projection(doc! { "records.collect_date": 1 })
        .build();
    let mut dates: HashSet<String> = match countries
        .find_one(doc! { "code": country.code() }, projection)
        .await?
    {
        Some(stored) => doc_array(&stored, "records")?
            .into_iter()
            .map(|r| req_str(r, "collect_date"))
            .collect::<Result<_>>()?,
        None => HashSet::new(),
    };
    let records: Vec<Bson> = country
        .records()
        .iter()
        .map(CountryRecord::to_document)
        .filter(|r| matches!(r.get_str("collect_date"), Ok(date) if dates.insert(date.to_string())))
        .map(Bson::Document)
        .collect();

    let mut update = doc! { "$push": { "records": { "$each": records } } };
    if let Some(name) = country.name() {
        update.insert("$set", doc! { "name": name });
    }
    let result = countries
        .update_one(doc! { "code": country.code() }, update, upsert())
        .await?;
    Ok(result.upserted_id.is_some())
}

pub struct MongoCountryDao {
    handle: MongoHandle,
}

impl MongoCountryDao {
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        Ok(Self {
            handle: MongoHandle::connect(uri, database).await?,
        })
    }
}

#[async_trait]
impl CountryDao for MongoCountryDao {
    async fn get(&self, code: &str) -> Result<Country> {
        let countries = self.handle.collection(COUNTRY)?;
        fetch_country(&countries, &normalize_code(code)?).await
    }

    async fn insert(&self, country: &Country) -> Result<()> {
        write_country(&self.handle.collection(COUNTRY)?, country).await?;
        debug!(code = country.code(), "Country upserted");
        Ok(())
    }

    /// Also removes the country's cities and their weather history.
    async fn delete(&self, code: &str) -> Result<()> {
        let countries = self.handle.collection(COUNTRY)?;
        let code = normalize_code(code)?;
        let result = countries.delete_one(doc! { "code": code.as_str() }, None).await?;
        if result.deleted_count == 0 {
            return Err(AppError::NotFound(format!("country {}", code)));
        }

        let cities = self.handle.collection(CITY)?;
        let ids: Vec<Bson> = cities
            .find(doc! { "country.code": code.as_str() }, None)
            .await?
            .try_collect::<Vec<Document>>()
            .await?
            .iter()
            .filter_map(|city| city.get("id").cloned())
            .collect();
        if !ids.is_empty() {
            self.handle
                .collection(WEATHER_STATUS)?
                .delete_many(doc! { "city_id": { "$in": ids } }, None)
                .await?;
            cities.delete_many(doc! { "country.code": code.as_str() }, None).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.handle.close().await
    }
}

pub struct MongoCityDao {
    handle: MongoHandle,
}

impl MongoCityDao {
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        Ok(Self {
            handle: MongoHandle::connect(uri, database).await?,
        })
    }

    fn assemble(mut doc: Document, country: &Arc<Country>) -> Result<City> {
        doc.insert("country", country.to_document());
        let mut city = City::from_document(&doc)?;
        city.set_country(Arc::clone(country));
        Ok(city)
    }

    fn country_code(doc: &Document) -> Result<String> {
        let reference = doc
            .get_document("country")
            .map_err(|_| AppError::Format("city document lacks a country reference".to_string()))?;
        req_str(reference, "code")
    }
}

#[async_trait]
impl CityDao for MongoCityDao {
    async fn get(&self, key: &CityKey) -> Result<City> {
        let cities = self.handle.collection(CITY)?;
        let filter = match key {
            CityKey::Id(id) => doc! { "id": *id },
            CityKey::Name(name) => doc! { "name": name.as_str() },
        };
        let options = FindOneOptions::builder().sort(doc! { "id": 1 }).build();
        let doc = cities
            .find_one(filter, options)
            .await?
            .ok_or_else(|| AppError::NotFound(key.to_string()))?;

        let code = Self::country_code(&doc)?;
        let country = Arc::new(fetch_country(&self.handle.collection(COUNTRY)?, &code).await?);
        Self::assemble(doc, &country)
    }

    async fn get_all(&self, country_code: &str) -> Result<Vec<City>> {
        let cities = self.handle.collection(CITY)?;
        let code = normalize_code(country_code)?;
        let options = FindOptions::builder().sort(doc! { "id": 1 }).build();
        let docs: Vec<Document> = cities
            .find(doc! { "country.code": code.as_str() }, options)
            .await?
            .try_collect()
            .await?;
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let country = Arc::new(fetch_country(&self.handle.collection(COUNTRY)?, &code).await?);
        docs.into_iter()
            .map(|doc| Self::assemble(doc, &country))
            .collect()
    }

    async fn insert(&self, city: &City) -> Result<()> {
        let countries = self.handle.collection(COUNTRY)?;
        let cities = self.handle.collection(CITY)?;

        let created_country = write_country(&countries, city.country()).await?;

        let mut doc = city.to_document();
        doc.insert("country", doc! { "code": city.country().code() });
        let options = ReplaceOptions::builder().upsert(true).build();
        if let Err(e) = cities.replace_one(doc! { "id": city.id() }, doc, options).await {
            if created_country {
                warn!(
                    city_id = city.id(),
                    code = city.country().code(),
                    "City write failed, removing the country document it created"
                );
                if let Err(undo) = countries
                    .delete_one(doc! { "code": city.country().code() }, None)
                    .await
                {
                    warn!("Failed to remove country document: {}", undo);
                }
            }
            return Err(e.into());
        }
        debug!(city_id = city.id(), name = city.name(), "City upserted");
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let result = self
            .handle
            .collection(CITY)?
            .delete_one(doc! { "id": id }, None)
            .await?;
        if result.deleted_count == 0 {
            return Err(AppError::NotFound(CityKey::Id(id).to_string()));
        }
        Ok(())
    }

    async fn delete_all(&self, country_code: &str) -> Result<()> {
        let cities = self.handle.collection(CITY)?;
        let code = normalize_code(country_code)?;
        let result = cities
            .delete_many(doc! { "country.code": code.as_str() }, None)
            .await?;
        if result.deleted_count == 0 {
            return Err(AppError::NotFound(format!("cities of country {}", code)));
        }
        info!(country = %code, deleted = result.deleted_count, "Cities deleted");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.handle.close().await
    }
}

pub struct MongoGeneralWeatherDao {
    handle: MongoHandle,
}

impl MongoGeneralWeatherDao {
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        Ok(Self {
            handle: MongoHandle::connect(uri, database).await?,
        })
    }
}

#[async_trait]
impl GeneralWeatherDao for MongoGeneralWeatherDao {
    async fn get(&self, status_id: &str) -> Result<GeneralWeather> {
        let doc = self
            .handle
            .collection(GENERAL_WEATHER)?
            .find_one(doc! { "status_id": status_id }, None)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("general weather '{}'", status_id)))?;
        GeneralWeather::from_document(&doc)
    }

    async fn get_all(&self) -> Result<Vec<GeneralWeather>> {
        let options = FindOptions::builder().sort(doc! { "status_id": 1 }).build();
        let docs: Vec<Document> = self
            .handle
            .collection(GENERAL_WEATHER)?
            .find(None, options)
            .await?
            .try_collect()
            .await?;
        docs.iter().map(GeneralWeather::from_document).collect()
    }

    async fn insert(&self, general_weather: &GeneralWeather) -> Result<()> {
        self.handle
            .collection(GENERAL_WEATHER)?
            .update_one(
                doc! { "status_id": general_weather.status_id() },
                doc! { "$set": { "description": general_weather.description() } },
                upsert(),
            )
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.handle.close().await
    }
}

pub struct MongoWeatherStatusDao {
    handle: MongoHandle,
}

impl MongoWeatherStatusDao {
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        Ok(Self {
            handle: MongoHandle::connect(uri, database).await?,
        })
    }

    fn key(city_id: i64, collect_time: DateTime<Utc>) -> Document {
        doc! { "city_id": city_id, "collect_time": time_bson(collect_time) }
    }

    /// Replaces the stored tag references with the full general-weather documents.
    async fn assemble(&self, mut doc: Document) -> Result<WeatherStatus> {
        let ids = doc_array(&doc, "general_weathers")?
            .into_iter()
            .map(|tag| req_str(tag, "status_id"))
            .collect::<Result<Vec<_>>>()?;

        if !ids.is_empty() {
            let known: HashMap<String, Document> = self
                .handle
                .collection(GENERAL_WEATHER)?
                .find(doc! { "status_id": { "$in": ids.clone() } }, None)
                .await?
                .try_collect::<Vec<Document>>()
                .await?
                .into_iter()
                .map(|gw| Ok((req_str(&gw, "status_id")?, gw)))
                .collect::<Result<_>>()?;

            let mut resolved = Vec::with_capacity(ids.len());
            for id in &ids {
                let gw = known
                    .get(id)
                    .ok_or_else(|| AppError::NotFound(format!("general weather '{}'", id)))?;
                resolved.push(Bson::Document(gw.clone()));
            }
            doc.insert("general_weathers", resolved);
        }
        WeatherStatus::from_document(&doc)
    }
}

#[async_trait]
impl WeatherStatusDao for MongoWeatherStatusDao {
    async fn get(&self, city_id: i64, collect_time: DateTime<Utc>) -> Result<WeatherStatus> {
        let doc = self
            .handle
            .collection(WEATHER_STATUS)?
            .find_one(Self::key(city_id, collect_time), None)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "weather status of city {} at {}",
                    city_id, collect_time
                ))
            })?;
        self.assemble(doc).await
    }

    async fn get_all(&self, city_id: i64) -> Result<Vec<WeatherStatus>> {
        let options = FindOptions::builder().sort(doc! { "collect_time": 1 }).build();
        let docs: Vec<Document> = self
            .handle
            .collection(WEATHER_STATUS)?
            .find(doc! { "city_id": city_id }, options)
            .await?
            .try_collect()
            .await?;

        let mut statuses = Vec::with_capacity(docs.len());
        for doc in docs {
            statuses.push(self.assemble(doc).await?);
        }
        Ok(statuses)
    }

    async fn insert(&self, status: &WeatherStatus) -> Result<()> {
        let statuses = self.handle.collection(WEATHER_STATUS)?;
        let general = self.handle.collection(GENERAL_WEATHER)?;

        // Unknown condition groups are registered so the status stays resolvable.
        for condition in status.conditions() {
            general
                .update_one(
                    doc! { "status_id": condition.status_id() },
                    doc! { "$setOnInsert": { "description": condition.description() } },
                    upsert(),
                )
                .await?;
        }

        let mut doc = status.to_document();
        let references: Vec<Bson> = status
            .conditions()
            .iter()
            .map(|c| Bson::Document(doc! { "status_id": c.status_id() }))
            .collect();
        doc.insert("general_weathers", references);

        let options = ReplaceOptions::builder().upsert(true).build();
        statuses
            .replace_one(Self::key(status.city_id(), status.collect_time()), doc, options)
            .await?;
        debug!(
            city_id = status.city_id(),
            collect_time = %status.collect_time(),
            "Weather status upserted"
        );
        Ok(())
    }

    async fn delete(&self, city_id: i64, collect_time: DateTime<Utc>) -> Result<()> {
        let result = self
            .handle
            .collection(WEATHER_STATUS)?
            .delete_one(Self::key(city_id, collect_time), None)
            .await?;
        if result.deleted_count == 0 {
            return Err(AppError::NotFound(format!(
                "weather status of city {} at {}",
                city_id, collect_time
            )));
        }
        Ok(())
    }

    async fn delete_all(&self, city_id: i64) -> Result<()> {
        let result = self
            .handle
            .collection(WEATHER_STATUS)?
            .delete_many(doc! { "city_id": city_id }, None)
            .await?;
        if result.deleted_count == 0 {
            return Err(AppError::NotFound(format!("weather history of city {}", city_id)));
        }
        info!(city_id, deleted = result.deleted_count, "Weather history cleared");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.handle.close().await
    }
}
