//! In-memory DAOs for unit tests.
//!
//! All four DAOs of one [`MemoryStore`] share a single `Arc<Mutex<MemoryState>>`,
//! so a test can seed data, inject failures and inspect recorded calls through
//! the store while the code under test only sees `Box<dyn ...Dao>`.

use super::dao::{closed, CityDao, CityKey, CountryDao, GeneralWeatherDao, WeatherStatusDao};
use crate::error::{AppError, Result};
use crate::models::{normalize_code, City, Country, GeneralWeather, WeatherStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
pub struct MemoryState {
    pub countries: BTreeMap<String, Country>,
    /// Cities keep only the code of their country; it is resolved on every read.
    pub cities: BTreeMap<i64, City>,
    pub general_weathers: BTreeMap<String, GeneralWeather>,
    pub statuses: BTreeMap<(i64, DateTime<Utc>), WeatherStatus>,

    // Recorded calls
    pub country_lookups: usize,
    pub city_inserts: Vec<City>,
    pub status_inserts: Vec<WeatherStatus>,

    // Injected failures
    pub fail_city_listing: bool,
    pub failing_status_cities: HashSet<i64>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    /// Seeds a city and its country without recording an insert.
    pub fn seed_city(&self, city: City) {
        let mut state = self.state();
        let country = city.country().as_ref().clone();
        state.countries.insert(country.code().to_string(), country);
        state.cities.insert(city.id(), city);
    }

    pub fn country_dao(&self) -> MemoryCountryDao {
        MemoryCountryDao(Handle::new(self))
    }

    pub fn city_dao(&self) -> MemoryCityDao {
        MemoryCityDao(Handle::new(self))
    }

    pub fn general_weather_dao(&self) -> MemoryGeneralWeatherDao {
        MemoryGeneralWeatherDao(Handle::new(self))
    }

    pub fn weather_status_dao(&self) -> MemoryWeatherStatusDao {
        MemoryWeatherStatusDao(Handle::new(self))
    }
}

struct Handle {
    store: MemoryStore,
    open: bool,
}

impl Handle {
    fn new(store: &MemoryStore) -> Self {
        Self {
            store: store.clone(),
            open: true,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if !self.open {
            return Err(closed());
        }
        Ok(self.store.state())
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Err(closed());
        }
        self.open = false;
        Ok(())
    }
}

impl MemoryState {
    fn lookup_country(&mut self, code: &str) -> Result<Arc<Country>> {
        self.country_lookups += 1;
        self.countries
            .get(code)
            .cloned()
            .map(Arc::new)
            .ok_or_else(|| AppError::NotFound(format!("country {}", code)))
    }

    fn resolve_status(&self, status: &WeatherStatus) -> Result<WeatherStatus> {
        let mut resolved = status.clone();
        let conditions = status
            .conditions()
            .iter()
            .map(|c| {
                self.general_weathers.get(c.status_id()).cloned().ok_or_else(|| {
                    AppError::NotFound(format!("general weather '{}'", c.status_id()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        resolved.set_conditions(conditions);
        Ok(resolved)
    }
}

pub struct MemoryCountryDao(Handle);

#[async_trait]
impl CountryDao for MemoryCountryDao {
    async fn get(&self, code: &str) -> Result<Country> {
        let mut state = self.0.state()?;
        let code = normalize_code(code)?;
        Ok(state.lookup_country(&code)?.as_ref().clone())
    }

    async fn insert(&self, country: &Country) -> Result<()> {
        let mut state = self.0.state()?;
        let fresh = Country::new(country.code(), None)?;
        let stored = state
            .countries
            .entry(country.code().to_string())
            .or_insert(fresh);
        if country.name().is_some() {
            stored.set_name(country.name().map(str::to_string));
        }
        for record in country.records() {
            if !stored.records().iter().any(|r| r.collect_date() == record.collect_date()) {
                stored.push_record(record.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, code: &str) -> Result<()> {
        let mut state = self.0.state()?;
        let code = normalize_code(code)?;
        state
            .countries
            .remove(&code)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("country {}", code)))?;
        state.cities.retain(|_, city| city.country().code() != code);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.0.close()
    }
}

pub struct MemoryCityDao(Handle);

#[async_trait]
impl CityDao for MemoryCityDao {
    async fn get(&self, key: &CityKey) -> Result<City> {
        let mut state = self.0.state()?;
        let found = match key {
            CityKey::Id(id) => state.cities.get(id),
            CityKey::Name(name) => state.cities.values().find(|c| c.name() == name),
        };
        let mut city = found
            .cloned()
            .ok_or_else(|| AppError::NotFound(key.to_string()))?;
        let country = state.lookup_country(city.country().code())?;
        city.set_country(country);
        Ok(city)
    }

    async fn get_all(&self, country_code: &str) -> Result<Vec<City>> {
        let mut state = self.0.state()?;
        if state.fail_city_listing {
            return Err(AppError::DataAccess("city listing unavailable".to_string()));
        }
        let code = normalize_code(country_code)?;
        let mut cities: Vec<City> = state
            .cities
            .values()
            .filter(|c| c.country().code() == code)
            .cloned()
            .collect();
        if cities.is_empty() {
            return Ok(cities);
        }
        let country = state.lookup_country(&code)?;
        for city in &mut cities {
            city.set_country(Arc::clone(&country));
        }
        Ok(cities)
    }

    async fn insert(&self, city: &City) -> Result<()> {
        let mut state = self.0.state()?;
        state
            .countries
            .entry(city.country().code().to_string())
            .or_insert_with(|| city.country().as_ref().clone());
        state.cities.insert(city.id(), city.clone());
        state.city_inserts.push(city.clone());
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut state = self.0.state()?;
        state
            .cities
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(CityKey::Id(id).to_string()))
    }

    async fn delete_all(&self, country_code: &str) -> Result<()> {
        let mut state = self.0.state()?;
        let code = normalize_code(country_code)?;
        let before = state.cities.len();
        state.cities.retain(|_, city| city.country().code() != code);
        if state.cities.len() == before {
            return Err(AppError::NotFound(format!("cities of country {}", code)));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.0.close()
    }
}

pub struct MemoryGeneralWeatherDao(Handle);

#[async_trait]
impl GeneralWeatherDao for MemoryGeneralWeatherDao {
    async fn get(&self, status_id: &str) -> Result<GeneralWeather> {
        self.0
            .state()?
            .general_weathers
            .get(status_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("general weather '{}'", status_id)))
    }

    async fn get_all(&self) -> Result<Vec<GeneralWeather>> {
        Ok(self.0.state()?.general_weathers.values().cloned().collect())
    }

    async fn insert(&self, general_weather: &GeneralWeather) -> Result<()> {
        self.0.state()?.general_weathers.insert(
            general_weather.status_id().to_string(),
            general_weather.clone(),
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.0.close()
    }
}

pub struct MemoryWeatherStatusDao(Handle);

#[async_trait]
impl WeatherStatusDao for MemoryWeatherStatusDao {
    async fn get(&self, city_id: i64, collect_time: DateTime<Utc>) -> Result<WeatherStatus> {
        let state = self.0.state()?;
        let status = state.statuses.get(&(city_id, collect_time)).ok_or_else(|| {
            AppError::NotFound(format!("weather status of city {} at {}", city_id, collect_time))
        })?;
        state.resolve_status(status)
    }

    async fn get_all(&self, city_id: i64) -> Result<Vec<WeatherStatus>> {
        let state = self.0.state()?;
        state
            .statuses
            .range((city_id, DateTime::<Utc>::MIN_UTC)..=(city_id, DateTime::<Utc>::MAX_UTC))
            .map(|(_, status)| state.resolve_status(status))
            .collect()
    }

    async fn insert(&self, status: &WeatherStatus) -> Result<()> {
        let mut state = self.0.state()?;
        if state.failing_status_cities.contains(&status.city_id()) {
            return Err(AppError::DataAccess(format!(
                "write rejected for city {}",
                status.city_id()
            )));
        }
        for condition in status.conditions() {
            state
                .general_weathers
                .entry(condition.status_id().to_string())
                .or_insert_with(|| condition.clone());
        }
        state
            .statuses
            .insert((status.city_id(), status.collect_time()), status.clone());
        state.status_inserts.push(status.clone());
        Ok(())
    }

    async fn delete(&self, city_id: i64, collect_time: DateTime<Utc>) -> Result<()> {
        self.0
            .state()?
            .statuses
            .remove(&(city_id, collect_time))
            .map(|_| ())
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "weather status of city {} at {}",
                    city_id, collect_time
                ))
            })
    }

    async fn delete_all(&self, city_id: i64) -> Result<()> {
        let mut state = self.0.state()?;
        let before = state.statuses.len();
        state.statuses.retain(|(id, _), _| *id != city_id);
        if state.statuses.len() == before {
            return Err(AppError::NotFound(format!("weather history of city {}", city_id)));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.0.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CountryRecord, Readings};
    use chrono::{NaiveDate, TimeZone, Timelike};

    fn city(id: i64, name: &str) -> City {
        let country = Country::new("VN", Some("Vietnam".into())).unwrap();
        City::new(id, name, None, 7, Arc::new(country)).unwrap()
    }

    #[tokio::test]
    async fn test_get_all_looks_up_country_once() {
        let store = MemoryStore::new();
        for (id, name) in [(1, "Ha Noi"), (2, "Hue"), (3, "Da Nang")] {
            store.seed_city(city(id, name));
        }
        let dao = store.city_dao();
        assert_eq!(dao.get_all("VNM").await.unwrap().len(), 3);
        assert_eq!(store.state().country_lookups, 1);
    }

    #[tokio::test]
    async fn test_missing_country_fails_whole_read() {
        let store = MemoryStore::new();
        store.seed_city(city(1, "Ha Noi"));
        store.state().countries.clear();
        assert!(matches!(
            store.city_dao().get(&CityKey::Id(1)).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_country_records_kept_once_per_date() {
        let record = |minute: u32| {
            CountryRecord::new(
                NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                Utc.with_ymd_and_hms(2024, 6, 1, 5, minute, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 6, 1, 18, 40, 0).unwrap(),
            )
            .unwrap()
        };
        let mut country = Country::new("VN", None).unwrap();
        country.push_record(record(13));
        country.push_record(record(14));

        let dao = MemoryStore::new().country_dao();
        dao.insert(&country).await.unwrap();
        dao.insert(&country).await.unwrap();

        let stored = dao.get("VN").await.unwrap();
        assert_eq!(stored.records().len(), 1);
        assert_eq!(stored.records()[0].sunrise().minute(), 13);
    }

    #[tokio::test]
    async fn test_status_upsert_replaces_tags() {
        let store = MemoryStore::new();
        let dao = store.weather_status_dao();
        let t = Utc.with_ymd_and_hms(2023, 5, 1, 7, 0, 0).unwrap();
        let status = |tags: &[&str]| {
            WeatherStatus::new(
                1,
                t,
                Readings::default(),
                None,
                None,
                tags.iter().map(|t| GeneralWeather::new(*t, None).unwrap()).collect(),
            )
            .unwrap()
        };

        dao.insert(&status(&["Clouds", "Rain"])).await.unwrap();
        dao.insert(&status(&["Clear"])).await.unwrap();

        let history = dao.get_all(1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].conditions().len(), 1);
        assert_eq!(history[0].conditions()[0].status_id(), "Clear");
    }

    #[tokio::test]
    async fn test_closed_dao_rejects_calls() {
        let store = MemoryStore::new();
        let mut dao = store.general_weather_dao();
        dao.close().await.unwrap();
        assert!(matches!(dao.get_all().await, Err(AppError::DataAccess(_))));
        assert!(dao.close().await.is_err());
    }
}
