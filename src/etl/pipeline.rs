//! The extract → transform → load run over all cities of one country.
//!
//! Stage 0 (listing cities) is the only fatal step. In every later stage a
//! failing item is logged with its identity and dropped, and the remaining
//! items continue to the next stage.

use crate::api::{Geocoder, WeatherSource};
use crate::business::{place, weather};
use crate::db::{CityDao, WeatherStatusDao};
use crate::error::Result;
use crate::models::{City, WeatherStatus};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Items that entered a stage and items that left it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCount {
    pub attempted: usize,
    pub succeeded: usize,
}

impl StageCount {
    fn new(attempted: usize) -> Self {
        Self {
            attempted,
            succeeded: 0,
        }
    }
}

impl fmt::Display for StageCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.succeeded, self.attempted)
    }
}

/// Outcome of one completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// 1-based invocation number.
    pub job: u64,
    pub cities: usize,
    pub extract: StageCount,
    pub transform: StageCount,
    pub load: StageCount,
    pub elapsed: Duration,
}

pub struct EtlPipeline {
    cities: Box<dyn CityDao>,
    statuses: Box<dyn WeatherStatusDao>,
    geocoder: Arc<dyn Geocoder>,
    source: Arc<dyn WeatherSource>,
    country_code: String,
    runs: u64,
    run_limit: Option<u64>,
}

impl EtlPipeline {
    pub fn new(
        cities: Box<dyn CityDao>,
        statuses: Box<dyn WeatherStatusDao>,
        geocoder: Arc<dyn Geocoder>,
        source: Arc<dyn WeatherSource>,
        country_code: impl Into<String>,
    ) -> Self {
        Self {
            cities,
            statuses,
            geocoder,
            source,
            country_code: country_code.into(),
            runs: 0,
            run_limit: None,
        }
    }

    /// Caps the number of runs a scheduler may start. `None` means unlimited.
    pub fn with_run_limit(mut self, run_limit: Option<u64>) -> Self {
        self.run_limit = run_limit;
        self
    }

    /// Number of runs started so far, failed ones included.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn limit_reached(&self) -> bool {
        self.run_limit.map_or(false, |limit| self.runs >= limit)
    }

    /// Executes one run. Only a failure to list the cities is returned as an error.
    pub async fn run(&mut self) -> Result<RunSummary> {
        self.runs += 1;
        let job = self.runs;
        let started = Instant::now();
        info!(job, country = %self.country_code, "<<ETL run>>");

        info!("Getting cities of {}...", self.country_code);
        let stage = Instant::now();
        let cities = self.cities.get_all(&self.country_code).await.map_err(|e| {
            error!(job, error = %e, "Failed to get cities, aborting run");
            e
        })?;
        info!(
            count = cities.len(),
            "Got cities. Elapsed Time: {:.4}s",
            stage.elapsed().as_secs_f64()
        );

        let (payloads, extract) = self.extract(cities).await;
        let (statuses, transform) = Self::transform(payloads);
        let load = self.load(statuses).await;

        let summary = RunSummary {
            job,
            cities: extract.attempted,
            extract,
            transform,
            load,
            elapsed: started.elapsed(),
        };
        info!(
            job,
            extract = %summary.extract,
            transform = %summary.transform,
            load = %summary.load,
            "<<End>>. Total Elapsed Time: {:.4}s",
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }

    async fn extract(&self, cities: Vec<City>) -> (Vec<(City, Value)>, StageCount) {
        info!("Extracting weather data for {} cities...", cities.len());
        let stage = Instant::now();
        let mut count = StageCount::new(cities.len());
        let mut payloads = Vec::with_capacity(cities.len());

        for city in cities {
            match self.extract_city(city.clone()).await {
                Ok(extracted) => {
                    payloads.push(extracted);
                    count.succeeded += 1;
                },
                Err(e) => {
                    error!(
                        city_id = city.id(),
                        city = city.name(),
                        error = %e,
                        "Failed to extract"
                    );
                },
            }
        }

        info!(
            "Extracted {}. Elapsed Time: {:.4}s",
            count,
            stage.elapsed().as_secs_f64()
        );
        (payloads, count)
    }

    async fn extract_city(&self, city: City) -> Result<(City, Value)> {
        let city = if city.has_coordinates() {
            city
        } else {
            place::backfill_city(self.cities.as_ref(), self.geocoder.as_ref(), city).await?
        };
        let payload = weather::extract(self.source.as_ref(), &city).await?;
        Ok((city, payload))
    }

    fn transform(payloads: Vec<(City, Value)>) -> (Vec<WeatherStatus>, StageCount) {
        info!("Transforming weather data for {} cities...", payloads.len());
        let stage = Instant::now();
        let mut count = StageCount::new(payloads.len());
        let mut statuses = Vec::with_capacity(payloads.len());

        for (city, payload) in payloads {
            match weather::transform(&payload, city.id()) {
                Ok(status) => {
                    statuses.push(status);
                    count.succeeded += 1;
                },
                Err(e) => {
                    error!(
                        city_id = city.id(),
                        city = city.name(),
                        error = %e,
                        "Failed to transform"
                    );
                },
            }
        }

        info!(
            "Transformed {}. Elapsed Time: {:.4}s",
            count,
            stage.elapsed().as_secs_f64()
        );
        (statuses, count)
    }

    async fn load(&self, statuses: Vec<WeatherStatus>) -> StageCount {
        info!("Loading weather data for {} cities...", statuses.len());
        let stage = Instant::now();
        let mut count = StageCount::new(statuses.len());

        for status in &statuses {
            match weather::load(self.statuses.as_ref(), status).await {
                Ok(()) => count.succeeded += 1,
                Err(e) => {
                    error!(
                        city_id = status.city_id(),
                        collect_time = %status.collect_time(),
                        error = %e,
                        "Failed to load"
                    );
                },
            }
        }

        info!(
            "Loaded {}. Elapsed Time: {:.4}s",
            count,
            stage.elapsed().as_secs_f64()
        );
        count
    }

    /// Closes both DAOs. The pipeline cannot run afterwards.
    pub async fn close(&mut self) -> Result<()> {
        let cities = self.cities.close().await;
        let statuses = self.statuses.close().await;
        cities.and(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{sample_payload, MockProvider};
    use crate::db::memory::MemoryStore;
    use crate::error::AppError;
    use crate::models::Country;

    const DT: i64 = 1_717_410_000;

    fn city(id: i64, name: &str, coordinates: Option<(f64, f64)>) -> City {
        let country = Arc::new(Country::new("VN", Some("Vietnam".into())).unwrap());
        City::new(id, name, coordinates, 7, country).unwrap()
    }

    fn pipeline(store: &MemoryStore, provider: &MockProvider) -> EtlPipeline {
        let provider = Arc::new(provider.clone());
        EtlPipeline::new(
            Box::new(store.city_dao()),
            Box::new(store.weather_status_dao()),
            provider.clone(),
            provider,
            "VN",
        )
    }

    #[tokio::test]
    async fn test_run_isolates_failures_per_stage() {
        let store = MemoryStore::new();
        let provider = MockProvider::new();

        // 1: loads fine. 2: payload without main.temp. 3: no payload.
        // 4: backfilled, then rejected by storage. 5: geocoding fails.
        store.seed_city(city(1, "Ha Noi", Some((105.8, 21.0))));
        store.seed_city(city(2, "Hue", Some((107.58, 16.46))));
        store.seed_city(city(3, "Da Nang", Some((108.22, 16.07))));
        store.seed_city(city(4, "Can Tho", None));
        store.seed_city(city(5, "Atlantis", None));
        provider.expect_coordinates("Can Tho", (105.78, 10.03));

        provider.expect_payload(105.8, sample_payload(DT));
        let mut broken = sample_payload(DT);
        broken["weather"]["main"].as_object_mut().unwrap().remove("temp");
        provider.expect_payload(107.58, broken);
        provider.expect_payload(105.78, sample_payload(DT));
        store.state().failing_status_cities.insert(4);

        let mut etl = pipeline(&store, &provider);
        let summary = etl.run().await.unwrap();

        assert_eq!(summary.job, 1);
        assert_eq!(summary.cities, 5);
        assert_eq!(summary.extract, StageCount { attempted: 5, succeeded: 3 });
        assert_eq!(summary.transform, StageCount { attempted: 3, succeeded: 2 });
        assert_eq!(summary.load, StageCount { attempted: 2, succeeded: 1 });

        let state = store.state();
        assert_eq!(state.statuses.len(), 1);
        assert!(state.statuses.keys().all(|(id, _)| *id == 1));
        assert!(state.cities[&4].has_coordinates());
        assert!(!state.cities[&5].has_coordinates());
    }

    #[tokio::test]
    async fn test_city_listing_failure_is_fatal() {
        let store = MemoryStore::new();
        store.seed_city(city(1, "Ha Noi", Some((105.8, 21.0))));
        store.state().fail_city_listing = true;
        let provider = MockProvider::new();

        let mut etl = pipeline(&store, &provider);
        let result = etl.run().await;

        assert!(matches!(result, Err(AppError::DataAccess(_))));
        assert_eq!(etl.runs(), 1);
        assert!(provider.state().weather_calls.is_empty());
    }

    #[tokio::test]
    async fn test_empty_country_completes_with_zero_counts() {
        let store = MemoryStore::new();
        let provider = MockProvider::new();

        let summary = pipeline(&store, &provider).run().await.unwrap();

        assert_eq!(summary.cities, 0);
        assert_eq!(summary.load, StageCount::default());
    }

    #[tokio::test]
    async fn test_run_counter_and_limit() {
        let store = MemoryStore::new();
        let provider = MockProvider::new();
        let mut etl = pipeline(&store, &provider).with_run_limit(Some(2));

        assert!(!etl.limit_reached());
        etl.run().await.unwrap();
        assert!(!etl.limit_reached());
        let second = etl.run().await.unwrap();
        assert_eq!(second.job, 2);
        assert!(etl.limit_reached());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = MemoryStore::new();
        let provider = MockProvider::new();
        store.seed_city(city(1, "Ha Noi", Some((105.8, 21.0))));
        provider.expect_payload(105.8, sample_payload(DT));

        let mut etl = pipeline(&store, &provider);
        etl.run().await.unwrap();
        etl.run().await.unwrap();

        let state = store.state();
        assert_eq!(state.status_inserts.len(), 2);
        assert_eq!(state.statuses.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_pipeline_cannot_run() {
        let store = MemoryStore::new();
        let provider = MockProvider::new();
        let mut etl = pipeline(&store, &provider);

        etl.close().await.unwrap();
        assert!(matches!(etl.run().await, Err(AppError::DataAccess(_))));
    }
}
