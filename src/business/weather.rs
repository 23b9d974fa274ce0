//! Weather use-cases: extract raw payloads, transform them into validated
//! snapshots, and load or clear stored history.

use crate::api::WeatherSource;
use crate::db::{GeneralWeatherDao, WeatherStatusDao};
use crate::error::{AppError, Result};
use crate::models::openweather::RawWeatherPayload;
use crate::models::{City, GeneralWeather, Readings, WeatherStatus};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Fetches the current payload for a city. The city must have coordinates.
pub async fn extract(source: &dyn WeatherSource, city: &City) -> Result<Value> {
    let (longitude, latitude) = city.coordinates().ok_or_else(|| {
        AppError::Validation(format!(
            "city {} ('{}') has no coordinates",
            city.id(),
            city.name()
        ))
    })?;
    source.current(longitude, latitude).await
}

/// Maps one combined `{"weather", "air"}` payload into a snapshot of `city_id`.
///
/// A missing required key, a wrongly typed value or an empty `air.list` is an
/// `AppError::Transform`. Range violations in otherwise well-formed data are
/// reported by the model as `AppError::Validation`.
pub fn transform(payload: &Value, city_id: i64) -> Result<WeatherStatus> {
    let raw = RawWeatherPayload::deserialize(payload)
        .map_err(|e| AppError::Transform(format!("city {}: {}", city_id, e)))?;
    let weather = raw.weather;
    let air = raw
        .air
        .list
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Transform(format!("city {}: air.list is empty", city_id)))?;

    let readings = Readings {
        temp: Some(weather.main.temp),
        feels_temp: Some(weather.main.feels_like),
        pressure: Some(weather.main.pressure),
        humidity: Some(weather.main.humidity),
        sea_level: Some(weather.main.sea_level),
        grnd_level: Some(weather.main.grnd_level),
        visibility: Some(weather.visibility),
        wind_speed: Some(weather.wind.speed),
        wind_deg: Some(weather.wind.deg),
        wind_gust: Some(weather.wind.gust.unwrap_or(0.0)),
        clouds_all: Some(weather.clouds.all),
        rain: weather.rain.and_then(|r| r.one_hour),
        aqi: Some(air.main.aqi),
        pm2_5: Some(air.components.pm2_5),
    };
    let conditions = weather
        .weather
        .into_iter()
        .map(|c| {
            debug!(
                city_id,
                group = %c.main,
                condition_id = ?c.id,
                description = ?c.description,
                "Weather condition"
            );
            GeneralWeather::new(c.main, None)
        })
        .collect::<Result<Vec<_>>>()?;

    let status = WeatherStatus::new(
        city_id,
        unix_time(weather.dt, "dt")?,
        readings,
        Some(unix_time(weather.sys.sunrise, "sys.sunrise")?),
        Some(unix_time(weather.sys.sunset, "sys.sunset")?),
        conditions,
    )?;
    debug!(
        city_id,
        collect_time = %status.collect_time(),
        conditions = status.conditions().len(),
        "Transformed payload"
    );
    Ok(status)
}

fn unix_time(seconds: i64, field: &str) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| {
            AppError::Transform(format!("{} is not a valid unix time: {}", field, seconds))
        })
}

pub async fn load(statuses: &dyn WeatherStatusDao, status: &WeatherStatus) -> Result<()> {
    statuses.insert(status).await
}

/// Removes the whole history of a city.
pub async fn clear(statuses: &dyn WeatherStatusDao, city_id: i64) -> Result<()> {
    statuses.delete_all(city_id).await
}

pub async fn history(statuses: &dyn WeatherStatusDao, city_id: i64) -> Result<Vec<WeatherStatus>> {
    statuses.get_all(city_id).await
}

/// Every known condition group, or only the listed ones (in the order given).
pub async fn general_weathers(
    dao: &dyn GeneralWeatherDao,
    status_ids: Option<&[String]>,
) -> Result<Vec<GeneralWeather>> {
    match status_ids {
        None => dao.get_all().await,
        Some(ids) => {
            let mut found = Vec::with_capacity(ids.len());
            for id in ids {
                found.push(dao.get(id).await?);
            }
            Ok(found)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{sample_payload, MockProvider};
    use crate::db::memory::MemoryStore;
    use crate::models::Country;
    use std::sync::Arc;

    const DT: i64 = 1_717_410_000;

    #[test]
    fn test_transform_maps_every_field() {
        let status = transform(&sample_payload(DT), 1).unwrap();
        let r = status.readings();

        assert_eq!(status.city_id(), 1);
        assert_eq!(status.collect_time().timestamp(), DT);
        assert_eq!(status.sunrise().map(|t| t.timestamp()), Some(DT - 20_000));
        assert_eq!(r.temp, Some(301.15));
        assert_eq!(r.feels_temp, Some(304.2));
        assert_eq!(r.pressure, Some(1008));
        assert_eq!(r.humidity, Some(74));
        assert_eq!(r.visibility, Some(10000));
        assert_eq!(r.wind_deg, Some(140));
        assert_eq!(r.wind_gust, Some(0.0));
        assert_eq!(r.clouds_all, Some(100));
        assert_eq!(r.rain, Some(0.35));
        assert_eq!(r.aqi, Some(3));
        assert_eq!(r.pm2_5, Some(31.5));
        let tags: Vec<_> = status.conditions().iter().map(|c| c.status_id()).collect();
        assert_eq!(tags, vec!["Clouds", "Rain"]);
    }

    #[test]
    fn test_transform_without_rain_block() {
        let mut payload = sample_payload(DT);
        payload["weather"].as_object_mut().unwrap().remove("rain");
        payload["weather"]["wind"]["gust"] = serde_json::json!(4.2);

        let status = transform(&payload, 1).unwrap();
        assert_eq!(status.readings().rain, None);
        assert_eq!(status.readings().wind_gust, Some(4.2));
    }

    #[test]
    fn test_transform_missing_temp_is_transform_error() {
        let mut payload = sample_payload(DT);
        payload["weather"]["main"].as_object_mut().unwrap().remove("temp");
        assert!(matches!(transform(&payload, 1), Err(AppError::Transform(_))));
    }

    #[test]
    fn test_transform_empty_air_list() {
        let mut payload = sample_payload(DT);
        payload["air"]["list"] = serde_json::json!([]);
        assert!(matches!(transform(&payload, 1), Err(AppError::Transform(_))));
    }

    #[test]
    fn test_transform_out_of_range_humidity_is_validation_error() {
        let mut payload = sample_payload(DT);
        payload["weather"]["main"]["humidity"] = serde_json::json!(140);
        assert!(matches!(transform(&payload, 1), Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_extract_requires_coordinates() {
        let country = Arc::new(Country::new("VN", None).unwrap());
        let city = City::new(1, "Ha Noi", None, 7, country).unwrap();
        let source = MockProvider::new();

        assert!(matches!(
            extract(&source, &city).await,
            Err(AppError::Validation(_))
        ));
        assert!(source.state().weather_calls.is_empty());
    }

    #[tokio::test]
    async fn test_load_twice_keeps_one_record() {
        let store = MemoryStore::new();
        let dao = store.weather_status_dao();
        let status = transform(&sample_payload(DT), 1).unwrap();

        load(&dao, &status).await.unwrap();
        load(&dao, &status).await.unwrap();

        assert_eq!(history(&dao, 1).await.unwrap().len(), 1);
        clear(&dao, 1).await.unwrap();
        assert!(matches!(clear(&dao, 1).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_general_weathers_by_id() {
        let store = MemoryStore::new();
        let dao = store.general_weather_dao();
        for id in ["Clear", "Clouds", "Rain"] {
            dao.insert(&GeneralWeather::new(id, None).unwrap()).await.unwrap();
        }

        assert_eq!(general_weathers(&dao, None).await.unwrap().len(), 3);
        let wanted = vec!["Rain".to_string(), "Clear".to_string()];
        let picked = general_weathers(&dao, Some(wanted.as_slice())).await.unwrap();
        assert_eq!(picked[0].status_id(), "Rain");
        assert_eq!(picked[1].status_id(), "Clear");

        let missing = vec!["Snow".to_string()];
        assert!(matches!(
            general_weathers(&dao, Some(missing.as_slice())).await,
            Err(AppError::NotFound(_))
        ));
    }
}
