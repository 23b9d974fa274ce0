//! City and country use-cases, including coordinate backfill.

use crate::api::Geocoder;
use crate::db::{CityDao, CityKey, CountryDao};
use crate::error::Result;
use crate::models::{normalize_code, City, Country};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Geocodes `city`, stores the coordinates and upserts it.
///
/// Any geocoding or storage failure is returned as is; nothing is written
/// unless the coordinates were obtained.
pub async fn backfill_city(
    cities: &dyn CityDao,
    geocoder: &dyn Geocoder,
    mut city: City,
) -> Result<City> {
    let (longitude, latitude) = geocoder
        .coordinates(city.name(), city.country().code())
        .await?;
    city.set_coordinates(longitude, latitude)?;
    cities.insert(&city).await?;
    info!(
        city_id = city.id(),
        city = city.name(),
        longitude,
        latitude,
        "Backfilled city coordinates"
    );
    Ok(city)
}

/// Fetches one city, backfilling its coordinates first if they are missing.
pub async fn resolve_city(
    cities: &dyn CityDao,
    geocoder: &dyn Geocoder,
    key: &CityKey,
) -> Result<City> {
    let city = cities.get(key).await?;
    if city.has_coordinates() {
        return Ok(city);
    }
    backfill_city(cities, geocoder, city).await
}

/// All cities of a country with coordinates. Cities that already have them are
/// passed through without calling the geocoder.
pub async fn cities_of_country(
    cities: &dyn CityDao,
    geocoder: &dyn Geocoder,
    country_code: &str,
) -> Result<Vec<City>> {
    let listed = cities.get_all(country_code).await?;
    let mut resolved = Vec::with_capacity(listed.len());
    for city in listed {
        if city.has_coordinates() {
            resolved.push(city);
        } else {
            resolved.push(backfill_city(cities, geocoder, city).await?);
        }
    }
    debug!(country = country_code, count = resolved.len(), "Resolved cities");
    Ok(resolved)
}

/// [`cities_of_country`] for several countries, keyed by the normalized code.
pub async fn cities_of_countries(
    cities: &dyn CityDao,
    geocoder: &dyn Geocoder,
    country_codes: &[&str],
) -> Result<BTreeMap<String, Vec<City>>> {
    let mut by_country = BTreeMap::new();
    for code in country_codes {
        let code = normalize_code(code)?;
        let resolved = cities_of_country(cities, geocoder, &code).await?;
        by_country.insert(code, resolved);
    }
    Ok(by_country)
}

pub async fn insert_cities(cities: &dyn CityDao, batch: &[City]) -> Result<()> {
    for city in batch {
        cities.insert(city).await?;
    }
    Ok(())
}

pub async fn delete_cities(cities: &dyn CityDao, ids: &[i64]) -> Result<()> {
    for id in ids {
        cities.delete(*id).await?;
    }
    Ok(())
}

pub async fn get_country(countries: &dyn CountryDao, code: &str) -> Result<Country> {
    countries.get(code).await
}
