//! Geographic entities: `Country`, its `CountryRecord` history, and `City`.

use super::document::{
    doc_array, opt_f64, opt_f64_bson, opt_str, opt_str_bson, req_doc, req_i64, req_str,
    req_time, time_bson,
};
use super::tuple::{Tuple, Value};
use crate::error::{AppError, Result};
use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use mongodb::bson::{doc, Bson, Document};
use std::fmt;
use std::sync::Arc;

pub const MIN_TIME_ZONE: i32 = -12;
pub const MAX_TIME_ZONE: i32 = 14;

/// One day's sunrise/sunset observation for a country.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryRecord {
    collect_date: NaiveDate,
    sunrise: DateTime<Utc>,
    sunset: DateTime<Utc>,
}

impl CountryRecord {
    pub const ARITY: usize = 3;

    pub fn new(
        collect_date: NaiveDate,
        sunrise: DateTime<Utc>,
        sunset: DateTime<Utc>,
    ) -> Result<Self> {
        let (sunrise, sunset) = (sunrise.trunc_subsecs(0), sunset.trunc_subsecs(0));
        if sunset < sunrise {
            return Err(AppError::Validation(format!(
                "sunset {} precedes sunrise {} on {}",
                sunset, sunrise, collect_date
            )));
        }
        Ok(Self {
            collect_date,
            sunrise,
            sunset,
        })
    }

    pub fn collect_date(&self) -> NaiveDate {
        self.collect_date
    }

    pub fn sunrise(&self) -> DateTime<Utc> {
        self.sunrise
    }

    pub fn sunset(&self) -> DateTime<Utc> {
        self.sunset
    }

    /// `(collect_date, sunrise, sunset)`
    pub fn to_tuple(&self) -> Tuple {
        Tuple::from(vec![
            Value::Date(Some(self.collect_date)),
            Value::Timestamp(Some(self.sunrise)),
            Value::Timestamp(Some(self.sunset)),
        ])
    }

    pub fn from_tuple(tuple: &Tuple) -> Result<Self> {
        tuple.expect_arity("CountryRecord", Self::ARITY)?;
        Self::new(
            tuple.required_date(0, "collect_date")?,
            tuple.required_timestamp(1, "sunrise")?,
            tuple.required_timestamp(2, "sunset")?,
        )
    }

    pub fn to_document(&self) -> Document {
        doc! {
            "collect_date": self.collect_date.format("%Y-%m-%d").to_string(),
            "sunrise": time_bson(self.sunrise),
            "sunset": time_bson(self.sunset),
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let raw_date = req_str(doc, "collect_date")?;
        let collect_date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
            .map_err(|e| AppError::Format(format!("collect_date '{}': {}", raw_date, e)))?;
        Self::new(collect_date, req_time(doc, "sunrise")?, req_time(doc, "sunset")?)
    }
}

/// A country identified by its ISO 3166-1 alpha-2 code.
#[derive(Debug, Clone, PartialEq)]
pub struct Country {
    code: String,
    name: Option<String>,
    records: Vec<CountryRecord>,
}

impl Country {
    pub const ARITY: usize = 3;

    /// Accepts an alpha-2 or alpha-3 code (any case) and normalizes it to alpha-2.
    pub fn new(code: &str, name: Option<String>) -> Result<Self> {
        Ok(Self {
            code: normalize_code(code)?,
            name,
            records: Vec::new(),
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn set_code(&mut self, code: &str) -> Result<()> {
        self.code = normalize_code(code)?;
        Ok(())
    }

    pub fn records(&self) -> &[CountryRecord] {
        &self.records
    }

    pub fn push_record(&mut self, record: CountryRecord) {
        self.records.push(record);
    }

    pub fn alpha3(&self) -> &'static str {
        lookup(&self.code).map_or("", |c| c.alpha3)
    }

    /// Official English short name from the ISO table.
    pub fn iso_name(&self) -> &'static str {
        lookup(&self.code).map_or("", |c| c.long_name)
    }

    /// `(code, name, [CountryRecord tuples])`
    pub fn to_tuple(&self) -> Tuple {
        Tuple::from(vec![
            Value::Text(Some(self.code.clone())),
            Value::Text(self.name.clone()),
            Value::List(self.records.iter().map(CountryRecord::to_tuple).collect()),
        ])
    }

    pub fn from_tuple(tuple: &Tuple) -> Result<Self> {
        tuple.expect_arity("Country", Self::ARITY)?;
        let mut country = Self::new(&tuple.required_text(0, "code")?, tuple.text(1)?)?;
        for record in tuple.list(2)? {
            country.push_record(CountryRecord::from_tuple(record)?);
        }
        Ok(country)
    }

    pub fn to_document(&self) -> Document {
        let records: Vec<Bson> = self
            .records
            .iter()
            .map(|r| Bson::Document(r.to_document()))
            .collect();
        doc! {
            "code": &self.code,
            "name": opt_str_bson(self.name.as_deref()),
            "records": records,
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let mut country = Self::new(&req_str(doc, "code")?, opt_str(doc, "name")?)?;
        for record in doc_array(doc, "records")? {
            country.push_record(CountryRecord::from_document(record)?);
        }
        Ok(country)
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

fn lookup(code: &str) -> Option<celes::Country> {
    match code.len() {
        2 => celes::Country::from_alpha2(code).ok(),
        3 => celes::Country::from_alpha3(code).ok(),
        _ => None,
    }
}

/// Resolves a 2- or 3-letter ISO code to its canonical alpha-2 form.
pub fn normalize_code(code: &str) -> Result<String> {
    let code = code.trim().to_ascii_uppercase();
    lookup(&code)
        .map(|c| c.alpha2.to_string())
        .ok_or_else(|| {
            AppError::Validation(format!("'{}' is not an ISO 3166-1 country code", code))
        })
}

/// A city. Coordinates are `None` until resolved by geocoding.
#[derive(Debug, Clone, PartialEq)]
pub struct City {
    id: i64,
    name: String,
    longitude: Option<f64>,
    latitude: Option<f64>,
    time_zone: i32,
    country: Arc<Country>,
}

impl City {
    pub const ARITY: usize = 6;

    pub fn new(
        id: i64,
        name: impl Into<String>,
        coordinates: Option<(f64, f64)>,
        time_zone: i64,
        country: Arc<Country>,
    ) -> Result<Self> {
        let mut city = Self {
            id,
            name: String::new(),
            longitude: None,
            latitude: None,
            time_zone: 0,
            country,
        };
        city.set_name(name)?;
        city.set_time_zone(time_zone)?;
        if let Some((lon, lat)) = coordinates {
            city.set_coordinates(lon, lat)?;
        }
        Ok(city)
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn longitude(&self) -> Option<f64> {
        self.longitude
    }

    pub fn latitude(&self) -> Option<f64> {
        self.latitude
    }

    /// `(longitude, latitude)` once both are known.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.longitude.zip(self.latitude)
    }

    pub fn has_coordinates(&self) -> bool {
        self.coordinates().is_some()
    }

    pub fn time_zone(&self) -> i32 {
        self.time_zone
    }

    pub fn country(&self) -> &Arc<Country> {
        &self.country
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::Validation(format!("city {} has an empty name", self.id)));
        }
        self.name = name;
        Ok(())
    }

    pub fn set_coordinates(&mut self, longitude: f64, latitude: f64) -> Result<()> {
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(AppError::Validation(format!(
                "longitude {} outside [-180, 180]",
                longitude
            )));
        }
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(AppError::Validation(format!(
                "latitude {} outside [-90, 90]",
                latitude
            )));
        }
        self.longitude = Some(longitude);
        self.latitude = Some(latitude);
        Ok(())
    }

    pub fn set_time_zone(&mut self, time_zone: i64) -> Result<()> {
        if !(i64::from(MIN_TIME_ZONE)..=i64::from(MAX_TIME_ZONE)).contains(&time_zone) {
            return Err(AppError::Validation(format!(
                "time zone {} outside [{}, {}]",
                time_zone, MIN_TIME_ZONE, MAX_TIME_ZONE
            )));
        }
        // In range, so the narrowing is lossless.
        self.time_zone = time_zone as i32;
        Ok(())
    }

    pub fn set_country(&mut self, country: Arc<Country>) {
        self.country = country;
    }

    /// `(id, name, longitude, latitude, time_zone, Country tuple)`
    pub fn to_tuple(&self) -> Tuple {
        Tuple::from(vec![
            Value::Int(Some(self.id)),
            Value::Text(Some(self.name.clone())),
            Value::Float(self.longitude),
            Value::Float(self.latitude),
            Value::Int(Some(i64::from(self.time_zone))),
            Value::Tuple(self.country.to_tuple()),
        ])
    }

    pub fn from_tuple(tuple: &Tuple) -> Result<Self> {
        tuple.expect_arity("City", Self::ARITY)?;
        let country = Arc::new(Country::from_tuple(tuple.tuple(5)?)?);
        Self::new(
            tuple.required_int(0, "id")?,
            tuple.required_text(1, "name")?,
            coordinate_pair(tuple.float(2)?, tuple.float(3)?)?,
            tuple.required_int(4, "time_zone")?,
            country,
        )
    }

    /// The full country is embedded under `country`.
    pub fn to_document(&self) -> Document {
        doc! {
            "id": self.id,
            "name": &self.name,
            "lon": opt_f64_bson(self.longitude),
            "lat": opt_f64_bson(self.latitude),
            "time_zone": i64::from(self.time_zone),
            "country": self.country.to_document(),
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let country = Arc::new(Country::from_document(req_doc(doc, "country")?)?);
        Self::new(
            req_i64(doc, "id")?,
            req_str(doc, "name")?,
            coordinate_pair(opt_f64(doc, "lon")?, opt_f64(doc, "lat")?)?,
            req_i64(doc, "time_zone")?,
            country,
        )
    }
}

fn coordinate_pair(lon: Option<f64>, lat: Option<f64>) -> Result<Option<(f64, f64)>> {
    match (lon, lat) {
        (Some(lon), Some(lat)) => Ok(Some((lon, lat))),
        (None, None) => Ok(None),
        _ => Err(AppError::Validation(
            "longitude and latitude must be both present or both absent".to_string(),
        )),
    }
}
