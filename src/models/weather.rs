//! Weather entities: condition tags (`GeneralWeather`) and per-city snapshots (`WeatherStatus`).

use super::document::{
    doc_array, opt_f64, opt_f64_bson, opt_i64, opt_i64_bson, opt_str, opt_str_bson,
    opt_time, opt_time_bson, req_i64, req_str, req_time, time_bson,
};
use super::tuple::{Tuple, Value};
use crate::error::{AppError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use mongodb::bson::{doc, Bson, Document};

/// Decimal places kept for every stored floating-point reading.
pub const FLOAT_PRECISION: i32 = 7;

/// Values too large to scale by `10^precision` carry no fractional digits and are kept as is.
pub fn round_to(value: f64, precision: i32) -> f64 {
    let factor = 10f64.powi(precision);
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

/// A weather condition group from the external taxonomy (e.g. "Clouds", "Rain").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeneralWeather {
    status_id: String,
    description: Option<String>,
}

impl GeneralWeather {
    pub const ARITY: usize = 2;

    pub fn new(status_id: impl Into<String>, description: Option<String>) -> Result<Self> {
        let status_id = status_id.into();
        if status_id.trim().is_empty() {
            return Err(AppError::Validation("weather status id is empty".to_string()));
        }
        Ok(Self {
            status_id,
            description,
        })
    }

    pub fn status_id(&self) -> &str {
        &self.status_id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// `(status_id, description)`
    pub fn to_tuple(&self) -> Tuple {
        Tuple::from(vec![
            Value::Text(Some(self.status_id.clone())),
            Value::Text(self.description.clone()),
        ])
    }

    pub fn from_tuple(tuple: &Tuple) -> Result<Self> {
        tuple.expect_arity("GeneralWeather", Self::ARITY)?;
        Self::new(tuple.required_text(0, "status_id")?, tuple.text(1)?)
    }

    pub fn to_document(&self) -> Document {
        doc! {
            "status_id": &self.status_id,
            "description": opt_str_bson(self.description.as_deref()),
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        Self::new(req_str(doc, "status_id")?, opt_str(doc, "description")?)
    }
}

/// Numeric readings of one snapshot. Every field is independently nullable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readings {
    pub temp: Option<f64>,
    pub feels_temp: Option<f64>,
    pub pressure: Option<i64>,
    pub humidity: Option<i64>,
    pub sea_level: Option<i64>,
    pub grnd_level: Option<i64>,
    pub visibility: Option<i64>,
    pub wind_speed: Option<f64>,
    pub wind_deg: Option<i64>,
    pub wind_gust: Option<f64>,
    pub clouds_all: Option<i64>,
    pub rain: Option<f64>,
    pub aqi: Option<i64>,
    pub pm2_5: Option<f64>,
}

fn check_f64(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !v.is_finite() => Err(AppError::Validation(format!(
            "{} must be a finite number, got {}",
            field, v
        ))),
        Some(v) if v < 0.0 => Err(AppError::Validation(format!(
            "{} must not be negative, got {}",
            field, v
        ))),
        _ => Ok(()),
    }
}

fn check_range(field: &str, value: Option<i64>, min: i64, max: i64) -> Result<()> {
    match value {
        Some(v) if v < min || v > max => Err(AppError::Validation(format!(
            "{} must lie in [{}, {}], got {}",
            field, min, max, v
        ))),
        _ => Ok(()),
    }
}

impl Readings {
    pub fn validate(&self) -> Result<()> {
        check_f64("temp", self.temp)?;
        check_f64("feels_temp", self.feels_temp)?;
        check_f64("wind_speed", self.wind_speed)?;
        check_f64("wind_gust", self.wind_gust)?;
        check_f64("rain", self.rain)?;
        check_f64("pm2_5", self.pm2_5)?;

        check_range("pressure", self.pressure, 0, i64::MAX)?;
        check_range("sea_level", self.sea_level, 0, i64::MAX)?;
        check_range("grnd_level", self.grnd_level, 0, i64::MAX)?;
        check_range("visibility", self.visibility, 0, i64::MAX)?;
        check_range("humidity", self.humidity, 0, 100)?;
        check_range("clouds_all", self.clouds_all, 0, 100)?;
        check_range("wind_deg", self.wind_deg, 0, 360)?;
        check_range("aqi", self.aqi, 1, 5)
    }

    fn rounded(mut self, precision: i32) -> Self {
        for field in [
            &mut self.temp,
            &mut self.feels_temp,
            &mut self.wind_speed,
            &mut self.wind_gust,
            &mut self.rain,
            &mut self.pm2_5,
        ] {
            *field = field.map(|v| round_to(v, precision));
        }
        self
    }
}

/// Weather snapshot of one city at one instant; `(city_id, collect_time)` is its natural key.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherStatus {
    city_id: i64,
    collect_time: DateTime<Utc>,
    readings: Readings,
    sunrise: Option<DateTime<Utc>>,
    sunset: Option<DateTime<Utc>>,
    conditions: Vec<GeneralWeather>,
}

impl WeatherStatus {
    pub const ARITY: usize = 19;

    pub fn new(
        city_id: i64,
        collect_time: DateTime<Utc>,
        readings: Readings,
        sunrise: Option<DateTime<Utc>>,
        sunset: Option<DateTime<Utc>>,
        conditions: Vec<GeneralWeather>,
    ) -> Result<Self> {
        let mut status = Self {
            city_id,
            collect_time: collect_time.trunc_subsecs(0),
            readings: Readings::default(),
            sunrise: None,
            sunset: None,
            conditions: Vec::new(),
        };
        status.set_readings(readings)?;
        status.set_sun_times(sunrise, sunset)?;
        status.set_conditions(conditions);
        Ok(status)
    }

    pub fn city_id(&self) -> i64 {
        self.city_id
    }

    pub fn collect_time(&self) -> DateTime<Utc> {
        self.collect_time
    }

    pub fn readings(&self) -> &Readings {
        &self.readings
    }

    pub fn sunrise(&self) -> Option<DateTime<Utc>> {
        self.sunrise
    }

    pub fn sunset(&self) -> Option<DateTime<Utc>> {
        self.sunset
    }

    pub fn conditions(&self) -> &[GeneralWeather] {
        &self.conditions
    }

    /// Validates, then stores the readings rounded to [`FLOAT_PRECISION`].
    pub fn set_readings(&mut self, readings: Readings) -> Result<()> {
        readings.validate()?;
        self.readings = readings.rounded(FLOAT_PRECISION);
        Ok(())
    }

    pub fn set_sun_times(
        &mut self,
        sunrise: Option<DateTime<Utc>>,
        sunset: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let sunrise = sunrise.map(|t| t.trunc_subsecs(0));
        let sunset = sunset.map(|t| t.trunc_subsecs(0));
        if let (Some(rise), Some(set)) = (sunrise, sunset) {
            if set < rise {
                return Err(AppError::Validation(format!(
                    "sunset {} precedes sunrise {}",
                    set, rise
                )));
            }
        }
        self.sunrise = sunrise;
        self.sunset = sunset;
        Ok(())
    }

    /// Duplicate tags are dropped, first occurrence wins.
    pub fn set_conditions(&mut self, conditions: Vec<GeneralWeather>) {
        self.conditions.clear();
        for condition in conditions {
            self.add_condition(condition);
        }
    }

    pub fn add_condition(&mut self, condition: GeneralWeather) {
        if !self
            .conditions
            .iter()
            .any(|c| c.status_id == condition.status_id)
        {
            self.conditions.push(condition);
        }
    }

    /// `(city_id, collect_time, temp, feels_temp, pressure, humidity, sea_level,
    /// grnd_level, visibility, wind_speed, wind_deg, wind_gust, clouds_all, rain,
    /// sunrise, sunset, aqi, pm2_5, [GeneralWeather tuples])`
    pub fn to_tuple(&self) -> Tuple {
        let r = &self.readings;
        Tuple::from(vec![
            Value::Int(Some(self.city_id)),
            Value::Timestamp(Some(self.collect_time)),
            Value::Float(r.temp),
            Value::Float(r.feels_temp),
            Value::Int(r.pressure),
            Value::Int(r.humidity),
            Value::Int(r.sea_level),
            Value::Int(r.grnd_level),
            Value::Int(r.visibility),
            Value::Float(r.wind_speed),
            Value::Int(r.wind_deg),
            Value::Float(r.wind_gust),
            Value::Int(r.clouds_all),
            Value::Float(r.rain),
            Value::Timestamp(self.sunrise),
            Value::Timestamp(self.sunset),
            Value::Int(r.aqi),
            Value::Float(r.pm2_5),
            Value::List(self.conditions.iter().map(GeneralWeather::to_tuple).collect()),
        ])
    }

    pub fn from_tuple(tuple: &Tuple) -> Result<Self> {
        tuple.expect_arity("WeatherStatus", Self::ARITY)?;
        let readings = Readings {
            temp: tuple.float(2)?,
            feels_temp: tuple.float(3)?,
            pressure: tuple.int(4)?,
            humidity: tuple.int(5)?,
            sea_level: tuple.int(6)?,
            grnd_level: tuple.int(7)?,
            visibility: tuple.int(8)?,
            wind_speed: tuple.float(9)?,
            wind_deg: tuple.int(10)?,
            wind_gust: tuple.float(11)?,
            clouds_all: tuple.int(12)?,
            rain: tuple.float(13)?,
            aqi: tuple.int(16)?,
            pm2_5: tuple.float(17)?,
        };
        let conditions = tuple
            .list(18)?
            .iter()
            .map(GeneralWeather::from_tuple)
            .collect::<Result<Vec<_>>>()?;
        Self::new(
            tuple.required_int(0, "city_id")?,
            tuple.required_timestamp(1, "collect_time")?,
            readings,
            tuple.timestamp(14)?,
            tuple.timestamp(15)?,
            conditions,
        )
    }

    /// Condition tags are embedded in full under `general_weathers`.
    pub fn to_document(&self) -> Document {
        let r = &self.readings;
        let conditions: Vec<Bson> = self
            .conditions
            .iter()
            .map(|c| Bson::Document(c.to_document()))
            .collect();
        doc! {
            "city_id": self.city_id,
            "collect_time": time_bson(self.collect_time),
            "temp": opt_f64_bson(r.temp),
            "feels_temp": opt_f64_bson(r.feels_temp),
            "pressure": opt_i64_bson(r.pressure),
            "humidity": opt_i64_bson(r.humidity),
            "sea_level": opt_i64_bson(r.sea_level),
            "grnd_level": opt_i64_bson(r.grnd_level),
            "visibility": opt_i64_bson(r.visibility),
            "wind_speed": opt_f64_bson(r.wind_speed),
            "wind_deg": opt_i64_bson(r.wind_deg),
            "wind_gust": opt_f64_bson(r.wind_gust),
            "clouds_all": opt_i64_bson(r.clouds_all),
            "rain": opt_f64_bson(r.rain),
            "sunrise": opt_time_bson(self.sunrise),
            "sunset": opt_time_bson(self.sunset),
            "aqi": opt_i64_bson(r.aqi),
            "pm2_5": opt_f64_bson(r.pm2_5),
            "general_weathers": conditions,
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let readings = Readings {
            temp: opt_f64(doc, "temp")?,
            feels_temp: opt_f64(doc, "feels_temp")?,
            pressure: opt_i64(doc, "pressure")?,
            humidity: opt_i64(doc, "humidity")?,
            sea_level: opt_i64(doc, "sea_level")?,
            grnd_level: opt_i64(doc, "grnd_level")?,
            visibility: opt_i64(doc, "visibility")?,
            wind_speed: opt_f64(doc, "wind_speed")?,
            wind_deg: opt_i64(doc, "wind_deg")?,
            wind_gust: opt_f64(doc, "wind_gust")?,
            clouds_all: opt_i64(doc, "clouds_all")?,
            rain: opt_f64(doc, "rain")?,
            aqi: opt_i64(doc, "aqi")?,
            pm2_5: opt_f64(doc, "pm2_5")?,
        };
        let conditions = doc_array(doc, "general_weathers")?
            .into_iter()
            .map(GeneralWeather::from_document)
            .collect::<Result<Vec<_>>>()?;
        Self::new(
            req_i64(doc, "city_id")?,
            req_time(doc, "collect_time")?,
            readings,
            opt_time(doc, "sunrise")?,
            opt_time(doc, "sunset")?,
            conditions,
        )
    }
}
