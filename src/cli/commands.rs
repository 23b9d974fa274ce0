use crate::api::OpenWeatherClient;
use crate::business::{place, weather};
use crate::config::Config;
use crate::db::{self, Backend, CityKey};
use crate::error::{AppError, Result};
use crate::etl::{run_scheduled, EtlPipeline, RunSummary, Schedule};
use crate::models::{City, Country, GeneralWeather, WeatherStatus};
use chrono::NaiveTime;
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use comfy_table::Table;
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Weather ETL for city lists, stored in Postgres or MongoDB
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Storage backend (overrides STORAGE_BACKEND)
    #[arg(long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// Runs the interactive menu when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create tables/collections and seed the weather condition groups
    InitDb,

    /// Run the ETL once for ETL_COUNTRY
    Etl,

    /// Run the ETL on a schedule
    Schedule(ScheduleArgs),

    /// List the cities of a country
    Cities(CountryArgs),

    /// Show one city by id or name
    City(CityArgs),

    /// Add a city, or replace the stored one with the same id
    AddCity(AddCityArgs),

    /// Delete cities by id
    DeleteCities(CityIdsArgs),

    /// Show a country and its sunrise/sunset records
    Country(CountryArgs),

    /// List weather condition groups
    Conditions(ConditionArgs),

    /// Show the weather history of a city
    History(CityIdArgs),

    /// Delete the weather history of a city
    Clear(CityIdArgs),

    /// Geocode every city of the given countries that has no coordinates
    Backfill(CountriesArgs),
}

#[derive(Args, Debug)]
pub struct CountryArgs {
    /// ISO 3166-1 alpha-2 or alpha-3 code (default: ETL_COUNTRY)
    #[arg(short, long)]
    pub country: Option<String>,
}

#[derive(Args, Debug)]
pub struct CountriesArgs {
    /// ISO 3166-1 alpha-2 or alpha-3 code, repeatable
    #[arg(short, long = "country", required = true)]
    pub countries: Vec<String>,
}

#[derive(Args, Debug)]
pub struct CityArgs {
    #[arg(long, conflicts_with = "name", required_unless_present = "name")]
    pub id: Option<i64>,

    #[arg(long)]
    pub name: Option<String>,

    /// Geocode and store the coordinates if they are missing
    #[arg(long)]
    pub resolve: bool,
}

impl CityArgs {
    pub fn key(&self) -> Result<CityKey> {
        match (self.id, &self.name) {
            (Some(id), _) => Ok(CityKey::Id(id)),
            (None, Some(name)) => Ok(CityKey::Name(name.clone())),
            (None, None) => Err(AppError::Cli("either --id or --name is required".to_string())),
        }
    }
}

#[derive(Args, Debug)]
pub struct AddCityArgs {
    #[arg(long)]
    pub id: i64,

    #[arg(long)]
    pub name: String,

    /// ISO 3166-1 alpha-2 or alpha-3 code
    #[arg(short, long)]
    pub country: String,

    /// UTC offset in hours, [-12, 14]
    #[arg(long, allow_hyphen_values = true)]
    pub time_zone: i64,

    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    pub lon: Option<f64>,

    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    pub lat: Option<f64>,
}

impl AddCityArgs {
    pub fn to_city(&self) -> Result<City> {
        let country = Country::new(&self.country, None)?;
        City::new(
            self.id,
            self.name.clone(),
            self.lon.zip(self.lat),
            self.time_zone,
            Arc::new(country),
        )
    }
}

#[derive(Args, Debug)]
pub struct CityIdsArgs {
    #[arg(long = "id", required = true)]
    pub ids: Vec<i64>,
}

#[derive(Args, Debug)]
pub struct CityIdArgs {
    #[arg(long)]
    pub city_id: i64,
}

#[derive(Args, Debug)]
pub struct ConditionArgs {
    /// Only these groups (e.g. Rain), repeatable
    #[arg(long = "id")]
    pub ids: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    Daily,
    Hourly,
    Minutely,
}

#[derive(Args, Debug)]
pub struct ScheduleArgs {
    #[arg(value_enum)]
    pub mode: ScheduleMode,

    /// Daily collect time as HH:MM, repeatable
    #[arg(long = "at", value_parser = parse_time)]
    pub at: Vec<NaiveTime>,

    /// Minute frequency for minutely mode, [1, 59]
    #[arg(long, default_value_t = 10)]
    pub every: u32,

    /// Stop after this many runs
    #[arg(long)]
    pub limit: Option<u64>,
}

impl ScheduleArgs {
    pub fn schedule(&self) -> Result<Schedule> {
        match self.mode {
            ScheduleMode::Daily => Schedule::daily(self.at.clone()),
            ScheduleMode::Hourly => Ok(Schedule::hourly()),
            ScheduleMode::Minutely => Schedule::minutely(self.every),
        }
    }
}

pub fn parse_time(s: &str) -> std::result::Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| format!("invalid time '{}', expected HH:MM: {}", s, e))
}

/// User-facing text for an error: missing records and storage faults get a
/// fixed prefix, everything else is shown as is.
pub fn describe_error(err: &AppError) -> String {
    match err {
        AppError::NotFound(what) => format!("not found: {}", what),
        e if e.is_data_access() => format!("storage unavailable: {}", e),
        e => e.to_string(),
    }
}

/// CLI application
pub struct App {
    config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn client(&self) -> Result<Arc<OpenWeatherClient>> {
        Ok(Arc::new(OpenWeatherClient::new(
            self.config.api_key()?,
            &self.config.openweather_base_url,
        )))
    }

    async fn pipeline(&self, run_limit: Option<u64>) -> Result<EtlPipeline> {
        let client = self.client()?;
        let cities = db::city_dao(&self.config).await?;
        let statuses = db::weather_status_dao(&self.config).await?;
        Ok(EtlPipeline::new(
            cities,
            statuses,
            client.clone(),
            client,
            self.config.etl_country.clone(),
        )
        .with_run_limit(run_limit))
    }

    fn country_or_default(&self, args: &CountryArgs) -> String {
        args.country
            .clone()
            .unwrap_or_else(|| self.config.etl_country.clone())
    }

    /// Run a single command against the configured backend
    pub async fn run_command(&self, command: Commands) -> Result<()> {
        info!(backend = %self.config.backend, ?command, "Running command");
        match command {
            Commands::InitDb => {
                db::initialize(&self.config).await?;
                println!("{}", "Storage initialized successfully".green());
            },
            Commands::Etl => {
                let mut pipeline = self.pipeline(None).await?;
                let bar = spinner(format!("Running ETL for {}...", self.config.etl_country))?;
                let outcome = pipeline.run().await;
                bar.finish_and_clear();
                let summary = settle(outcome, pipeline.close().await)?;
                println!("{}", summary_table(&summary));
            },
            Commands::Schedule(args) => {
                let schedule = args.schedule()?;
                let mut pipeline = self.pipeline(args.limit).await?;
                println!("{} {}", "Scheduling ETL".cyan().bold(), schedule);
                let runs = run_scheduled(&mut pipeline, &schedule).await;
                settle(Ok(()), pipeline.close().await)?;
                println!("{}", format!("Completed {} scheduled run(s)", runs).green());
            },
            Commands::Cities(args) => {
                let code = self.country_or_default(&args);
                let mut dao = db::city_dao(&self.config).await?;
                let outcome = dao.get_all(&code).await;
                let cities = settle(outcome, dao.close().await)?;
                if cities.is_empty() {
                    println!("{}", format!("No cities stored for {}", code).yellow());
                } else {
                    println!("{}", cities_table(&cities));
                }
            },
            Commands::City(args) => {
                let key = args.key()?;
                let client = if args.resolve {
                    Some(self.client()?)
                } else {
                    None
                };
                let mut dao = db::city_dao(&self.config).await?;
                let outcome = match &client {
                    Some(client) => place::resolve_city(dao.as_ref(), client.as_ref(), &key).await,
                    None => dao.get(&key).await,
                };
                let city = settle(outcome, dao.close().await)?;
                println!("{}", cities_table(std::slice::from_ref(&city)));
            },
            Commands::AddCity(args) => {
                let city = args.to_city()?;
                let mut dao = db::city_dao(&self.config).await?;
                let outcome = place::insert_cities(dao.as_ref(), std::slice::from_ref(&city)).await;
                settle(outcome, dao.close().await)?;
                println!("{}", format!("Stored city {} ({})", city.id(), city.name()).green());
            },
            Commands::DeleteCities(args) => {
                let mut dao = db::city_dao(&self.config).await?;
                let outcome = place::delete_cities(dao.as_ref(), &args.ids).await;
                settle(outcome, dao.close().await)?;
                println!("{}", format!("Deleted {} city(ies)", args.ids.len()).green());
            },
            Commands::Country(args) => {
                let code = self.country_or_default(&args);
                let mut dao = db::country_dao(&self.config).await?;
                let outcome = place::get_country(dao.as_ref(), &code).await;
                let country = settle(outcome, dao.close().await)?;
                println!(
                    "{} {} ({}, {})",
                    country.code().cyan().bold(),
                    country.name().unwrap_or(country.iso_name()),
                    country.alpha3(),
                    country.iso_name()
                );
                println!("{}", country_table(&country));
            },
            Commands::Conditions(args) => {
                let ids = (!args.ids.is_empty()).then_some(args.ids.as_slice());
                let mut dao = db::general_weather_dao(&self.config).await?;
                let outcome = weather::general_weathers(dao.as_ref(), ids).await;
                let conditions = settle(outcome, dao.close().await)?;
                println!("{}", conditions_table(&conditions));
            },
            Commands::History(args) => {
                let mut dao = db::weather_status_dao(&self.config).await?;
                let outcome = weather::history(dao.as_ref(), args.city_id).await;
                let history = settle(outcome, dao.close().await)?;
                if history.is_empty() {
                    println!(
                        "{}",
                        format!("No weather history for city {}", args.city_id).yellow()
                    );
                } else {
                    println!("{}", history_table(&history));
                }
            },
            Commands::Clear(args) => {
                let mut dao = db::weather_status_dao(&self.config).await?;
                let outcome = weather::clear(dao.as_ref(), args.city_id).await;
                settle(outcome, dao.close().await)?;
                println!(
                    "{}",
                    format!("Cleared weather history of city {}", args.city_id).green()
                );
            },
            Commands::Backfill(args) => {
                let client = self.client()?;
                let codes: Vec<&str> = args.countries.iter().map(String::as_str).collect();
                let mut dao = db::city_dao(&self.config).await?;
                let bar = spinner("Backfilling coordinates...".to_string())?;
                let outcome =
                    place::cities_of_countries(dao.as_ref(), client.as_ref(), &codes).await;
                bar.finish_and_clear();
                let by_country = settle(outcome, dao.close().await)?;
                for (code, cities) in &by_country {
                    println!("{}", code.cyan().bold());
                    println!("{}", cities_table(cities));
                }
            },
        }

        Ok(())
    }
}

/// Returns the command outcome; a failure to close is only logged.
fn settle<T>(outcome: Result<T>, closed: Result<()>) -> Result<T> {
    if let Err(e) = closed {
        warn!(error = %e, "Failed to close storage connection");
    }
    outcome
}

fn spinner(message: String) -> Result<ProgressBar> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]")?);
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    Ok(bar)
}

fn opt<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub fn cities_table(cities: &[City]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Longitude", "Latitude", "UTC offset", "Country"]);
    for city in cities {
        table.add_row(vec![
            city.id().to_string(),
            city.name().to_string(),
            opt(city.longitude()),
            opt(city.latitude()),
            format!("{:+}", city.time_zone()),
            city.country().code().to_string(),
        ]);
    }
    table
}

pub fn country_table(country: &Country) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Collect date", "Sunrise (UTC)", "Sunset (UTC)"]);
    for record in country.records() {
        table.add_row(vec![
            record.collect_date().to_string(),
            record.sunrise().format("%H:%M:%S").to_string(),
            record.sunset().format("%H:%M:%S").to_string(),
        ]);
    }
    table
}

pub fn conditions_table(conditions: &[GeneralWeather]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Status", "Description"]);
    for condition in conditions {
        table.add_row(vec![
            condition.status_id().to_string(),
            condition.description().unwrap_or("-").to_string(),
        ]);
    }
    table
}

pub fn history_table(history: &[WeatherStatus]) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "Collected (UTC)",
        "Temp",
        "Feels",
        "Humidity",
        "Wind",
        "Clouds",
        "Rain 1h",
        "AQI",
        "PM2.5",
        "Conditions",
    ]);
    for status in history {
        let r = status.readings();
        let conditions: Vec<&str> = status.conditions().iter().map(|c| c.status_id()).collect();
        table.add_row(vec![
            status.collect_time().format("%Y-%m-%d %H:%M:%S").to_string(),
            opt(r.temp),
            opt(r.feels_temp),
            opt(r.humidity),
            opt(r.wind_speed),
            opt(r.clouds_all),
            opt(r.rain),
            opt(r.aqi),
            opt(r.pm2_5),
            conditions.join(", "),
        ]);
    }
    table
}

pub fn summary_table(summary: &RunSummary) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Job", "Cities", "Extract", "Transform", "Load", "Elapsed"]);
    table.add_row(vec![
        summary.job.to_string(),
        summary.cities.to_string(),
        summary.extract.to_string(),
        summary.transform.to_string(),
        summary.load.to_string(),
        format!("{:.2}s", summary.elapsed.as_secs_f64()),
    ]);
    table
}
