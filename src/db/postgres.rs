//! PostgreSQL implementation of the DAO contracts using `sqlx`.
//!
//! All statement text comes from the `sql/` resources through [`StatementSet`];
//! this module only binds parameters, decodes rows into positional [`Tuple`]s and
//! hands them to the model constructors. Each DAO owns a pool capped at one
//! connection. Composite writes run in one transaction that is rolled back on
//! the first failure.
//! Also contains integration tests (requires the `integration-tests` feature).

use super::dao::{closed, CityDao, CityKey, CountryDao, GeneralWeatherDao, WeatherStatusDao};
use super::statements::{names, Resource, StatementSet, StatementStore};
use crate::error::{AppError, Result};
use crate::models::{normalize_code, City, Country, GeneralWeather, Tuple, Value, WeatherStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgConnection, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::{debug, error, info};

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Column types of a result row, in select-list order.
#[derive(Debug, Clone, Copy)]
enum Column {
    Int,
    Float,
    Text,
    Date,
    Timestamp,
}

const COUNTRY_COLUMNS: [Column; 2] = [Column::Text, Column::Text];
const RECORD_COLUMNS: [Column; 3] = [Column::Date, Column::Timestamp, Column::Timestamp];
/// The trailing text column is the country code, replaced by the country tuple.
const CITY_COLUMNS: [Column; 6] = [
    Column::Int,
    Column::Text,
    Column::Float,
    Column::Float,
    Column::Int,
    Column::Text,
];
const GENERAL_WEATHER_COLUMNS: [Column; 2] = [Column::Text, Column::Text];
/// Every status column; the condition list is appended from a second query.
const STATUS_COLUMNS: [Column; 18] = [
    Column::Int,
    Column::Timestamp,
    Column::Float,
    Column::Float,
    Column::Int,
    Column::Int,
    Column::Int,
    Column::Int,
    Column::Int,
    Column::Float,
    Column::Int,
    Column::Float,
    Column::Int,
    Column::Float,
    Column::Timestamp,
    Column::Timestamp,
    Column::Int,
    Column::Float,
];

fn decode_row(row: &PgRow, columns: &[Column]) -> Result<Tuple> {
    if row.len() != columns.len() {
        return Err(AppError::Format(format!(
            "row has {} columns, expected {}",
            row.len(),
            columns.len()
        )));
    }
    let mut values = Vec::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        values.push(match column {
            Column::Int => Value::Int(row.try_get(index)?),
            Column::Float => Value::Float(row.try_get(index)?),
            Column::Text => Value::Text(row.try_get(index)?),
            Column::Date => Value::Date(row.try_get(index)?),
            Column::Timestamp => Value::Timestamp(row.try_get(index)?),
        });
    }
    Ok(Tuple::from(values))
}

fn bind_values<'q>(mut query: PgQuery<'q>, values: &[Value]) -> Result<PgQuery<'q>> {
    for value in values {
        query = match value {
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Date(v) => query.bind(*v),
            Value::Timestamp(v) => query.bind(*v),
            Value::Tuple(_) | Value::List(_) => {
                return Err(AppError::Format(
                    "nested values cannot be bound as statement parameters".to_string(),
                ))
            },
        };
    }
    Ok(query)
}

fn driver(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| {
        error!("{}: {}", context, e);
        AppError::Db(e.into())
    }
}

/// Commits on success, otherwise rolls back and returns the original error.
async fn finish(tx: Transaction<'_, Postgres>, outcome: Result<()>) -> Result<()> {
    match outcome {
        Ok(()) => tx
            .commit()
            .await
            .map_err(driver("Failed to commit transaction")),
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                error!("Failed to roll back transaction: {}", rollback);
            }
            Err(e)
        },
    }
}

/// A single-connection pool that can be closed exactly once.
pub struct PgHandle {
    pool: Option<PgPool>,
}

impl PgHandle {
    /// # Errors
    ///
    /// Returns `AppError::Db` if the connection cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self> {
        debug!("Connecting to database...");
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .map_err(driver("Failed to connect to database"))?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool: Some(pool) }
    }

    pub(crate) fn pool(&self) -> Result<&PgPool> {
        self.pool.as_ref().ok_or_else(closed)
    }

    pub(crate) async fn close(&mut self) -> Result<()> {
        let pool = self.pool.take().ok_or_else(closed)?;
        pool.close().await;
        debug!("Database connection closed");
        Ok(())
    }
}

/// Runs every statement of `schema.sql` in file order.
pub async fn init_schema(pool: &PgPool, store: &StatementStore) -> Result<()> {
    info!("Initializing database schema (if necessary)...");
    let schema = store.load(Resource::Schema)?;
    for name in schema.names().filter(|n| *n != names::schema::CHECK_INITIALIZED) {
        sqlx::query(schema.get(name)?)
            .execute(pool)
            .await
            .map_err(driver("Failed to run schema statement"))?;
        debug!(statement = name, "Schema statement applied");
    }
    info!("Database schema initialized successfully");
    Ok(())
}

/// True once the last table created by `schema.sql` exists.
pub async fn is_schema_initialized(pool: &PgPool, store: &StatementStore) -> Result<bool> {
    let schema = store.load(Resource::Schema)?;
    let query = schema.get(names::schema::CHECK_INITIALIZED)?;
    let initialized = sqlx::query_scalar::<_, bool>(query)
        .fetch_one(pool)
        .await
        .map_err(driver("Failed to check schema existence"))?;
    debug!("Schema initialized status: {}", initialized);
    Ok(initialized)
}

// --- Shared country access, used by both the country and the city DAO ---

struct CountryStatements {
    country: StatementSet,
    records: StatementSet,
}

impl CountryStatements {
    fn load(store: &StatementStore) -> Result<Self> {
        Ok(Self {
            country: store.load(Resource::Country)?,
            records: store.load(Resource::CountryRecord)?,
        })
    }

    async fn fetch(&self, conn: &mut PgConnection, code: &str) -> Result<Country> {
        let row = sqlx::query(self.country.get(names::country::GET_BY_CODE)?)
            .bind(code)
            .fetch_optional(&mut *conn)
            .await
            .map_err(driver("Failed to query country"))?
            .ok_or_else(|| AppError::NotFound(format!("country {}", code)))?;
        let head = decode_row(&row, &COUNTRY_COLUMNS)?;

        let records = sqlx::query(self.records.get(names::country_record::GET_ALL_BY_COUNTRY)?)
            .bind(code)
            .fetch_all(&mut *conn)
            .await
            .map_err(driver("Failed to query country records"))?
            .iter()
            .map(|row| decode_row(row, &RECORD_COLUMNS))
            .collect::<Result<Vec<_>>>()?;

        let mut values = head.values().to_vec();
        values.push(Value::List(records));
        Country::from_tuple(&Tuple::from(values))
    }

    async fn write(&self, conn: &mut PgConnection, country: &Country) -> Result<()> {
        let tuple = country.to_tuple();
        let query = sqlx::query(self.country.get(names::country::INSERT_WITH_UPDATE)?);
        bind_values(query, &tuple.values()[..2])?
            .execute(&mut *conn)
            .await
            .map_err(driver("Failed to upsert country"))?;

        let code = Value::Text(Some(country.code().to_string()));
        for record in tuple.list(2)? {
            let query = sqlx::query(self.records.get(names::country_record::INSERT)?);
            let query = bind_values(query, std::slice::from_ref(&code))?;
            bind_values(query, record.values())?
                .execute(&mut *conn)
                .await
                .map_err(driver("Failed to insert country record"))?;
        }
        Ok(())
    }
}

pub struct PgCountryDao {
    handle: PgHandle,
    statements: CountryStatements,
}

impl PgCountryDao {
    pub async fn connect(database_url: &str, store: &StatementStore) -> Result<Self> {
        let statements = CountryStatements::load(store)?;
        Ok(Self {
            handle: PgHandle::connect(database_url).await?,
            statements,
        })
    }

    pub fn with_pool(pool: PgPool, store: &StatementStore) -> Result<Self> {
        Ok(Self {
            handle: PgHandle::from_pool(pool),
            statements: CountryStatements::load(store)?,
        })
    }
}

#[async_trait]
impl CountryDao for PgCountryDao {
    async fn get(&self, code: &str) -> Result<Country> {
        let pool = self.handle.pool()?;
        let code = normalize_code(code)?;
        let mut conn = pool.acquire().await.map_err(driver("Failed to acquire connection"))?;
        self.statements.fetch(&mut conn, &code).await
    }

    async fn insert(&self, country: &Country) -> Result<()> {
        let pool = self.handle.pool()?;
        let mut tx = pool.begin().await.map_err(driver("Failed to begin transaction"))?;
        let outcome = self.statements.write(&mut tx, country).await;
        finish(tx, outcome).await?;
        debug!(code = country.code(), "Country upserted");
        Ok(())
    }

    async fn delete(&self, code: &str) -> Result<()> {
        let pool = self.handle.pool()?;
        let code = normalize_code(code)?;
        let result = sqlx::query(self.statements.country.get(names::country::DELETE)?)
            .bind(&code)
            .execute(pool)
            .await
            .map_err(driver("Failed to delete country"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("country {}", code)));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.handle.close().await
    }
}

pub struct PgCityDao {
    handle: PgHandle,
    city: StatementSet,
    country: CountryStatements,
}

impl PgCityDao {
    pub async fn connect(database_url: &str, store: &StatementStore) -> Result<Self> {
        let (city, country) = (store.load(Resource::City)?, CountryStatements::load(store)?);
        Ok(Self {
            handle: PgHandle::connect(database_url).await?,
            city,
            country,
        })
    }

    pub fn with_pool(pool: PgPool, store: &StatementStore) -> Result<Self> {
        Ok(Self {
            handle: PgHandle::from_pool(pool),
            city: store.load(Resource::City)?,
            country: CountryStatements::load(store)?,
        })
    }

    fn assemble(row: &PgRow, country: &Arc<Country>) -> Result<City> {
        let mut tuple = decode_row(row, &CITY_COLUMNS)?;
        tuple.set(5, Value::Tuple(country.to_tuple()))?;
        let mut city = City::from_tuple(&tuple)?;
        city.set_country(Arc::clone(country));
        Ok(city)
    }
}

#[async_trait]
impl CityDao for PgCityDao {
    async fn get(&self, key: &CityKey) -> Result<City> {
        let pool = self.handle.pool()?;
        let mut conn = pool.acquire().await.map_err(driver("Failed to acquire connection"))?;
        let query = match key {
            CityKey::Id(id) => sqlx::query(self.city.get(names::city::GET_BY_ID)?).bind(*id),
            CityKey::Name(name) => {
                sqlx::query(self.city.get(names::city::GET_BY_NAME)?).bind(name.clone())
            },
        };
        let row = query
            .fetch_optional(&mut *conn)
            .await
            .map_err(driver("Failed to query city"))?
            .ok_or_else(|| AppError::NotFound(key.to_string()))?;

        let code: String = row.try_get(5)?;
        let country = Arc::new(self.country.fetch(&mut conn, &code).await?);
        Self::assemble(&row, &country)
    }

    async fn get_all(&self, country_code: &str) -> Result<Vec<City>> {
        let pool = self.handle.pool()?;
        let code = normalize_code(country_code)?;
        let mut conn = pool.acquire().await.map_err(driver("Failed to acquire connection"))?;
        let rows = sqlx::query(self.city.get(names::city::GET_ALL_BY_COUNTRY)?)
            .bind(&code)
            .fetch_all(&mut *conn)
            .await
            .map_err(driver("Failed to query cities"))?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        // Every row shares the same parent.
        let country = Arc::new(self.country.fetch(&mut conn, &code).await?);
        rows.iter().map(|row| Self::assemble(row, &country)).collect()
    }

    async fn insert(&self, city: &City) -> Result<()> {
        let pool = self.handle.pool()?;
        let mut tx = pool.begin().await.map_err(driver("Failed to begin transaction"))?;
        let outcome = async {
            self.country.write(&mut tx, city.country()).await?;
            let mut tuple = city.to_tuple();
            tuple.set(5, Value::Text(Some(city.country().code().to_string())))?;
            bind_values(
                sqlx::query(self.city.get(names::city::INSERT_WITH_UPDATE)?),
                tuple.values(),
            )?
            .execute(&mut *tx)
            .await
            .map_err(driver("Failed to upsert city"))?;
            Ok::<_, AppError>(())
        }
        .await;
        finish(tx, outcome).await?;
        debug!(city_id = city.id(), name = city.name(), "City upserted");
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let pool = self.handle.pool()?;
        let result = sqlx::query(self.city.get(names::city::DELETE)?)
            .bind(id)
            .execute(pool)
            .await
            .map_err(driver("Failed to delete city"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(CityKey::Id(id).to_string()));
        }
        Ok(())
    }

    async fn delete_all(&self, country_code: &str) -> Result<()> {
        let pool = self.handle.pool()?;
        let code = normalize_code(country_code)?;
        let result = sqlx::query(self.city.get(names::city::DELETE_ALL_BY_COUNTRY)?)
            .bind(&code)
            .execute(pool)
            .await
            .map_err(driver("Failed to delete cities"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("cities of country {}", code)));
        }
        info!(country = %code, deleted = result.rows_affected(), "Cities deleted");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.handle.close().await
    }
}

pub struct PgGeneralWeatherDao {
    handle: PgHandle,
    statements: StatementSet,
}

impl PgGeneralWeatherDao {
    pub async fn connect(database_url: &str, store: &StatementStore) -> Result<Self> {
        let statements = store.load(Resource::GeneralWeather)?;
        Ok(Self {
            handle: PgHandle::connect(database_url).await?,
            statements,
        })
    }

    pub fn with_pool(pool: PgPool, store: &StatementStore) -> Result<Self> {
        Ok(Self {
            handle: PgHandle::from_pool(pool),
            statements: store.load(Resource::GeneralWeather)?,
        })
    }
}

#[async_trait]
impl GeneralWeatherDao for PgGeneralWeatherDao {
    async fn get(&self, status_id: &str) -> Result<GeneralWeather> {
        let pool = self.handle.pool()?;
        let row = sqlx::query(self.statements.get(names::general_weather::GET_BY_STATUS)?)
            .bind(status_id)
            .fetch_optional(pool)
            .await
            .map_err(driver("Failed to query general weather"))?
            .ok_or_else(|| AppError::NotFound(format!("general weather '{}'", status_id)))?;
        GeneralWeather::from_tuple(&decode_row(&row, &GENERAL_WEATHER_COLUMNS)?)
    }

    async fn get_all(&self) -> Result<Vec<GeneralWeather>> {
        let pool = self.handle.pool()?;
        sqlx::query(self.statements.get(names::general_weather::GET_ALL_STATUS)?)
            .fetch_all(pool)
            .await
            .map_err(driver("Failed to query general weathers"))?
            .iter()
            .map(|row| GeneralWeather::from_tuple(&decode_row(row, &GENERAL_WEATHER_COLUMNS)?))
            .collect()
    }

    async fn insert(&self, general_weather: &GeneralWeather) -> Result<()> {
        let pool = self.handle.pool()?;
        let query = sqlx::query(self.statements.get(names::general_weather::INSERT_WITH_UPDATE)?);
        bind_values(query, general_weather.to_tuple().values())?
            .execute(pool)
            .await
            .map_err(driver("Failed to upsert general weather"))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.handle.close().await
    }
}

pub struct PgWeatherStatusDao {
    handle: PgHandle,
    status: StatementSet,
    conditions: StatementSet,
    general: StatementSet,
}

impl PgWeatherStatusDao {
    pub async fn connect(database_url: &str, store: &StatementStore) -> Result<Self> {
        Self::build(PgHandle::connect(database_url).await?, store)
    }

    pub fn with_pool(pool: PgPool, store: &StatementStore) -> Result<Self> {
        Self::build(PgHandle::from_pool(pool), store)
    }

    fn build(handle: PgHandle, store: &StatementStore) -> Result<Self> {
        Ok(Self {
            handle,
            status: store.load(Resource::WeatherStatus)?,
            conditions: store.load(Resource::WeatherCondition)?,
            general: store.load(Resource::GeneralWeather)?,
        })
    }

    async fn assemble(&self, conn: &mut PgConnection, row: &PgRow) -> Result<WeatherStatus> {
        let head = decode_row(row, &STATUS_COLUMNS)?;
        let city_id = head.required_int(0, "city_id")?;
        let collect_time = head.required_timestamp(1, "collect_time")?;

        let conditions = sqlx::query(
            self.conditions
                .get(names::weather_condition::GET_ALL_BY_CITY_AND_TIME)?,
        )
        .bind(city_id)
        .bind(collect_time)
        .fetch_all(&mut *conn)
        .await
        .map_err(driver("Failed to query weather conditions"))?
        .iter()
        .map(|row| decode_row(row, &GENERAL_WEATHER_COLUMNS))
        .collect::<Result<Vec<_>>>()?;

        let mut values = head.values().to_vec();
        values.push(Value::List(conditions));
        WeatherStatus::from_tuple(&Tuple::from(values))
    }

    async fn write(&self, conn: &mut PgConnection, status: &WeatherStatus) -> Result<()> {
        let tuple = status.to_tuple();
        let key = &tuple.values()[..2];

        let query = sqlx::query(self.status.get(names::weather_status::INSERT_WITH_UPDATE)?);
        bind_values(query, &tuple.values()[..18])?
            .execute(&mut *conn)
            .await
            .map_err(driver("Failed to upsert weather status"))?;

        let query = sqlx::query(self.conditions.get(names::weather_condition::DELETE)?);
        bind_values(query, key)?
            .execute(&mut *conn)
            .await
            .map_err(driver("Failed to clear weather conditions"))?;

        for (position, condition) in tuple.list(18)?.iter().enumerate() {
            let query = sqlx::query(self.general.get(names::general_weather::REGISTER)?);
            bind_values(query, condition.values())?
                .execute(&mut *conn)
                .await
                .map_err(driver("Failed to register general weather"))?;

            let query = sqlx::query(self.conditions.get(names::weather_condition::INSERT)?);
            let values = [
                key[0].clone(),
                key[1].clone(),
                condition.values()[0].clone(),
                Value::Int(Some(position as i64)),
            ];
            bind_values(query, &values)?
                .execute(&mut *conn)
                .await
                .map_err(driver("Failed to insert weather condition"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl WeatherStatusDao for PgWeatherStatusDao {
    async fn get(&self, city_id: i64, collect_time: DateTime<Utc>) -> Result<WeatherStatus> {
        let pool = self.handle.pool()?;
        let mut conn = pool.acquire().await.map_err(driver("Failed to acquire connection"))?;
        let row = sqlx::query(self.status.get(names::weather_status::GET_BY_CITY_AND_TIME)?)
            .bind(city_id)
            .bind(collect_time)
            .fetch_optional(&mut *conn)
            .await
            .map_err(driver("Failed to query weather status"))?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "weather status of city {} at {}",
                    city_id, collect_time
                ))
            })?;
        self.assemble(&mut conn, &row).await
    }

    async fn get_all(&self, city_id: i64) -> Result<Vec<WeatherStatus>> {
        let pool = self.handle.pool()?;
        let mut conn = pool.acquire().await.map_err(driver("Failed to acquire connection"))?;
        let rows = sqlx::query(self.status.get(names::weather_status::GET_ALL_BY_CITY)?)
            .bind(city_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(driver("Failed to query weather history"))?;

        let mut statuses = Vec::with_capacity(rows.len());
        for row in &rows {
            statuses.push(self.assemble(&mut conn, row).await?);
        }
        Ok(statuses)
    }

    async fn insert(&self, status: &WeatherStatus) -> Result<()> {
        let pool = self.handle.pool()?;
        let mut tx = pool.begin().await.map_err(driver("Failed to begin transaction"))?;
        let outcome = self.write(&mut tx, status).await;
        finish(tx, outcome).await?;
        debug!(
            city_id = status.city_id(),
            collect_time = %status.collect_time(),
            "Weather status upserted"
        );
        Ok(())
    }

    async fn delete(&self, city_id: i64, collect_time: DateTime<Utc>) -> Result<()> {
        let pool = self.handle.pool()?;
        let result = sqlx::query(self.status.get(names::weather_status::DELETE)?)
            .bind(city_id)
            .bind(collect_time)
            .execute(pool)
            .await
            .map_err(driver("Failed to delete weather status"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "weather status of city {} at {}",
                city_id, collect_time
            )));
        }
        Ok(())
    }

    async fn delete_all(&self, city_id: i64) -> Result<()> {
        let pool = self.handle.pool()?;
        let result = sqlx::query(self.status.get(names::weather_status::DELETE_ALL_BY_CITY)?)
            .bind(city_id)
            .execute(pool)
            .await
            .map_err(driver("Failed to delete weather history"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("weather history of city {}", city_id)));
        }
        info!(city_id, deleted = result.rows_affected(), "Weather history cleared");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.handle.close().await
    }
}
