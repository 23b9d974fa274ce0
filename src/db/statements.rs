//! Named SQL statement resources for the relational backend.
//!
//! A resource is a `.sql` file in which every statement is introduced by a
//! header comment naming it:
//!
//! ```sql
//! -- GET BY CODE
//! SELECT code, name FROM country
//! WHERE code = $1
//! ```
//!
//! The lines following a header, up to the next header, are joined with single
//! spaces into the statement text. Blank lines are dropped, and text before the
//! first header is ignored. A later header with the same name overrides the
//! earlier statement.

use crate::error::{AppError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Statement resources shipped in the `sql/` directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Schema,
    Country,
    CountryRecord,
    City,
    GeneralWeather,
    WeatherStatus,
    WeatherCondition,
}

impl Resource {
    pub fn file_name(self) -> &'static str {
        match self {
            Resource::Schema => "schema.sql",
            Resource::Country => "country.sql",
            Resource::CountryRecord => "country_record.sql",
            Resource::City => "city.sql",
            Resource::GeneralWeather => "general_weather.sql",
            Resource::WeatherStatus => "weather_status.sql",
            Resource::WeatherCondition => "weather_condition.sql",
        }
    }
}

/// Statement names, grouped by resource.
pub mod names {
    pub mod schema {
        pub const CHECK_INITIALIZED: &str = "CHECK INITIALIZED";
    }

    pub mod country {
        pub const GET_BY_CODE: &str = "GET BY CODE";
        pub const INSERT_WITH_UPDATE: &str = "INSERT WITH UPDATE";
        pub const DELETE: &str = "DELETE";
    }

    pub mod country_record {
        pub const GET_ALL_BY_COUNTRY: &str = "GET ALL BY COUNTRY WITH DATE ORDER";
        pub const INSERT: &str = "INSERT";
    }

    pub mod city {
        pub const GET_BY_ID: &str = "GET BY ID";
        pub const GET_BY_NAME: &str = "GET BY NAME";
        pub const GET_ALL_BY_COUNTRY: &str = "GET ALL BY COUNTRY";
        pub const INSERT_WITH_UPDATE: &str = "INSERT WITH UPDATE";
        pub const DELETE: &str = "DELETE";
        pub const DELETE_ALL_BY_COUNTRY: &str = "DELETE ALL BY COUNTRY";
    }

    pub mod general_weather {
        pub const GET_BY_STATUS: &str = "GET BY STATUS";
        pub const GET_ALL_STATUS: &str = "GET ALL STATUS";
        pub const INSERT_WITH_UPDATE: &str = "INSERT WITH UPDATE";
        pub const REGISTER: &str = "REGISTER";
    }

    pub mod weather_status {
        pub const GET_BY_CITY_AND_TIME: &str = "GET BY CITY AND TIME";
        pub const GET_ALL_BY_CITY: &str = "GET ALL BY CITY";
        pub const INSERT_WITH_UPDATE: &str = "INSERT WITH UPDATE";
        pub const DELETE: &str = "DELETE";
        pub const DELETE_ALL_BY_CITY: &str = "DELETE ALL BY CITY";
    }

    pub mod weather_condition {
        pub const GET_ALL_BY_CITY_AND_TIME: &str = "GET ALL BY CITY AND TIME";
        pub const INSERT: &str = "INSERT";
        pub const DELETE: &str = "DELETE";
    }
}

/// The statements of one loaded resource, in file order.
#[derive(Debug, Clone, Default)]
pub struct StatementSet {
    resource: String,
    statements: Vec<(String, String)>,
}

impl StatementSet {
    /// Reads and parses the resource file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ResourceUnavailable` if the file cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| AppError::ResourceUnavailable {
            resource: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let set = Self::parse(&path.display().to_string(), &text);
        debug!(
            resource = %set.resource,
            statements = set.statements.len(),
            "Loaded statement resource"
        );
        Ok(set)
    }

    pub fn parse(resource: &str, text: &str) -> Self {
        let mut set = Self {
            resource: resource.to_string(),
            statements: Vec::new(),
        };
        let mut current: Option<String> = None;
        let mut lines: Vec<&str> = Vec::new();

        for line in text.lines().map(str::trim) {
            if let Some(header) = line.strip_prefix("--") {
                if let Some(name) = current.take() {
                    set.register(name, &lines);
                }
                current = Some(header.trim().to_string());
                lines.clear();
            } else if !line.is_empty() {
                lines.push(line);
            }
        }
        if let Some(name) = current {
            set.register(name, &lines);
        }
        set
    }

    fn register(&mut self, name: String, lines: &[&str]) {
        if lines.is_empty() {
            return;
        }
        let text = lines.join(" ");
        match self.statements.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = text,
            None => self.statements.push((name, text)),
        }
    }

    /// Replaces the whole set with the content of `path`. On failure the current
    /// statements are kept.
    pub fn reload(&mut self, path: &Path) -> Result<()> {
        *self = Self::load(path)?;
        Ok(())
    }

    /// Statement text registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnsupportedOperation` if the resource has no such statement.
    pub fn get(&self, name: &str) -> Result<&str> {
        self.statements
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, text)| text.as_str())
            .ok_or_else(|| {
                AppError::UnsupportedOperation(format!(
                    "statement '{}' is not defined in {}",
                    name, self.resource
                ))
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.statements.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Resolves [`Resource`]s against a statement directory.
#[derive(Debug, Clone)]
pub struct StatementStore {
    dir: PathBuf,
}

impl StatementStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load(&self, resource: Resource) -> Result<StatementSet> {
        StatementSet::load(&self.dir.join(resource.file_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    const CITY_SQL: &str = "\
This preamble is ignored.

-- GET BY ID
SELECT id, name
FROM city
WHERE id = $1

-- EMPTY
-- DELETE
DELETE FROM city WHERE id = $1
";

    #[test]
    fn test_parse_joins_lines_in_order() {
        let set = StatementSet::parse("city.sql", CITY_SQL);
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["GET BY ID", "DELETE"]);
        assert_eq!(
            set.get("GET BY ID").unwrap(),
            "SELECT id, name FROM city WHERE id = $1"
        );
        assert_eq!(set.get("DELETE").unwrap(), "DELETE FROM city WHERE id = $1");
    }

    #[test]
    fn test_unknown_name_is_unsupported() {
        let set = StatementSet::parse("city.sql", CITY_SQL);
        assert!(matches!(
            set.get("EMPTY"),
            Err(AppError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            set.get("GET BY NAME"),
            Err(AppError::UnsupportedOperation(msg)) if msg.contains("city.sql")
        ));
    }

    #[test]
    fn test_duplicate_header_overrides() {
        let set = StatementSet::parse("x", "-- A\nSELECT 1\n-- A\nSELECT 2\n");
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("A").unwrap(), "SELECT 2");
    }

    #[test]
    fn test_missing_resource_is_unavailable() {
        let dir = tempdir().unwrap();
        let store = StatementStore::new(dir.path());
        assert!(matches!(
            store.load(Resource::City),
            Err(AppError::ResourceUnavailable { .. })
        ));
    }

    #[test]
    fn test_reload_replaces_everything() {
        let mut first = NamedTempFile::new().unwrap();
        write!(first, "{}", CITY_SQL).unwrap();
        let mut second = NamedTempFile::new().unwrap();
        write!(second, "-- GET BY NAME\nSELECT id FROM city WHERE name = $1\n").unwrap();

        let mut set = StatementSet::load(first.path()).unwrap();
        assert!(set.get("GET BY ID").is_ok());

        set.reload(second.path()).unwrap();
        assert!(set.get("GET BY ID").is_err());
        assert!(set.get("GET BY NAME").is_ok());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_shipped_resources_define_every_name() {
        let store = StatementStore::new(concat!(env!("CARGO_MANIFEST_DIR"), "/sql"));
        let expected: &[(Resource, &[&str])] = &[
            (
                Resource::Country,
                &[
                    names::country::GET_BY_CODE,
                    names::country::INSERT_WITH_UPDATE,
                    names::country::DELETE,
                ],
            ),
            (
                Resource::CountryRecord,
                &[
                    names::country_record::GET_ALL_BY_COUNTRY,
                    names::country_record::INSERT,
                ],
            ),
            (
                Resource::City,
                &[
                    names::city::GET_BY_ID,
                    names::city::GET_BY_NAME,
                    names::city::GET_ALL_BY_COUNTRY,
                    names::city::INSERT_WITH_UPDATE,
                    names::city::DELETE,
                    names::city::DELETE_ALL_BY_COUNTRY,
                ],
            ),
            (
                Resource::GeneralWeather,
                &[
                    names::general_weather::GET_BY_STATUS,
                    names::general_weather::GET_ALL_STATUS,
                    names::general_weather::INSERT_WITH_UPDATE,
                    names::general_weather::REGISTER,
                ],
            ),
            (
                Resource::WeatherStatus,
                &[
                    names::weather_status::GET_BY_CITY_AND_TIME,
                    names::weather_status::GET_ALL_BY_CITY,
                    names::weather_status::INSERT_WITH_UPDATE,
                    names::weather_status::DELETE,
                    names::weather_status::DELETE_ALL_BY_CITY,
                ],
            ),
            (
                Resource::WeatherCondition,
                &[
                    names::weather_condition::GET_ALL_BY_CITY_AND_TIME,
                    names::weather_condition::INSERT,
                    names::weather_condition::DELETE,
                ],
            ),
        ];
        for (resource, names) in expected {
            let set = store.load(*resource).unwrap();
            for name in *names {
                assert!(set.get(name).is_ok(), "{:?} lacks '{}'", resource, name);
            }
        }
        let schema = store.load(Resource::Schema).unwrap();
        assert!(schema.get(names::schema::CHECK_INITIALIZED).is_ok());
        assert!(schema.len() > 1);
    }
}
