//! Interactive prompts used by the menu to fill in command arguments.

use super::commands::{
    parse_time, AddCityArgs, CityArgs, CityIdArgs, CountriesArgs, CountryArgs, ScheduleArgs,
    ScheduleMode,
};
use crate::error::{AppError, Result};
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};

pub fn prompt_country(default: &str) -> Result<CountryArgs> {
    let country: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Country code (ISO 3166-1)")
        .default(default.to_string())
        .interact_text()?;
    Ok(CountryArgs {
        country: Some(country.trim().to_string()),
    })
}

pub fn prompt_countries(default: &str) -> Result<CountriesArgs> {
    let input: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Country codes (comma separated)")
        .default(default.to_string())
        .interact_text()?;
    let countries: Vec<String> = input
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect();
    if countries.is_empty() {
        return Err(AppError::Cli("at least one country code is required".to_string()));
    }
    Ok(CountriesArgs { countries })
}

pub fn prompt_city_id() -> Result<CityIdArgs> {
    let city_id: i64 = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("City id")
        .interact_text()?;
    Ok(CityIdArgs { city_id })
}

pub fn prompt_city() -> Result<CityArgs> {
    let theme = ColorfulTheme::default();
    let by = Select::with_theme(&theme)
        .with_prompt("Look up city by")
        .items(&["Id", "Name"])
        .default(0)
        .interact()?;
    let (id, name) = if by == 0 {
        let id: i64 = Input::with_theme(&theme).with_prompt("City id").interact_text()?;
        (Some(id), None)
    } else {
        let name: String = Input::with_theme(&theme).with_prompt("City name").interact_text()?;
        (None, Some(name))
    };
    let resolve = Confirm::with_theme(&theme)
        .with_prompt("Geocode missing coordinates?")
        .default(false)
        .interact()?;
    Ok(CityArgs { id, name, resolve })
}

pub fn prompt_new_city(default_country: &str) -> Result<AddCityArgs> {
    let theme = ColorfulTheme::default();
    let id: i64 = Input::with_theme(&theme).with_prompt("City id").interact_text()?;
    let name: String = Input::with_theme(&theme).with_prompt("City name").interact_text()?;
    let country: String = Input::with_theme(&theme)
        .with_prompt("Country code")
        .default(default_country.to_string())
        .interact_text()?;
    let time_zone: i64 = Input::with_theme(&theme)
        .with_prompt("UTC offset (hours)")
        .default(0)
        .interact_text()?;
    Ok(AddCityArgs {
        id,
        name,
        country,
        time_zone,
        lon: None,
        lat: None,
    })
}

pub fn prompt_schedule() -> Result<ScheduleArgs> {
    let theme = ColorfulTheme::default();
    let modes = [ScheduleMode::Hourly, ScheduleMode::Minutely, ScheduleMode::Daily];
    let selection = Select::with_theme(&theme)
        .with_prompt("Schedule")
        .items(&["Hourly", "Every n minutes", "Daily at fixed times"])
        .default(0)
        .interact()?;
    let mode = modes[selection];

    let mut at = Vec::new();
    let mut every = 10;
    match mode {
        ScheduleMode::Daily => {
            let input: String = Input::with_theme(&theme)
                .with_prompt("Collect times (HH:MM, comma separated)")
                .interact_text()?;
            for part in input.split(',').filter(|p| !p.trim().is_empty()) {
                at.push(parse_time(part).map_err(AppError::Cli)?);
            }
        },
        ScheduleMode::Minutely => {
            every = Input::with_theme(&theme)
                .with_prompt("Every how many minutes (1-59)")
                .default(10u32)
                .interact_text()?;
        },
        ScheduleMode::Hourly => {},
    }

    let limit: String = Input::with_theme(&theme)
        .with_prompt("Run limit (empty for unlimited)")
        .allow_empty(true)
        .interact_text()?;
    let limit = match limit.trim() {
        "" => None,
        value => Some(
            value
                .parse::<u64>()
                .map_err(|e| AppError::Cli(format!("invalid run limit '{}': {}", value, e)))?,
        ),
    };

    Ok(ScheduleArgs {
        mode,
        at,
        every,
        limit,
    })
}
