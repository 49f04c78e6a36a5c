use std::path::Path;

use chrono::NaiveDate;
use regex::Regex;

use crate::bigquery::Destination;
use crate::domain::RunPeriod;
use crate::error::ElError;

pub const DEFAULT_DATABASE: &str = "app-in-out-good";
pub const DEFAULT_DATASET: &str = "in_out_bronze";
pub const DEFAULT_TABLE: &str = "landing_movements";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub project_id: String,
    pub database: String,
    pub destination: Destination,
}

/// What the period falls back to when neither arguments nor `YEAR`/`MONTH`
/// provide a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodFallback {
    CurrentMonth,
    PreviousMonth,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `.env` from the working directory if there is one. Variables
    /// already set in the process environment are kept.
    pub fn load_dotenv() -> Result<(), ElError> {
        match dotenvy::dotenv() {
            Ok(path) => {
                tracing::debug!(path = %path.display(), "loaded .env");
                Ok(())
            }
            Err(err) if err.not_found() => Ok(()),
            Err(err) => Err(ElError::InvalidConfig(format!("failed to read .env: {err}"))),
        }
    }

    pub fn load_dotenv_from(path: &Path) -> Result<(), ElError> {
        dotenvy::from_path(path).map_err(|err| {
            ElError::InvalidConfig(format!("failed to read {}: {err}", path.display()))
        })
    }

    pub fn resolve() -> Result<RunConfig, ElError> {
        Self::resolve_with(|key| std::env::var(key).ok())
    }

    pub fn resolve_with<F>(lookup: F) -> Result<RunConfig, ElError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_id = non_blank(lookup("PROJECT_ID")).ok_or(ElError::MissingProjectId)?;
        let database =
            non_blank(lookup("FIRESTORE_DATABASE")).unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        let dataset =
            non_blank(lookup("BQ_DATASET")).unwrap_or_else(|| DEFAULT_DATASET.to_string());
        let table = non_blank(lookup("BQ_TABLE")).unwrap_or_else(|| DEFAULT_TABLE.to_string());

        validate_identifier("BQ_DATASET", &dataset)?;
        validate_identifier("BQ_TABLE", &table)?;

        Ok(RunConfig {
            project_id,
            database,
            destination: Destination { dataset, table },
        })
    }

    /// Resolves year and month independently: argument, then a digits-only
    /// environment override, then `today` (or the month before it).
    pub fn resolve_period<F>(
        year: Option<i32>,
        month: Option<u32>,
        fallback: PeriodFallback,
        today: NaiveDate,
        lookup: F,
    ) -> Result<RunPeriod, ElError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = match fallback {
            PeriodFallback::CurrentMonth => RunPeriod::containing(today)?,
            PeriodFallback::PreviousMonth => RunPeriod::previous_of(today)?,
        };

        let year = match year {
            Some(year) => year,
            None => digits_env(&lookup, "YEAR")?.unwrap_or(default.year()),
        };
        let month = match month {
            Some(month) => month,
            None => digits_env(&lookup, "MONTH")?.unwrap_or(default.month()),
        };

        RunPeriod::new(year, month)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// A digits-only override that does not fit its type is an error, never a
/// silent fallback to the current date.
fn digits_env<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ElError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        if !trimmed.is_empty() {
            tracing::warn!(key, value = trimmed, "ignoring non-numeric override");
        }
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| ElError::InvalidConfig(format!("{key}={trimmed} is out of range")))
}

fn validate_identifier(key: &str, value: &str) -> Result<(), ElError> {
    let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
        .map_err(|err| ElError::InvalidConfig(err.to_string()))?;
    if re.is_match(value) {
        Ok(())
    } else {
        Err(ElError::InvalidConfig(format!("{key}={value} is not a valid identifier")))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_project_is_set() {
        let config = ConfigLoader::resolve_with(env(&[("PROJECT_ID", "b-materials")])).unwrap();
        assert_eq!(config.project_id, "b-materials");
        assert_eq!(config.database, DEFAULT_DATABASE);
        assert_eq!(config.destination.dataset, DEFAULT_DATASET);
        assert_eq!(config.destination.table, DEFAULT_TABLE);
    }

    #[test]
    fn env_year_with_whitespace_is_accepted() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let period = ConfigLoader::resolve_period(
            None,
            None,
            PeriodFallback::CurrentMonth,
            today,
            env(&[("YEAR", " 2024 ")]),
        )
        .unwrap();
        assert_eq!((period.year(), period.month()), (2024, 6));
    }
}
