use std::collections::HashMap;
use std::io::Write;

use assert_matches::assert_matches;
use chrono::NaiveDate;

use in_out_analytics::config::{ConfigLoader, DEFAULT_DATABASE, PeriodFallback};
use in_out_analytics::error::ElError;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
}

#[test]
fn missing_project_is_a_configuration_error() {
    let err = ConfigLoader::resolve_with(env(&[])).unwrap_err();
    assert_matches!(err, ElError::MissingProjectId);
    assert!(err.is_configuration());
}

#[test]
fn blank_project_counts_as_missing() {
    assert_matches!(
        ConfigLoader::resolve_with(env(&[("PROJECT_ID", "   ")])),
        Err(ElError::MissingProjectId)
    );
}

#[test]
fn overrides_are_read_from_environment() {
    let config = ConfigLoader::resolve_with(env(&[
        ("PROJECT_ID", "b-materials"),
        ("BQ_DATASET", "staging"),
        ("BQ_TABLE", "movements_v2"),
    ]))
    .unwrap();
    assert_eq!(config.database, DEFAULT_DATABASE);
    assert_eq!(config.destination.dataset, "staging");
    assert_eq!(config.destination.table, "movements_v2");
}

#[test]
fn invalid_table_name_is_rejected() {
    assert_matches!(
        ConfigLoader::resolve_with(env(&[("PROJECT_ID", "p"), ("BQ_TABLE", "drop table;")])),
        Err(ElError::InvalidConfig(_))
    );
}

#[test]
fn arguments_win_over_environment() {
    let period = ConfigLoader::resolve_period(
        Some(2023),
        Some(4),
        PeriodFallback::CurrentMonth,
        today(),
        env(&[("YEAR", "2020"), ("MONTH", "1")]),
    )
    .unwrap();
    assert_eq!((period.year(), period.month()), (2023, 4));
}

#[test]
fn environment_wins_over_current_date() {
    let period = ConfigLoader::resolve_period(
        None,
        None,
        PeriodFallback::CurrentMonth,
        today(),
        env(&[("YEAR", "2024"), ("MONTH", "11")]),
    )
    .unwrap();
    assert_eq!((period.year(), period.month()), (2024, 11));
}

#[test]
fn non_digit_environment_falls_back_to_today() {
    let period = ConfigLoader::resolve_period(
        None,
        None,
        PeriodFallback::CurrentMonth,
        today(),
        env(&[("YEAR", "last"), ("MONTH", "-3")]),
    )
    .unwrap();
    assert_eq!((period.year(), period.month()), (2025, 8));
}

#[test]
fn overflowing_numeric_year_is_a_configuration_error() {
    let err = ConfigLoader::resolve_period(
        None,
        None,
        PeriodFallback::CurrentMonth,
        today(),
        env(&[("YEAR", "99999999999"), ("MONTH", "3")]),
    )
    .unwrap_err();
    assert_matches!(err, ElError::InvalidConfig(ref message) if message.contains("YEAR"));
    assert!(err.is_configuration());
}

#[test]
fn overflowing_numeric_month_is_a_configuration_error() {
    assert_matches!(
        ConfigLoader::resolve_period(
            Some(2025),
            None,
            PeriodFallback::CurrentMonth,
            today(),
            env(&[("MONTH", "99999999999")]),
        ),
        Err(ElError::InvalidConfig(_))
    );
}

#[test]
fn explicit_year_ignores_broken_environment_year() {
    let period = ConfigLoader::resolve_period(
        Some(2024),
        Some(5),
        PeriodFallback::CurrentMonth,
        today(),
        env(&[("YEAR", "99999999999")]),
    )
    .unwrap();
    assert_eq!((period.year(), period.month()), (2024, 5));
}

#[test]
fn previous_month_fallback_matches_scheduler() {
    let period = ConfigLoader::resolve_period(
        None,
        None,
        PeriodFallback::PreviousMonth,
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        env(&[]),
    )
    .unwrap();
    assert_eq!((period.year(), period.month()), (2025, 12));
}

#[test]
fn out_of_range_month_is_rejected() {
    let err = ConfigLoader::resolve_period(
        None,
        Some(13),
        PeriodFallback::CurrentMonth,
        today(),
        env(&[]),
    )
    .unwrap_err();
    assert_matches!(err, ElError::InvalidPeriod { month: 13, .. });
    assert!(err.is_configuration());
}

#[test]
fn dotenv_file_populates_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".env");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "IN_OUT_EL_TEST_DOTENV=from-file").unwrap();

    ConfigLoader::load_dotenv_from(&path).unwrap();

    assert_eq!(
        std::env::var("IN_OUT_EL_TEST_DOTENV").as_deref(),
        Ok("from-file")
    );
}

#[test]
fn missing_dotenv_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert_matches!(
        ConfigLoader::load_dotenv_from(&dir.path().join("absent.env")),
        Err(ElError::InvalidConfig(_))
    );
}
