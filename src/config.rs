//! Run configuration read from `BIDHIST_*` environment variables.

use std::env;
use std::path::PathBuf;

use thiserror::Error;

use crate::grid::CHANGE_HISTORY_RETENTION_DAYS;
use crate::partition::{validate_identifier, DEFAULT_TABLE_PREFIX};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub store_path: PathBuf,
    pub change_history_path: PathBuf,
    pub snapshot_path: Option<PathBuf>,
    pub accounts: Vec<String>,
    pub table_prefix: String,
    pub lookback_days: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("data/bid_budget.sqlite"),
            change_history_path: PathBuf::from("data/change_history.csv"),
            snapshot_path: None,
            accounts: Vec::new(),
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            lookback_days: CHANGE_HISTORY_RETENTION_DAYS,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be an integer in 1..={max}, got '{value}'")]
    InvalidLookbackDays {
        key: &'static str,
        value: String,
        max: u32,
    },
    #[error("{key} must contain only ASCII letters, digits and '_', got '{value}'")]
    InvalidTablePrefix { key: &'static str, value: String },
}

pub fn run_config_from_env() -> Result<RunConfig, ConfigError> {
    let mut config = RunConfig::default();

    if let Some(path) = non_empty_var("BIDHIST_STORE_PATH") {
        config.store_path = PathBuf::from(path);
    }

    if let Some(path) = non_empty_var("BIDHIST_CHANGE_HISTORY_PATH") {
        config.change_history_path = PathBuf::from(path);
    }

    if let Some(path) = non_empty_var("BIDHIST_SNAPSHOT_PATH") {
        config.snapshot_path = Some(PathBuf::from(path));
    }

    if let Some(accounts) = non_empty_var("BIDHIST_ACCOUNTS") {
        config.accounts = parse_accounts(&accounts);
    }

    if let Some(prefix) = non_empty_var("BIDHIST_TABLE_PREFIX") {
        if validate_identifier(&prefix).is_err() {
            return Err(ConfigError::InvalidTablePrefix {
                key: "BIDHIST_TABLE_PREFIX",
                value: prefix,
            });
        }
        config.table_prefix = prefix;
    }

    if let Some(days) = non_empty_var("BIDHIST_LOOKBACK_DAYS") {
        config.lookback_days = parse_lookback_days(&days)?;
    }

    Ok(config)
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_accounts(raw: &str) -> Vec<String> {
    let mut accounts: Vec<String> = raw
        .split(',')
        .map(|part| part.trim().replace('-', ""))
        .filter(|part| !part.is_empty())
        .collect();
    accounts.sort();
    accounts.dedup();
    accounts
}

fn parse_lookback_days(raw: &str) -> Result<u32, ConfigError> {
    match raw.parse::<u32>() {
        Ok(days) if (1..=CHANGE_HISTORY_RETENTION_DAYS).contains(&days) => Ok(days),
        _ => Err(ConfigError::InvalidLookbackDays {
            key: "BIDHIST_LOOKBACK_DAYS",
            value: raw.to_string(),
            max: CHANGE_HISTORY_RETENTION_DAYS,
        }),
    }
}
