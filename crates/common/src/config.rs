use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Process configuration loaded from environment variables at startup.
///
/// Runtime settings (exchanges, watchlist, proxies, frequency) live in the
/// database instead; see `Settings`.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Strategy config file path
    pub strategy_config_path: String,

    // Fetching
    pub kline_limit: u32,
    pub fetch_max_attempts: u32,
    pub fetch_base_delay: Duration,
    pub fetch_delay_jitter: Duration,
    pub fetch_timeout: Duration,

    // Scheduling
    pub pool_shutdown_timeout: Duration,
    pub pair_sync_interval: Duration,
    pub run_on_start: bool,
}

impl Config {
    /// Load configuration from environment variables, reading `.env` first
    /// if present. Unset variables fall back to defaults; malformed values
    /// are an error.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Ok(Config {
            database_url: optional_env("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://candlewatch.db?mode=rwc".to_string()),
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
            kline_limit: parse_env("KLINE_LIMIT", 300)?,
            fetch_max_attempts: parse_env("FETCH_MAX_ATTEMPTS", 4)?,
            fetch_base_delay: Duration::from_millis(parse_env("FETCH_BASE_DELAY_MS", 500)?),
            fetch_delay_jitter: Duration::from_millis(parse_env("FETCH_DELAY_JITTER_MS", 1500)?),
            fetch_timeout: Duration::from_secs(parse_env("FETCH_TIMEOUT_SECS", 60)?),
            pool_shutdown_timeout: Duration::from_secs(parse_env("POOL_SHUTDOWN_SECS", 60)?),
            pair_sync_interval: Duration::from_secs(
                parse_env::<u64>("PAIR_SYNC_INTERVAL_HOURS", 72)? * 3600,
            ),
            run_on_start: parse_env("RUN_ON_START", false)?,
        })
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'"))),
        None => Ok(default),
    }
}
