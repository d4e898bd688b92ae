//! SQLite persistence for settings, the trading-pair catalog and trade
//! signals.
//!
//! Timestamps are stored as RFC3339 text with millisecond precision in UTC,
//! so lexical order matches chronological order.

mod pairs;
mod settings;
mod signals;

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use common::{Error, Result};

/// One pool, every storage trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and apply migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::migrated(pool).await
    }

    /// Private in-memory database. A single connection that never expires,
    /// since every new SQLite memory connection starts empty.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::migrated(pool).await
    }

    /// Wrap a pool whose schema is managed elsewhere.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn migrated(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;
        info!("Database ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_db_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_db_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Parse(format!("bad timestamp '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn db_time_sorts_lexically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 9, 23, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 10, 1, 0, 0).unwrap();
        assert!(to_db_time(a) < to_db_time(b));
        assert_eq!(to_db_time(a), "2024-01-09T23:00:00.000Z");
        assert_eq!(from_db_time(&to_db_time(b)).unwrap(), b);
    }

    #[tokio::test]
    async fn in_memory_store_is_migrated() {
        let store = SqliteStore::in_memory().await.unwrap();
        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('settings', 'settings_proxy', 'trading_pairs', 'trade_signals')",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(tables, 4);
    }
}
