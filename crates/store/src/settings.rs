use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use common::{CryptoMode, Error, ExchangeType, Proxy, ProxyKind, Result, Settings, SettingsStore};

use crate::{to_db_time, SqliteStore};

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn load(&self) -> Result<Option<Settings>> {
        let Some(row) = sqlx::query(
            "SELECT crypto_mode, fetch_frequency, exchanges, crypto_symbols FROM settings WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let crypto_mode: CryptoMode = row.try_get("crypto_mode")?;
        let fetch_frequency: i64 = row.try_get("fetch_frequency")?;
        let exchanges: Vec<ExchangeType> = serde_json::from_str(row.try_get("exchanges")?)?;
        let crypto_symbols: Vec<String> = serde_json::from_str(row.try_get("crypto_symbols")?)?;

        let proxy_rows = sqlx::query("SELECT ip, port, kind, username, password FROM settings_proxy ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut proxies = Vec::with_capacity(proxy_rows.len());
        for row in proxy_rows {
            let port: i64 = row.try_get("port")?;
            let kind: ProxyKind = row.try_get("kind")?;
            proxies.push(Proxy {
                ip: row.try_get("ip")?,
                port: u16::try_from(port).map_err(|_| Error::Parse(format!("proxy port {port} out of range")))?,
                kind,
                username: row.try_get("username")?,
                password: row.try_get("password")?,
            });
        }

        Ok(Some(Settings {
            crypto_mode,
            fetch_frequency: u32::try_from(fetch_frequency).unwrap_or(0),
            exchanges,
            crypto_symbols,
            proxies,
        }))
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        let exchanges = serde_json::to_string(&settings.exchanges)?;
        let symbols = serde_json::to_string(&settings.crypto_symbols)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO settings (id, crypto_mode, fetch_frequency, exchanges, crypto_symbols, updated_at)
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                crypto_mode = excluded.crypto_mode,
                fetch_frequency = excluded.fetch_frequency,
                exchanges = excluded.exchanges,
                crypto_symbols = excluded.crypto_symbols,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(settings.crypto_mode)
        .bind(i64::from(settings.fetch_frequency))
        .bind(exchanges)
        .bind(symbols)
        .bind(to_db_time(Utc::now()))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM settings_proxy").execute(&mut *tx).await?;
        for proxy in &settings.proxies {
            sqlx::query("INSERT INTO settings_proxy (ip, port, kind, username, password) VALUES (?1, ?2, ?3, ?4, ?5)")
                .bind(&proxy.ip)
                .bind(i64::from(proxy.port))
                .bind(proxy.kind)
                .bind(&proxy.username)
                .bind(&proxy.password)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_database_has_no_settings() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_replaces_proxies_wholesale() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut settings = Settings {
            crypto_mode: CryptoMode::All,
            fetch_frequency: 30,
            exchanges: vec![ExchangeType::Okx, ExchangeType::Bybit],
            crypto_symbols: vec!["BTC".into()],
            proxies: vec![
                Proxy::new("10.0.0.1", 1080, ProxyKind::Socks5),
                Proxy::new("10.0.0.2", 8080, ProxyKind::Http),
            ],
        };
        settings.proxies[0].username = Some("user".into());
        settings.proxies[0].password = Some("secret".into());
        store.save(&settings).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap(), settings);

        settings.fetch_frequency = 5;
        settings.proxies = vec![Proxy::new("10.0.0.3", 3128, ProxyKind::Https)];
        store.save(&settings).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.fetch_frequency, 5);
        assert_eq!(loaded.proxies, settings.proxies);
    }
}
