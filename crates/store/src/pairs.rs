use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use common::{ExchangeType, PairStatus, Result, TradingPair, TradingPairStore};

use crate::{from_db_time, to_db_time, SqliteStore};

#[async_trait]
impl TradingPairStore for SqliteStore {
    async fn find_by_exchange(&self, exchange: ExchangeType) -> Result<Vec<TradingPair>> {
        let rows = sqlx::query(
            r#"
            SELECT exchange, symbol, base_currency, quote_currency, status, instrument_type, listing_date
            FROM trading_pairs WHERE exchange = ?1 ORDER BY symbol
            "#,
        )
        .bind(exchange)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(pair_from_row).collect()
    }

    async fn replace_all(&self, pairs: &[TradingPair]) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let exchanges: BTreeSet<ExchangeType> = pairs.iter().map(|p| p.exchange).collect();

        let mut tx = self.pool.begin().await?;
        for &exchange in &exchanges {
            let removed = sqlx::query("DELETE FROM trading_pairs WHERE exchange = ?1")
                .bind(exchange)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            debug!(%exchange, removed, "Cleared trading pairs");
        }
        for pair in pairs {
            sqlx::query(
                r#"
                INSERT INTO trading_pairs
                    (exchange, symbol, base_currency, quote_currency, status, instrument_type, listing_date)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(exchange, symbol) DO NOTHING
                "#,
            )
            .bind(pair.exchange)
            .bind(&pair.symbol)
            .bind(&pair.base_currency)
            .bind(&pair.quote_currency)
            .bind(pair.status)
            .bind(&pair.instrument_type)
            .bind(pair.listing_date.map(to_db_time))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn pair_from_row(row: &SqliteRow) -> Result<TradingPair> {
    let listing_date: Option<String> = row.try_get("listing_date")?;
    let status: PairStatus = row.try_get("status")?;
    Ok(TradingPair {
        symbol: row.try_get("symbol")?,
        base_currency: row.try_get("base_currency")?,
        quote_currency: row.try_get("quote_currency")?,
        exchange: row.try_get("exchange")?,
        status,
        instrument_type: row.try_get("instrument_type")?,
        listing_date: listing_date.as_deref().map(from_db_time).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn pair(exchange: ExchangeType, symbol: &str) -> TradingPair {
        let (base, quote) = symbol.split_once('-').unwrap_or((symbol, "USDT"));
        TradingPair {
            symbol: symbol.into(),
            base_currency: base.into(),
            quote_currency: quote.into(),
            exchange,
            status: PairStatus::Active,
            instrument_type: "SPOT".into(),
            listing_date: None,
        }
    }

    #[tokio::test]
    async fn replace_is_scoped_to_exchanges_present() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .replace_all(&[
                pair(ExchangeType::Okx, "BTC-USDT"),
                pair(ExchangeType::Okx, "ETH-USDT"),
                pair(ExchangeType::Binance, "BTCUSDT"),
            ])
            .await
            .unwrap();

        store.replace_all(&[pair(ExchangeType::Okx, "SOL-USDT")]).await.unwrap();

        let okx = store.find_by_exchange(ExchangeType::Okx).await.unwrap();
        assert_eq!(okx.len(), 1);
        assert_eq!(okx[0].symbol, "SOL-USDT");
        let binance = store.find_by_exchange(ExchangeType::Binance).await.unwrap();
        assert_eq!(binance.len(), 1);
    }

    #[tokio::test]
    async fn empty_replace_keeps_catalog() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.replace_all(&[pair(ExchangeType::Bybit, "BTCUSDT")]).await.unwrap();
        store.replace_all(&[]).await.unwrap();
        assert_eq!(store.find_by_exchange(ExchangeType::Bybit).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_date_and_status_survive() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut listed = pair(ExchangeType::GateIo, "APT_USDT");
        listed.status = PairStatus::Inactive;
        listed.listing_date = Some(Utc.with_ymd_and_hms(2022, 10, 19, 0, 0, 0).unwrap());
        store.replace_all(&[listed.clone()]).await.unwrap();
        assert_eq!(store.find_by_exchange(ExchangeType::GateIo).await.unwrap(), vec![listed]);
    }
}
