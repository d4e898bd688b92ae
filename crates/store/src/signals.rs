use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use common::{Result, SignalKind, SignalPage, SignalQuery, SignalStore, TradeSignal};

use crate::{from_db_time, to_db_time, SqliteStore};

const SIGNAL_COLUMNS: &str = "id, symbol, exchange, strategy, signal, price, buy_price, take_profit, \
     stop_loss, profit_loss_ratio, signal_time, expiration, remark";

#[async_trait]
impl SignalStore for SqliteStore {
    async fn save_all(&self, signals: &[TradeSignal]) -> Result<()> {
        if signals.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for s in signals {
            sqlx::query(
                r#"
                INSERT INTO trade_signals
                    (id, symbol, exchange, strategy, signal, price, buy_price, take_profit,
                     stop_loss, profit_loss_ratio, signal_time, expiration, remark)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )
            .bind(&s.id)
            .bind(&s.symbol)
            .bind(s.exchange)
            .bind(&s.strategy)
            .bind(s.signal)
            .bind(s.price)
            .bind(s.buy_price)
            .bind(s.take_profit)
            .bind(s.stop_loss)
            .bind(s.profit_loss_ratio)
            .bind(to_db_time(s.signal_time))
            .bind(&s.expiration)
            .bind(&s.remark)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM trade_signals WHERE signal_time < ?1")
            .bind(to_db_time(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn query(&self, query: &SignalQuery) -> Result<SignalPage> {
        let size = query.page_size();

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM trade_signals");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {SIGNAL_COLUMNS} FROM trade_signals"));
        push_filters(&mut select, query);
        select
            .push(" ORDER BY signal_time DESC, id LIMIT ")
            .push_bind(i64::from(size))
            .push(" OFFSET ")
            .push_bind(i64::from(query.page) * i64::from(size));
        let rows = select.build().fetch_all(&self.pool).await?;

        Ok(SignalPage {
            items: rows.iter().map(signal_from_row).collect::<Result<_>>()?,
            total: u64::try_from(total).unwrap_or(0),
            page: query.page,
            size,
        })
    }

    async fn count_by_kind(&self) -> Result<Vec<(SignalKind, u64)>> {
        let rows = sqlx::query("SELECT signal, COUNT(*) AS n FROM trade_signals GROUP BY signal ORDER BY signal")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let kind: SignalKind = row.try_get("signal")?;
                let n: i64 = row.try_get("n")?;
                Ok((kind, u64::try_from(n).unwrap_or(0)))
            })
            .collect()
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, query: &SignalQuery) {
    let mut any = false;

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        push_clause(qb, &mut any);
        qb.push("(symbol LIKE ")
            .push_bind(pattern.clone())
            .push(" OR strategy LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(exchange) = query.exchange {
        push_clause(qb, &mut any);
        qb.push("exchange = ").push_bind(exchange);
    }
    if let Some(signal) = query.signal {
        push_clause(qb, &mut any);
        qb.push("signal = ").push_bind(signal);
    }
    if let Some(strategy) = &query.strategy {
        push_clause(qb, &mut any);
        qb.push("strategy = ").push_bind(strategy.clone());
    }
    if let Some(from) = query.from {
        push_clause(qb, &mut any);
        qb.push("signal_time >= ").push_bind(to_db_time(from));
    }
    if let Some(to) = query.to {
        push_clause(qb, &mut any);
        qb.push("signal_time <= ").push_bind(to_db_time(to));
    }
}

fn push_clause(qb: &mut QueryBuilder<'_, Sqlite>, any: &mut bool) {
    qb.push(if *any { " AND " } else { " WHERE " });
    *any = true;
}

fn signal_from_row(row: &SqliteRow) -> Result<TradeSignal> {
    let signal_time: String = row.try_get("signal_time")?;
    Ok(TradeSignal {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        exchange: row.try_get("exchange")?,
        strategy: row.try_get("strategy")?,
        signal: row.try_get("signal")?,
        price: row.try_get("price")?,
        buy_price: row.try_get("buy_price")?,
        take_profit: row.try_get("take_profit")?,
        stop_loss: row.try_get("stop_loss")?,
        profit_loss_ratio: row.try_get("profit_loss_ratio")?,
        signal_time: from_db_time(&signal_time)?,
        expiration: row.try_get("expiration")?,
        remark: row.try_get("remark")?,
    })
}
