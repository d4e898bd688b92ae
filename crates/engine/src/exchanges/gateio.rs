use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use common::{
    Bar, BarSeries, Error, ExchangeClient, ExchangeType, KlineInterval, PairStatus, Result,
    TradingPair,
};

use super::{cell_f64, cell_i64};
use crate::fetcher::ResilientFetcher;

const BASE_URL: &str = "https://api.gateio.ws";

/// Public spot market data from Gate.io. Symbols use `_` (`BTC_USDT`).
pub struct GateIoClient {
    fetcher: ResilientFetcher,
    base_url: String,
}

impl GateIoClient {
    pub fn new(fetcher: ResilientFetcher) -> Self {
        Self::with_base_url(fetcher, BASE_URL)
    }

    pub fn with_base_url(fetcher: ResilientFetcher, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ExchangeClient for GateIoClient {
    fn exchange(&self) -> ExchangeType {
        ExchangeType::GateIo
    }

    async fn klines(&self, symbol: &str, interval: KlineInterval, limit: u32) -> Result<BarSeries> {
        let pair = symbol.replace('-', "_");
        let url = format!(
            "{}/api/v4/spot/candlesticks?currency_pair={pair}&interval={}&limit={limit}",
            self.base_url,
            interval.native(ExchangeType::GateIo)
        );
        debug!(symbol = %pair, %interval, "Fetching Gate.io candlesticks");
        let body = self.fetcher.fetch(&url).await?;
        parse_candlesticks(&body, interval)
    }

    async fn trading_pairs(&self) -> Result<Vec<TradingPair>> {
        let url = format!("{}/api/v4/spot/currency_pairs", self.base_url);
        let body = self.fetcher.fetch(&url).await?;
        parse_currency_pairs(&body)
    }
}

/// Rows are `[ts_seconds, quote_volume, close, high, low, open, base_volume, closed]`,
/// oldest first. Older API revisions omit the base volume column.
pub(crate) fn parse_candlesticks(body: &str, interval: KlineInterval) -> Result<BarSeries> {
    let value: Value = serde_json::from_str(body)?;
    if let Some(err) = envelope_error(&value) {
        return Err(err);
    }
    let rows: Vec<Vec<Value>> = serde_json::from_value(value)?;

    let bars = rows
        .iter()
        .map(|row| {
            let secs = cell_i64(row, 0, "gate candle")?;
            let open_time = Utc
                .timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| Error::Parse(format!("gate candle: timestamp {secs} out of range")))?;
            let volume = match row.get(6) {
                Some(_) => cell_f64(row, 6, "gate candle")?,
                None => cell_f64(row, 1, "gate candle")?,
            };
            Ok(Bar::new(
                open_time,
                interval,
                cell_f64(row, 5, "gate candle")?,
                cell_f64(row, 3, "gate candle")?,
                cell_f64(row, 4, "gate candle")?,
                cell_f64(row, 2, "gate candle")?,
                volume,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(BarSeries::new(interval, bars))
}

pub(crate) fn parse_currency_pairs(body: &str) -> Result<Vec<TradingPair>> {
    let value: Value = serde_json::from_str(body)?;
    if let Some(err) = envelope_error(&value) {
        return Err(err);
    }
    let pairs: Vec<CurrencyPair> = serde_json::from_value(value)?;

    Ok(pairs
        .into_iter()
        .map(|p| TradingPair {
            status: if p.trade_status == "tradable" {
                PairStatus::Active
            } else {
                PairStatus::Inactive
            },
            listing_date: p
                .buy_start
                .filter(|secs| *secs > 0)
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            symbol: p.id,
            base_currency: p.base,
            quote_currency: p.quote,
            exchange: ExchangeType::GateIo,
            instrument_type: "SPOT".to_string(),
        })
        .collect())
}

/// Gate.io reports failures as `{"label": "INVALID_CURRENCY", "message": "..."}`.
fn envelope_error(value: &Value) -> Option<Error> {
    let obj = value.as_object()?;
    let label = obj.get("label")?.as_str().unwrap_or("UNKNOWN");
    let message = obj.get("message").and_then(Value::as_str).unwrap_or("");
    Some(Error::Exchange(format!("Gate.io error {label}: {message}")))
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CurrencyPair {
    id: String,
    base: String,
    quote: String,
    #[serde(default)]
    trade_status: String,
    #[serde(default)]
    buy_start: Option<i64>,
}
