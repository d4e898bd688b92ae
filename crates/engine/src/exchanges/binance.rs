use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use common::{
    Bar, BarSeries, Error, ExchangeClient, ExchangeType, KlineInterval, PairStatus, Result,
    TradingPair,
};

use super::{cell_f64, cell_i64, millis_to_utc};
use crate::fetcher::ResilientFetcher;

const BASE_URL: &str = "https://api.binance.com";

/// Public spot market data from Binance.
pub struct BinanceClient {
    fetcher: ResilientFetcher,
    base_url: String,
}

impl BinanceClient {
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
impl ExchangeClient for BinanceClient {
    fn exchange(&self) -> ExchangeType {
        ExchangeType::Binance
    }

    async fn klines(&self, symbol: &str, interval: KlineInterval, limit: u32) -> Result<BarSeries> {
        let symbol = symbol.replace(['-', '_'], "");
        let url = format!(
            "{}/api/v3/klines?symbol={symbol}&interval={}&limit={limit}",
            self.base_url,
            interval.native(ExchangeType::Binance)
        );
        debug!(%symbol, %interval, "Fetching Binance klines");
        let body = self.fetcher.fetch(&url).await?;
        parse_klines(&body, interval)
    }

    async fn trading_pairs(&self) -> Result<Vec<TradingPair>> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let body = self.fetcher.fetch(&url).await?;
        parse_exchange_info(&body)
    }
}

/// Rows are `[openTime, open, high, low, close, volume, closeTime, ...]`,
/// oldest first.
pub(crate) fn parse_klines(body: &str, interval: KlineInterval) -> Result<BarSeries> {
    let value: Value = serde_json::from_str(body)?;
    if let Some(err) = envelope_error(&value) {
        return Err(err);
    }
    let rows: Vec<Vec<Value>> = serde_json::from_value(value)?;

    let bars = rows
        .iter()
        .map(|row| {
            Ok(Bar::new(
                millis_to_utc(cell_i64(row, 0, "binance kline")?)?,
                interval,
                cell_f64(row, 1, "binance kline")?,
                cell_f64(row, 2, "binance kline")?,
                cell_f64(row, 3, "binance kline")?,
                cell_f64(row, 4, "binance kline")?,
                cell_f64(row, 5, "binance kline")?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(BarSeries::new(interval, bars))
}

pub(crate) fn parse_exchange_info(body: &str) -> Result<Vec<TradingPair>> {
    let value: Value = serde_json::from_str(body)?;
    if let Some(err) = envelope_error(&value) {
        return Err(err);
    }
    let info: ExchangeInfo = serde_json::from_value(value)?;

    Ok(info
        .symbols
        .into_iter()
        .map(|s| TradingPair {
            status: if s.status == "TRADING" {
                PairStatus::Active
            } else {
                PairStatus::Inactive
            },
            symbol: s.symbol,
            base_currency: s.base_asset,
            quote_currency: s.quote_asset,
            exchange: ExchangeType::Binance,
            instrument_type: "SPOT".to_string(),
            listing_date: None,
        })
        .collect())
}

/// Binance reports failures as `{"code": -1121, "msg": "Invalid symbol."}`.
fn envelope_error(value: &Value) -> Option<Error> {
    let obj = value.as_object()?;
    let code = obj.get("code")?;
    let msg = obj.get("msg").and_then(Value::as_str).unwrap_or("unknown error");
    Some(Error::Exchange(format!("Binance error {code}: {msg}")))
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
}
