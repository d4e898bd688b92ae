use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use common::{
    Bar, BarSeries, Error, ExchangeClient, ExchangeType, KlineInterval, PairStatus, Result,
    TradingPair,
};

use super::{cell_f64, cell_i64, millis_to_utc, split_pair};
use crate::fetcher::ResilientFetcher;

const BASE_URL: &str = "https://www.okx.com";

/// Public spot market data from OKX. Symbols are instrument ids (`BTC-USDT`).
pub struct OkxClient {
    fetcher: ResilientFetcher,
    base_url: String,
}

impl OkxClient {
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
impl ExchangeClient for OkxClient {
    fn exchange(&self) -> ExchangeType {
        ExchangeType::Okx
    }

    async fn klines(&self, symbol: &str, interval: KlineInterval, limit: u32) -> Result<BarSeries> {
        let url = format!(
            "{}/api/v5/market/candles?instId={symbol}&bar={}&limit={limit}",
            self.base_url,
            interval.native(ExchangeType::Okx)
        );
        debug!(%symbol, %interval, "Fetching OKX candles");
        let body = self.fetcher.fetch(&url).await?;
        parse_candles(&body, interval)
    }

    async fn trading_pairs(&self) -> Result<Vec<TradingPair>> {
        let url = format!("{}/api/v5/public/instruments?instType=SPOT", self.base_url);
        let body = self.fetcher.fetch(&url).await?;
        parse_instruments(&body)
    }
}

/// Rows are `[ts, o, h, l, c, vol, ...]`, newest first.
pub(crate) fn parse_candles(body: &str, interval: KlineInterval) -> Result<BarSeries> {
    let envelope: Envelope<Vec<Vec<Value>>> = serde_json::from_str(body)?;
    let rows = envelope.into_data()?;

    let mut bars = rows
        .iter()
        .map(|row| {
            Ok(Bar::new(
                millis_to_utc(cell_i64(row, 0, "okx candle")?)?,
                interval,
                cell_f64(row, 1, "okx candle")?,
                cell_f64(row, 2, "okx candle")?,
                cell_f64(row, 3, "okx candle")?,
                cell_f64(row, 4, "okx candle")?,
                cell_f64(row, 5, "okx candle")?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    bars.reverse();

    Ok(BarSeries::new(interval, bars))
}

pub(crate) fn parse_instruments(body: &str) -> Result<Vec<TradingPair>> {
    let envelope: Envelope<Vec<Instrument>> = serde_json::from_str(body)?;
    let instruments = envelope.into_data()?;

    Ok(instruments
        .into_iter()
        .map(|inst| {
            let (base, quote) = match (inst.base_ccy.as_str(), inst.quote_ccy.as_str()) {
                ("", _) | (_, "") => split_pair(&inst.inst_id)
                    .map(|(b, q)| (b.to_string(), q.to_string()))
                    .unwrap_or_else(|| (inst.inst_id.clone(), String::new())),
                (b, q) => (b.to_string(), q.to_string()),
            };
            let listing_date = inst
                .list_time
                .parse::<i64>()
                .ok()
                .filter(|ms| *ms > 0)
                .and_then(|ms| millis_to_utc(ms).ok());
            TradingPair {
                status: if inst.state == "live" {
                    PairStatus::Active
                } else {
                    PairStatus::Inactive
                },
                symbol: inst.inst_id,
                base_currency: base,
                quote_currency: quote,
                exchange: ExchangeType::Okx,
                instrument_type: inst.inst_type,
                listing_date,
            }
        })
        .collect())
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

impl<T: Default> Envelope<T> {
    fn into_data(self) -> Result<T> {
        if self.code != "0" {
            return Err(Error::Exchange(format!("OKX error {}: {}", self.code, self.msg)));
        }
        Ok(self.data.unwrap_or_default())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    inst_id: String,
    #[serde(default)]
    base_ccy: String,
    #[serde(default)]
    quote_ccy: String,
    #[serde(default)]
    inst_type: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    list_time: String,
}
