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

const BASE_URL: &str = "https://api.bybit.com";

/// Public spot market data from Bybit (v5 API).
pub struct BybitClient {
    fetcher: ResilientFetcher,
    base_url: String,
}

impl BybitClient {
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
impl ExchangeClient for BybitClient {
    fn exchange(&self) -> ExchangeType {
        ExchangeType::Bybit
    }

    async fn klines(&self, symbol: &str, interval: KlineInterval, limit: u32) -> Result<BarSeries> {
        let symbol = symbol.replace(['-', '_'], "");
        let url = format!(
            "{}/v5/market/kline?category=spot&symbol={symbol}&interval={}&limit={limit}",
            self.base_url,
            interval.native(ExchangeType::Bybit)
        );
        debug!(%symbol, %interval, "Fetching Bybit klines");
        let body = self.fetcher.fetch(&url).await?;
        parse_klines(&body, interval)
    }

    async fn trading_pairs(&self) -> Result<Vec<TradingPair>> {
        let url = format!("{}/v5/market/instruments-info?category=spot", self.base_url);
        let body = self.fetcher.fetch(&url).await?;
        parse_instruments(&body)
    }
}

/// `result.list` rows are `[startTime, open, high, low, close, volume, turnover]`,
/// newest first.
pub(crate) fn parse_klines(body: &str, interval: KlineInterval) -> Result<BarSeries> {
    let envelope: Envelope<KlineResult> = serde_json::from_str(body)?;
    let rows = envelope.into_result()?.list;

    let mut bars = rows
        .iter()
        .map(|row| {
            Ok(Bar::new(
                millis_to_utc(cell_i64(row, 0, "bybit kline")?)?,
                interval,
                cell_f64(row, 1, "bybit kline")?,
                cell_f64(row, 2, "bybit kline")?,
                cell_f64(row, 3, "bybit kline")?,
                cell_f64(row, 4, "bybit kline")?,
                cell_f64(row, 5, "bybit kline")?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    bars.reverse();

    Ok(BarSeries::new(interval, bars))
}

pub(crate) fn parse_instruments(body: &str) -> Result<Vec<TradingPair>> {
    let envelope: Envelope<InstrumentResult> = serde_json::from_str(body)?;
    let instruments = envelope.into_result()?.list;

    Ok(instruments
        .into_iter()
        .map(|inst| TradingPair {
            status: if inst.status == "Trading" {
                PairStatus::Active
            } else {
                PairStatus::Inactive
            },
            symbol: inst.symbol,
            base_currency: inst.base_coin,
            quote_currency: inst.quote_coin,
            exchange: ExchangeType::Bybit,
            instrument_type: "SPOT".to_string(),
            listing_date: None,
        })
        .collect())
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

impl<T: Default> Envelope<T> {
    fn into_result(self) -> Result<T> {
        if self.ret_code != 0 {
            return Err(Error::Exchange(format!(
                "Bybit error {}: {}",
                self.ret_code, self.ret_msg
            )));
        }
        Ok(self.result.unwrap_or_default())
    }
}

#[derive(Deserialize, Default)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<Value>>,
}

#[derive(Deserialize, Default)]
struct InstrumentResult {
    #[serde(default)]
    list: Vec<Instrument>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    symbol: String,
    base_coin: String,
    quote_coin: String,
    #[serde(default)]
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn klines_are_reversed_to_oldest_first() {
        let body = r#"{"retCode":0,"retMsg":"OK","result":{"symbol":"BTCUSDT","category":"spot","list":[
            ["1700014400000","36000","36100","35900","36050","3.1","111"],
            ["1700000000000","35000","35100","34900","35050","2.2","77"]
        ]},"time":1700014500000}"#;
        let series = parse_klines(body, KlineInterval::Hour4).unwrap();
        assert_eq!(series.closes(), vec![35050.0, 36050.0]);
    }

    #[test]
    fn non_zero_ret_code_is_an_error() {
        let body = r#"{"retCode":10001,"retMsg":"Not supported symbols","result":{}}"#;
        let err = parse_klines(body, KlineInterval::Day1).unwrap_err();
        assert!(err.to_string().contains("Not supported symbols"));
    }

    #[test]
    fn instruments_map_trading_status() {
        let body = r#"{"retCode":0,"retMsg":"OK","result":{"category":"spot","list":[
            {"symbol":"SOLUSDT","baseCoin":"SOL","quoteCoin":"USDT","status":"Trading"},
            {"symbol":"XYZUSDT","baseCoin":"XYZ","quoteCoin":"USDT","status":"Closed"}
        ]}}"#;
        let pairs = parse_instruments(body).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].status, PairStatus::Active);
        assert_eq!(pairs[1].status, PairStatus::Inactive);
    }
}
