pub mod binance;
pub mod bybit;
pub mod gateio;
pub mod okx;

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use common::{Error, ExchangeClient, ExchangeType, Proxy, Result};

use crate::fetcher::{ResilientFetcher, RetryPolicy};

pub use binance::BinanceClient;
pub use bybit::BybitClient;
pub use gateio::GateIoClient;
pub use okx::OkxClient;

/// Build the client for `exchange` on top of an already configured fetcher.
pub fn connect(exchange: ExchangeType, fetcher: ResilientFetcher) -> Arc<dyn ExchangeClient> {
    match exchange {
        ExchangeType::Binance => Arc::new(BinanceClient::new(fetcher)),
        ExchangeType::Okx => Arc::new(OkxClient::new(fetcher)),
        ExchangeType::GateIo => Arc::new(GateIoClient::new(fetcher)),
        ExchangeType::Bybit => Arc::new(BybitClient::new(fetcher)),
    }
}

/// Produces exchange clients bound to a specific proxy (or none).
///
/// The synchronizer and the pipeline only ever see this trait, which lets
/// tests swap in canned clients.
pub trait ClientFactory: Send + Sync {
    fn build(
        &self,
        exchange: ExchangeType,
        proxy: Option<&Proxy>,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn ExchangeClient>>;
}

/// Real HTTP clients talking to the public exchange APIs.
#[derive(Debug, Clone, Default)]
pub struct HttpClientFactory {
    policy: RetryPolicy,
}

impl HttpClientFactory {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl ClientFactory for HttpClientFactory {
    fn build(
        &self,
        exchange: ExchangeType,
        proxy: Option<&Proxy>,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn ExchangeClient>> {
        let fetcher = ResilientFetcher::new(self.policy.clone(), proxy, cancel)?;
        Ok(connect(exchange, fetcher))
    }
}

// ─── Parsing helpers ──────────────────────────────────────────────────────────

/// Read a numeric cell that may be encoded as a JSON string or number.
pub(crate) fn cell_f64(row: &[Value], idx: usize, what: &str) -> Result<f64> {
    let value = row
        .get(idx)
        .ok_or_else(|| Error::Parse(format!("{what}: missing column {idx}")))?;
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::Parse(format!("{what}: column {idx} is not a float"))),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| Error::Parse(format!("{what}: column {idx} = '{s}' is not numeric"))),
        other => Err(Error::Parse(format!("{what}: column {idx} has type {other}"))),
    }
}

pub(crate) fn cell_i64(row: &[Value], idx: usize, what: &str) -> Result<i64> {
    let value = row
        .get(idx)
        .ok_or_else(|| Error::Parse(format!("{what}: missing column {idx}")))?;
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::Parse(format!("{what}: column {idx} is not an integer"))),
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| Error::Parse(format!("{what}: column {idx} = '{s}' is not an integer"))),
        other => Err(Error::Parse(format!("{what}: column {idx} has type {other}"))),
    }
}

pub(crate) fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::Parse(format!("timestamp {ms} out of range")))
}

/// Split `BTC-USDT` / `BTC_USDT` into its two legs.
pub(crate) fn split_pair(symbol: &str) -> Option<(&str, &str)> {
    symbol
        .split_once('-')
        .or_else(|| symbol.split_once('_'))
        .filter(|(base, quote)| !base.is_empty() && !quote.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cells_accept_strings_and_numbers() {
        let row = vec![json!(1700000000000i64), json!("42.5"), json!(7)];
        assert_eq!(cell_i64(&row, 0, "t").unwrap(), 1_700_000_000_000);
        assert_eq!(cell_f64(&row, 1, "t").unwrap(), 42.5);
        assert_eq!(cell_f64(&row, 2, "t").unwrap(), 7.0);
        assert!(cell_f64(&row, 3, "t").is_err());
    }

    #[test]
    fn split_pair_handles_both_separators() {
        assert_eq!(split_pair("BTC-USDT"), Some(("BTC", "USDT")));
        assert_eq!(split_pair("ETH_BTC"), Some(("ETH", "BTC")));
        assert_eq!(split_pair("BTCUSDT"), None);
    }

    #[test]
    fn factory_builds_the_requested_exchange() {
        let factory = HttpClientFactory::new(RetryPolicy::immediate(1));
        for exchange in ExchangeType::ALL {
            let client = factory.build(exchange, None, CancellationToken::new()).unwrap();
            assert_eq!(client.exchange(), exchange);
        }
    }
}
