#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use common::{
    Bar, BarSeries, Error, ExchangeClient, ExchangeType, FetchError, KlineInterval, PairStatus,
    Proxy, Result, SeriesBundle, TradingPair,
};
use engine::ClientFactory;
use strategy::{StrategyExecutor, StrategyOutput};

/// Scripted behaviour for one fake exchange.
#[derive(Clone, Default)]
pub struct Script {
    /// `None` means the instrument endpoint is unreachable.
    pub catalog: Option<Vec<String>>,
    pub klines_down: bool,
    /// Every symbol fails on this interval.
    pub fail_interval: Option<KlineInterval>,
    /// Kline requests sit in backoff until the client's token is cancelled.
    pub klines_stall: bool,
}

impl Script {
    pub fn healthy(symbols: &[&str]) -> Self {
        Self {
            catalog: Some(symbols.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn down() -> Self {
        Self {
            catalog: None,
            klines_down: true,
            ..Self::default()
        }
    }
}

#[derive(Default)]
pub struct FakeFactory {
    scripts: HashMap<ExchangeType, Script>,
    pub builds: Mutex<Vec<(ExchangeType, Option<Proxy>)>>,
    pub kline_calls: Arc<Mutex<Vec<(ExchangeType, String, KlineInterval)>>>,
}

impl FakeFactory {
    pub fn new(scripts: impl IntoIterator<Item = (ExchangeType, Script)>) -> Self {
        Self {
            scripts: scripts.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn calls_for(&self, exchange: ExchangeType, symbol: &str) -> Vec<KlineInterval> {
        self.kline_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, s, _)| *e == exchange && s == symbol)
            .map(|(_, _, i)| *i)
            .collect()
    }
}

impl ClientFactory for FakeFactory {
    fn build(
        &self,
        exchange: ExchangeType,
        proxy: Option<&Proxy>,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn ExchangeClient>> {
        self.builds.lock().unwrap().push((exchange, proxy.cloned()));
        Ok(Arc::new(FakeClient {
            exchange,
            script: self.scripts.get(&exchange).cloned().unwrap_or_else(Script::down),
            calls: Arc::clone(&self.kline_calls),
            cancel,
        }))
    }
}

struct FakeClient {
    exchange: ExchangeType,
    script: Script,
    calls: Arc<Mutex<Vec<(ExchangeType, String, KlineInterval)>>>,
    cancel: CancellationToken,
}

fn refused() -> Error {
    Error::Fetch(FetchError::Exhausted {
        attempts: 4,
        last: Box::new(FetchError::Connect("connection refused".into())),
    })
}

#[async_trait]
impl ExchangeClient for FakeClient {
    fn exchange(&self) -> ExchangeType {
        self.exchange
    }

    async fn klines(&self, symbol: &str, interval: KlineInterval, limit: u32) -> Result<BarSeries> {
        self.calls
            .lock()
            .unwrap()
            .push((self.exchange, symbol.to_string(), interval));
        if self.script.klines_stall {
            self.cancel.cancelled().await;
            return Err(FetchError::Interrupted.into());
        }
        if self.script.klines_down || self.script.fail_interval == Some(interval) {
            return Err(refused());
        }
        Ok(rising_series(interval, limit.min(60) as usize))
    }

    async fn trading_pairs(&self) -> Result<Vec<TradingPair>> {
        let Some(symbols) = &self.script.catalog else {
            return Err(refused());
        };
        Ok(symbols.iter().map(|s| pair(self.exchange, s)).collect())
    }
}

pub fn pair(exchange: ExchangeType, symbol: &str) -> TradingPair {
    let (base, quote) = symbol
        .split_once(['-', '_'])
        .unwrap_or((symbol, "USDT"));
    TradingPair {
        symbol: symbol.to_string(),
        base_currency: base.to_string(),
        quote_currency: quote.to_string(),
        exchange,
        status: PairStatus::Active,
        instrument_type: "SPOT".into(),
        listing_date: None,
    }
}

pub fn rising_series(interval: KlineInterval, len: usize) -> BarSeries {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let bars = (0..len)
        .map(|i| {
            let close = 100.0 + i as f64;
            Bar::new(
                t0 + interval.duration() * i as i32,
                interval,
                close - 0.5,
                close + 1.0,
                close - 1.0,
                close,
                1_000.0,
            )
        })
        .collect();
    BarSeries::new(interval, bars)
}

/// Buys at the latest close of the shortest interval it was given. Refuses
/// bundles that carry the two shortest intervals.
pub struct AlwaysBuy;

#[async_trait]
impl StrategyExecutor for AlwaysBuy {
    fn name(&self) -> &str {
        "AlwaysBuy"
    }

    async fn execute(&self, bundle: &SeriesBundle, _symbol: &str) -> Result<Option<StrategyOutput>> {
        if bundle.get(KlineInterval::Min1).is_some() || bundle.get(KlineInterval::Min5).is_some() {
            return Err(Error::Strategy("unexpected short interval".into()));
        }
        let Some((_, series)) = bundle.iter().next() else {
            return Ok(None);
        };
        Ok(series.last().map(|b| StrategyOutput::new("BUY", b.close)))
    }
}
