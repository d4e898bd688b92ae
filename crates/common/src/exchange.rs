use async_trait::async_trait;

use crate::{BarSeries, ExchangeType, KlineInterval, Result, TradingPair};

/// Read-only market data access for one exchange.
///
/// Implementations own URL construction and response parsing only. Delays,
/// retries and proxy routing belong to the fetcher they are built with, so a
/// client is always bound to at most one egress proxy.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn exchange(&self) -> ExchangeType;

    /// Fetch up to `limit` most recent candles, returned oldest first.
    async fn klines(&self, symbol: &str, interval: KlineInterval, limit: u32) -> Result<BarSeries>;

    /// Fetch the full spot instrument catalog.
    async fn trading_pairs(&self) -> Result<Vec<TradingPair>>;
}
