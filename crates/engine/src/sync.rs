use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::coins::allowed_quotes;
use common::{CryptoMode, ExchangeType, Result, Settings, TradingPair, TradingPairStore};

use crate::exchanges::ClientFactory;

/// Refreshes the trading-pair catalog from the exchanges' instrument lists.
pub struct PairSynchronizer {
    factory: Arc<dyn ClientFactory>,
    store: Arc<dyn TradingPairStore>,
    cancel: CancellationToken,
}

impl PairSynchronizer {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        store: Arc<dyn TradingPairStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            store,
            cancel,
        }
    }

    /// Resync every enabled exchange. An exchange whose catalog cannot be
    /// fetched is logged and keeps its previous rows. Returns the number of
    /// pairs written.
    pub async fn sync_all(&self, settings: &Settings) -> Result<usize> {
        let mut all = Vec::new();
        for &exchange in &settings.exchanges {
            match self.fetch_filtered(exchange, settings).await {
                Ok(pairs) => all.extend(pairs),
                Err(e) => error!(%exchange, error = %e, "Trading pair fetch failed, keeping previous catalog"),
            }
        }
        self.store_pairs(all).await
    }

    /// Resync a single exchange; other exchanges' rows are untouched.
    pub async fn sync_exchange(&self, exchange: ExchangeType, settings: &Settings) -> Result<usize> {
        let pairs = self.fetch_filtered(exchange, settings).await?;
        self.store_pairs(pairs).await
    }

    async fn store_pairs(&self, pairs: Vec<TradingPair>) -> Result<usize> {
        if pairs.is_empty() {
            warn!("Trading pair sync produced no pairs, leaving catalog unchanged");
            return Ok(0);
        }
        let count = pairs.len();
        self.store.replace_all(&pairs).await?;
        info!(pairs = count, "Trading pair catalog replaced");
        Ok(count)
    }

    async fn fetch_filtered(&self, exchange: ExchangeType, settings: &Settings) -> Result<Vec<TradingPair>> {
        let proxy = settings.proxies.iter().find(|p| p.is_well_formed());
        let client = match self.factory.build(exchange, proxy, self.cancel.child_token()) {
            Ok(client) => client,
            Err(e) if proxy.is_some() => {
                warn!(%exchange, error = %e, "Proxy unusable for catalog sync, going direct");
                self.factory.build(exchange, None, self.cancel.child_token())?
            }
            Err(e) => return Err(e),
        };

        let fetched = client.trading_pairs().await?;
        let fetched_count = fetched.len();
        let unique = dedup_by_symbol(fetched);
        let kept = filter_pairs(unique, settings);
        info!(
            %exchange,
            fetched = fetched_count,
            kept = kept.len(),
            mode = %settings.crypto_mode,
            "Trading pairs fetched"
        );
        Ok(kept)
    }
}

/// Keep the first occurrence of each symbol.
pub fn dedup_by_symbol(pairs: Vec<TradingPair>) -> Vec<TradingPair> {
    let mut seen = HashSet::new();
    pairs
        .into_iter()
        .filter(|p| seen.insert(p.symbol.clone()))
        .collect()
}

/// Apply the watchlist in `custom` mode; `all` mode keeps everything.
pub fn filter_pairs(pairs: Vec<TradingPair>, settings: &Settings) -> Vec<TradingPair> {
    match settings.crypto_mode {
        CryptoMode::All => pairs,
        CryptoMode::Custom => pairs
            .into_iter()
            .filter(|p| matches_watchlist(&p.symbol, &settings.crypto_symbols))
            .collect(),
    }
}

/// True when `symbol` is a watched coin followed by one of that coin's
/// allowed quote currencies, optionally separated by `_` or `-`.
pub fn matches_watchlist(symbol: &str, watched: &[String]) -> bool {
    let symbol = symbol.to_uppercase();
    watched.iter().any(|coin| {
        let coin = coin.to_uppercase();
        let Some(rest) = symbol.strip_prefix(coin.as_str()) else {
            return false;
        };
        let quote = rest
            .strip_prefix('_')
            .or_else(|| rest.strip_prefix('-'))
            .unwrap_or(rest);
        allowed_quotes(&coin).contains(&quote)
    })
}
