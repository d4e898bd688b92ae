use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ExchangeType, Result, Settings, SignalKind, TradeSignal, TradingPair};

/// Persistence for the singleton settings row and its proxies.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// `None` until settings have been saved once.
    async fn load(&self) -> Result<Option<Settings>>;

    /// Overwrite the stored settings; the proxy list is replaced wholesale.
    async fn save(&self, settings: &Settings) -> Result<()>;
}

#[async_trait]
pub trait TradingPairStore: Send + Sync {
    async fn find_by_exchange(&self, exchange: ExchangeType) -> Result<Vec<TradingPair>>;

    /// Replace the catalog of every exchange present in `pairs` inside one
    /// transaction. Exchanges absent from `pairs` keep their rows, and an
    /// empty slice changes nothing.
    async fn replace_all(&self, pairs: &[TradingPair]) -> Result<()>;
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Insert a batch in one transaction.
    async fn save_all(&self, signals: &[TradeSignal]) -> Result<()>;

    /// Returns the number of rows removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn query(&self, query: &SignalQuery) -> Result<SignalPage>;

    /// Stored signal counts per direction.
    async fn count_by_kind(&self) -> Result<Vec<(SignalKind, u64)>>;
}

/// Filters for browsing stored signals. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalQuery {
    /// Substring match on symbol or strategy name.
    pub search: Option<String>,
    pub exchange: Option<ExchangeType>,
    pub signal: Option<SignalKind>,
    pub strategy: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Zero-based.
    pub page: u32,
    pub size: u32,
}

impl SignalQuery {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;

    pub fn page_size(&self) -> u32 {
        if self.size == 0 {
            Self::DEFAULT_PAGE_SIZE
        } else {
            self.size.min(500)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPage {
    pub items: Vec<TradeSignal>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
}
