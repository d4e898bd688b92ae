use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::{
    Config, Error, ExchangeClient, ExchangeType, KlineInterval, PairStatus, Proxy, Result,
    SeriesBundle, Settings, SignalStore, TradingPair, TradingPairStore,
};
use strategy::StrategyRegistry;

use crate::exchanges::ClientFactory;
use crate::proxy_pool::{PoolReport, ProxyPool};
use crate::sync::PairSynchronizer;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Bars requested per interval.
    pub kline_limit: u32,
    /// How long a run's proxy pool may drain before work is cancelled.
    pub pool_shutdown: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            kline_limit: 300,
            pool_shutdown: Duration::from_secs(60),
        }
    }
}

impl PipelineOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            kline_limit: cfg.kline_limit,
            pool_shutdown: cfg.pool_shutdown_timeout,
        }
    }
}

/// Outcome of one exchange's share of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeReport {
    pub exchange: ExchangeType,
    pub pairs: usize,
    pub signals_saved: usize,
    pub pool: PoolReport,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub exchanges: Vec<ExchangeReport>,
    /// Exchanges whose cycle failed as a whole.
    pub failed: Vec<(ExchangeType, String)>,
}

impl RunReport {
    pub fn signals_saved(&self) -> usize {
        self.exchanges.iter().map(|e| e.signals_saved).sum()
    }
}

/// Fetch → evaluate → persist, once per enabled exchange.
#[derive(Clone)]
pub struct SignalPipeline {
    factory: Arc<dyn ClientFactory>,
    pairs: Arc<dyn TradingPairStore>,
    signals: Arc<dyn SignalStore>,
    synchronizer: Arc<PairSynchronizer>,
    registry: Arc<StrategyRegistry>,
    options: PipelineOptions,
    shutdown: CancellationToken,
}

impl SignalPipeline {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        pairs: Arc<dyn TradingPairStore>,
        signals: Arc<dyn SignalStore>,
        synchronizer: Arc<PairSynchronizer>,
        registry: Arc<StrategyRegistry>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            factory,
            pairs,
            signals,
            synchronizer,
            registry,
            options,
            shutdown: CancellationToken::new(),
        }
    }

    /// Each run's proxy pool is opened under a child of `token`, so
    /// cancelling it interrupts fetches and backoff sleeps in flight.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Run every enabled exchange concurrently. Never fails: an exchange
    /// that errors out is logged and recorded in the report.
    pub async fn run_once(&self, settings: &Settings) -> RunReport {
        let mut cycles = JoinSet::new();
        for &exchange in &settings.exchanges {
            let pipeline = self.clone();
            let settings = settings.clone();
            cycles.spawn(async move {
                let outcome = pipeline.process_exchange(exchange, &settings).await;
                (exchange, outcome)
            });
        }

        let mut report = RunReport::default();
        while let Some(joined) = cycles.join_next().await {
            match joined {
                Ok((_, Ok(exchange_report))) => report.exchanges.push(exchange_report),
                Ok((exchange, Err(e))) => {
                    error!(%exchange, error = %e, "Exchange cycle failed");
                    report.failed.push((exchange, e.to_string()));
                }
                Err(e) => error!(error = %e, "Exchange cycle panicked"),
            }
        }

        info!(
            exchanges = report.exchanges.len(),
            failed = report.failed.len(),
            signals = report.signals_saved(),
            "Pipeline run finished"
        );
        report
    }

    async fn process_exchange(&self, exchange: ExchangeType, settings: &Settings) -> Result<ExchangeReport> {
        let pairs = self.ensure_catalog(exchange, settings).await?;
        let empty = ExchangeReport {
            exchange,
            pairs: 0,
            signals_saved: 0,
            pool: PoolReport::default(),
        };
        if pairs.is_empty() {
            warn!(%exchange, "No trading pairs after resync, skipping this cycle");
            return Ok(empty);
        }

        let mut pool = ProxyPool::open(exchange.to_string(), &settings.proxies, self.shutdown.child_token()).await;
        let clients = Arc::new(ClientSet::build(
            self.factory.as_ref(),
            exchange,
            &pool.proxies(),
            pool.cancel_token(),
        )?);
        let saved = Arc::new(AtomicUsize::new(0));

        info!(%exchange, pairs = pairs.len(), workers = pool.worker_count(), "Exchange cycle started");
        let pair_count = pairs.len();
        for pair in pairs {
            let clients = Arc::clone(&clients);
            let registry = Arc::clone(&self.registry);
            let signals = Arc::clone(&self.signals);
            let saved = Arc::clone(&saved);
            let limit = self.options.kline_limit;

            pool.submit(pair.symbol.clone(), move |proxy| async move {
                let client = clients.for_proxy(proxy.as_ref())?;
                let bundle = fetch_bundle(client.as_ref(), &pair.symbol, limit, proxy.as_ref()).await;
                if bundle.is_empty() {
                    return Err(Error::Exchange(format!("no klines fetched for {}", pair.symbol)));
                }

                let found = registry.evaluate(exchange, &pair.symbol, &bundle).await;
                if !found.is_empty() {
                    signals.save_all(&found).await?;
                    saved.fetch_add(found.len(), Ordering::Relaxed);
                }
                Ok(())
            });
        }

        let pool_report = pool.shutdown(self.options.pool_shutdown).await;
        let signals_saved = saved.load(Ordering::Relaxed);
        info!(
            %exchange,
            completed = pool_report.completed,
            failed = pool_report.failed,
            cancelled = pool_report.cancelled,
            signals = signals_saved,
            "Exchange cycle finished"
        );
        Ok(ExchangeReport {
            pairs: pair_count,
            signals_saved,
            pool: pool_report,
            ..empty
        })
    }

    /// Active pairs for `exchange`, resyncing once if the catalog is empty.
    /// A failed resync fails the exchange's cycle.
    async fn ensure_catalog(&self, exchange: ExchangeType, settings: &Settings) -> Result<Vec<TradingPair>> {
        let mut pairs = self.pairs.find_by_exchange(exchange).await?;
        if pairs.is_empty() {
            info!(%exchange, "Trading pair catalog empty, resyncing");
            self.synchronizer.sync_exchange(exchange, settings).await?;
            pairs = self.pairs.find_by_exchange(exchange).await?;
        }
        pairs.retain(|p| p.status == PairStatus::Active);
        Ok(pairs)
    }
}

/// Fetch each signal interval in turn. The first failure ends the chain for
/// this pair; whatever was fetched before it is returned.
async fn fetch_bundle(
    client: &dyn ExchangeClient,
    symbol: &str,
    limit: u32,
    proxy: Option<&Proxy>,
) -> SeriesBundle {
    let mut bundle = SeriesBundle::new();
    for &interval in KlineInterval::signal_intervals() {
        match client.klines(symbol, interval, limit).await {
            Ok(series) => bundle.insert(series),
            Err(e) => {
                warn!(
                    exchange = %client.exchange(),
                    %symbol,
                    %interval,
                    proxy = ?proxy.map(Proxy::address),
                    error = %e,
                    "Kline fetch failed, skipping remaining intervals"
                );
                break;
            }
        }
    }
    bundle
}

/// One client per pool slot, built up front so units of work only look
/// theirs up.
struct ClientSet {
    direct: Option<Arc<dyn ExchangeClient>>,
    by_proxy: HashMap<Proxy, Arc<dyn ExchangeClient>>,
}

impl ClientSet {
    fn build(
        factory: &dyn ClientFactory,
        exchange: ExchangeType,
        proxies: &[Proxy],
        cancel: CancellationToken,
    ) -> Result<Self> {
        if proxies.is_empty() {
            return Ok(Self {
                direct: Some(factory.build(exchange, None, cancel)?),
                by_proxy: HashMap::new(),
            });
        }
        let mut by_proxy = HashMap::with_capacity(proxies.len());
        for proxy in proxies {
            by_proxy.insert(proxy.clone(), factory.build(exchange, Some(proxy), cancel.clone())?);
        }
        Ok(Self {
            direct: None,
            by_proxy,
        })
    }

    fn for_proxy(&self, proxy: Option<&Proxy>) -> Result<Arc<dyn ExchangeClient>> {
        let client = match proxy {
            Some(p) => self.by_proxy.get(p),
            None => self.direct.as_ref(),
        };
        client
            .cloned()
            .ok_or_else(|| Error::Other("no client for assigned proxy".to_string()))
    }
}
