use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use common::{Config, Result, SettingsStore, SignalStore, TradingPairStore};
use engine::maintenance::{run_pair_refresh, run_signal_pruning};
use engine::{
    ClientFactory, HttpClientFactory, PairSynchronizer, PipelineOptions, RetryPolicy, Scheduler,
    SettingsService, SignalPipeline,
};
use store::SqliteStore;
use strategy::{StrategyFileConfig, StrategyRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env()?;
    info!(database = %cfg.database_url, strategies = %cfg.strategy_config_path, "Candlewatch starting");

    // ── Database ──────────────────────────────────────────────────────────────
    let db = Arc::new(SqliteStore::connect(&cfg.database_url).await?);
    let settings_store: Arc<dyn SettingsStore> = db.clone();
    let pair_store: Arc<dyn TradingPairStore> = db.clone();
    let signal_store: Arc<dyn SignalStore> = db.clone();

    // ── Exchange access ───────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let factory: Arc<dyn ClientFactory> = Arc::new(HttpClientFactory::new(RetryPolicy::from_config(&cfg)));
    let synchronizer = Arc::new(PairSynchronizer::new(
        factory.clone(),
        pair_store.clone(),
        shutdown.child_token(),
    ));
    let settings = Arc::new(SettingsService::new(settings_store, synchronizer.clone()));

    // ── Strategy registry ─────────────────────────────────────────────────────
    let strategy_file = StrategyFileConfig::load(&cfg.strategy_config_path)?;
    let registry = Arc::new(StrategyRegistry::from_config(&strategy_file)?);
    info!(strategies = registry.len(), "Strategy registry ready");

    // ── Scheduler ─────────────────────────────────────────────────────────────
    let pipeline = SignalPipeline::new(
        factory,
        pair_store,
        signal_store.clone(),
        synchronizer.clone(),
        registry,
        PipelineOptions::from_config(&cfg),
    )
    .with_shutdown(shutdown.child_token());
    let (scheduler, handle) = Scheduler::new(settings.clone(), pipeline);
    let scheduler_task = tokio::spawn(scheduler.run_immediately(cfg.run_on_start).run());

    // ── Maintenance ───────────────────────────────────────────────────────────
    let pruning = tokio::spawn(run_signal_pruning(signal_store, shutdown.child_token()));
    let refresh = tokio::spawn(run_pair_refresh(
        synchronizer,
        settings,
        cfg.pair_sync_interval,
        shutdown.child_token(),
    ));

    // ── Shutdown ──────────────────────────────────────────────────────────────
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C, shutting down");
    }
    info!("Shutdown requested");
    handle.stop().await;
    shutdown.cancel();

    for (name, task) in [("scheduler", scheduler_task), ("pruning", pruning), ("refresh", refresh)] {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "Task ended abnormally");
        }
    }
    db.pool().close().await;
    info!("Candlewatch stopped");
    Ok(())
}
