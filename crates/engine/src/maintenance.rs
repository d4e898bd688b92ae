//! Low-frequency background jobs: monthly signal pruning and the periodic
//! trading-pair catalog refresh.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use common::{Result, SignalStore};

use crate::settings::SettingsService;
use crate::sync::PairSynchronizer;

const PRUNE_HOUR: u32 = 1;

/// Next 01:00 UTC on the first of a month strictly after `now`.
pub fn next_cleanup_at(now: DateTime<Utc>) -> DateTime<Utc> {
    let this_month = now
        .date_naive()
        .with_day(1)
        .and_then(|d| d.and_hms_opt(PRUNE_HOUR, 0, 0))
        .map(|t| Utc.from_utc_datetime(&t));
    match this_month {
        Some(candidate) if candidate > now => candidate,
        Some(candidate) => candidate
            .checked_add_months(Months::new(1))
            .unwrap_or(candidate),
        None => now,
    }
}

/// Signals older than this are pruned: one calendar month before `now`.
pub fn prune_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(1)).unwrap_or(now)
}

pub async fn prune_signals(store: &dyn SignalStore, now: DateTime<Utc>) -> Result<u64> {
    let cutoff = prune_cutoff(now);
    let removed = store.delete_older_than(cutoff).await?;
    info!(%cutoff, removed, "Old signals pruned");
    Ok(removed)
}

/// Prune old signals once a month until cancelled.
pub async fn run_signal_pruning(store: Arc<dyn SignalStore>, cancel: CancellationToken) {
    loop {
        let now = Utc::now();
        let next = next_cleanup_at(now);
        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!(next_run = %next, "Signal pruning scheduled");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        if let Err(e) = prune_signals(store.as_ref(), Utc::now()).await {
            error!(error = %e, "Signal pruning failed");
        }
    }
    info!("Signal pruning job stopped");
}

/// Resync every exchange's catalog each `every` until cancelled. The first
/// refresh happens one period after start.
pub async fn run_pair_refresh(
    synchronizer: Arc<PairSynchronizer>,
    settings: Arc<SettingsService>,
    every: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(every) => {}
        }
        let current = match settings.get().await {
            Ok(current) => current,
            Err(e) => {
                error!(error = %e, "Catalog refresh skipped, settings unavailable");
                continue;
            }
        };
        match synchronizer.sync_all(&current).await {
            Ok(pairs) => info!(pairs, "Periodic catalog refresh finished"),
            Err(e) => error!(error = %e, "Periodic catalog refresh failed"),
        }
    }
    info!("Catalog refresh job stopped");
}
